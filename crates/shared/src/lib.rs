//! Shared process bootstrap: env, tracing and database pool setup

pub mod bootstrap;
