//! Core domain logic for the SMS dispatch gateway
//!
//! Shared models, validation, backoff math, security helpers and the
//! capability traits (`Transmitter`, `Tunnel`) consumed by the other crates.

pub mod backoff;
pub mod config;
pub mod error;
pub mod models;
pub mod security;
pub mod transmitter;
pub mod tunnel;
pub mod validation;

pub use error::{GatewayError, GatewayResult};
pub use models::{
    ApiToken, AuditEvent, AuthContext, Message, MessageStatus, NewMessage, Priority,
    RateLimitScope, RetryStrategy, TokenKind,
};
pub use transmitter::{RetryableFault, SimState, TerminalFault, TransmitError, Transmitter};
pub use tunnel::{Tunnel, TunnelConfig, TunnelStatus};
