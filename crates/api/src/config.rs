//! API server configuration

use anyhow::Result;
use smsgate_core::config::CoreConfig;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub core: CoreConfig,
    pub host: String,
    pub port: u16,
    pub cors_allowed_origin: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let core = CoreConfig::from_env()?;

        Ok(Self {
            core,
            host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()?,
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN").unwrap_or_else(|_| "*".into()),
        })
    }
}
