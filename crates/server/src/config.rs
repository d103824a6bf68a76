//! Unified configuration for the gateway binary

use anyhow::Result;
use api::RateLimitSettings;
use dispatch::{DispatchConfig, RetentionConfig};
use smsgate_core::config::CoreConfig;
use std::env;
use std::time::Duration;
use store::ScopePolicy;

#[derive(Debug, Clone)]
pub struct UnifiedConfig {
    pub core: CoreConfig,
    pub api: ApiSettings,
    pub dispatch: DispatchConfig,
    pub retention: RetentionConfig,
    pub rate_limits: RateLimitSettings,
    /// How long shutdown waits for workers to finish their current task.
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origin: String,
}

impl UnifiedConfig {
    pub fn from_env() -> Result<Self> {
        let core = CoreConfig::from_env()?;

        let dispatch = DispatchConfig {
            workers: env_parse("DISPATCH_WORKERS", 4)?,
            batch_size: env_parse("DISPATCH_BATCH_SIZE", 32)?,
            tick_interval: Duration::from_millis(env_parse("DISPATCH_TICK_MS", 1_000)?),
            send_timeout: Duration::from_secs(env_parse("SEND_TIMEOUT_SECS", 30)?),
        };

        let retention = RetentionConfig {
            max_age: Duration::from_secs(env_parse("RETENTION_DAYS", 90u64)? * 24 * 3600),
            interval: Duration::from_secs(env_parse("RETENTION_INTERVAL_HOURS", 24u64)? * 3600),
        };

        let mut rate_limits = RateLimitSettings::default();
        if let Ok(limit) = env::var("RATE_LIMIT_IP_PER_HOUR") {
            rate_limits.ip_request = ScopePolicy::new(
                limit.parse()?,
                rate_limits.ip_request.window,
                rate_limits.ip_request.block,
            );
        }
        if let Ok(limit) = env::var("RATE_LIMIT_USER_PER_HOUR") {
            rate_limits.user_request = ScopePolicy::new(
                limit.parse()?,
                rate_limits.user_request.window,
                rate_limits.user_request.block,
            );
        }

        Ok(Self {
            core,
            api: ApiSettings {
                host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
                port: env_parse("API_PORT", 3000u16)?,
                cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN").unwrap_or_else(|_| "*".into()),
            },
            dispatch,
            retention,
            rate_limits,
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS", 10)?),
        })
    }

    pub fn to_api_config(&self) -> api::config::Config {
        api::config::Config {
            core: self.core.clone(),
            host: self.api.host.clone(),
            port: self.api.port,
            cors_allowed_origin: self.api.cors_allowed_origin.clone(),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}
