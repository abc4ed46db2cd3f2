//! Subscriber installation for the dispatch stack.
//!
//! Events come from two targets: `rpcdispatch_core` (backoff and retry
//! decisions) and `rpcdispatch_http` (transport calls and batch flushes).
//! `RUST_LOG`, when set, wins over the configured levels.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::RpcError;

const RETRY_TARGET: &str = "rpcdispatch_core";
const TRANSPORT_TARGET: &str = "rpcdispatch_http";

/// Logging section of a client config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for everything without a more specific setting.
    #[serde(default = "default_level")]
    pub level: String,
    /// Level for retry and backoff events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<String>,
    /// Level for transport and batcher events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            retry: None,
            transport: None,
            json: false,
        }
    }
}

impl LogConfig {
    /// Reject anything that is not `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub fn validate(&self) -> Result<(), RpcError> {
        let levels = [Some(&self.level), self.retry.as_ref(), self.transport.as_ref()];
        for level in levels.into_iter().flatten() {
            LevelFilter::from_str(level)
                .map_err(|_| RpcError::InvalidConfig(format!("unknown log level `{level}`")))?;
        }
        Ok(())
    }

    /// Filter directives, e.g. `"warn,rpcdispatch_core=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        if let Some(level) = &self.retry {
            directives.push_str(&format!(",{RETRY_TARGET}={level}"));
        }
        if let Some(level) = &self.transport {
            directives.push_str(&format!(",{TRANSPORT_TARGET}={level}"));
        }
        directives
    }

    fn filter(&self) -> Result<EnvFilter, RpcError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        self.validate()?;
        EnvFilter::try_new(self.directives()).map_err(|e| RpcError::InvalidConfig(e.to_string()))
    }
}

/// Install a global subscriber for `config`.
///
/// Returns `Ok(false)` when another subscriber was installed first; that
/// one stays in place.
pub fn init_tracing(config: &LogConfig) -> Result<bool, RpcError> {
    let filter = config.filter()?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    Ok(installed.is_ok())
}
