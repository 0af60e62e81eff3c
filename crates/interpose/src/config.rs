//! Process-wide proxy configuration
//!
//! Defaults can come from the environment or from a section of the host's
//! own configuration file:
//!
//! ```toml
//! [interpose]
//! async_policy = "wait"
//! trace_dispatch = true
//! ```
//!
//! | Variable                   | Values           |
//! |----------------------------|------------------|
//! | `INTERPOSE_ASYNC_POLICY`   | `throw`, `wait`  |
//! | `INTERPOSE_TRACE_DISPATCH` | `1`, `true`      |

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::handler::AsyncPolicy;

/// Environment variable selecting the default async policy
pub const ENV_ASYNC_POLICY: &str = "INTERPOSE_ASYNC_POLICY";

/// Environment variable enabling per-dispatch trace events
pub const ENV_TRACE_DISPATCH: &str = "INTERPOSE_TRACE_DISPATCH";

static GLOBAL: Lazy<ProxyConfig> = Lazy::new(ProxyConfig::from_env);

/// Proxy defaults
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Policy new handlers start with
    pub async_policy: AsyncPolicy,
    /// Emit a trace event for every intercepted call
    pub trace_dispatch: bool,
}

impl ProxyConfig {
    /// Configuration read from the environment once per process
    pub fn global() -> &'static ProxyConfig {
        &GLOBAL
    }

    /// Read configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through a variable lookup; bad values keep defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ProxyConfig::default();

        if let Some(raw) = lookup(ENV_ASYNC_POLICY) {
            match raw.parse() {
                Ok(policy) => config.async_policy = policy,
                Err(e) => tracing::warn!("{}: {}, using {}", ENV_ASYNC_POLICY, e, config.async_policy),
            }
        }

        if let Some(raw) = lookup(ENV_TRACE_DISPATCH) {
            config.trace_dispatch = matches!(raw.trim(), "1" | "true" | "yes");
        }

        config
    }
}
