//! Host configuration loading

use parley_identity::IdentityCacheConfig;
use parley_mesh::{MeshConfig, RequestReplyConfig, SubscriptionConfig};
use parley_observability::ObservabilityConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ParleyError, ParleyResult};

/// Configuration of a parley host
///
/// Every table is optional; a missing table keeps its defaults.
///
/// ```toml
/// [mesh]
/// mailbox_capacity = 256
///
/// [request_reply]
/// default_timeout_ms = 5000
///
/// [identity]
/// max_entries = 50000
/// ttl_secs = 3600
///
/// [observability]
/// filter = "parley=debug,info"
/// format = "pretty"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub mesh: MeshConfig,
    pub request_reply: RequestReplyConfig,
    pub identity: IdentityCacheConfig,
    pub presence: SubscriptionConfig,
    pub observability: ObservabilityConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ParleyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ParleyError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        Self::load_from_toml(&content)
    }

    /// Load configuration from a TOML string and validate it
    pub fn load_from_toml(toml_content: &str) -> ParleyResult<Self> {
        let config: Self = toml::from_str(toml_content)
            .map_err(|e| ParleyError::config(format!("Failed to parse TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> ParleyResult<()> {
        if self.mesh.mailbox_capacity == 0 {
            return Err(ParleyError::config("mesh.mailbox_capacity cannot be zero"));
        }
        if self.request_reply.default_timeout_ms == 0 {
            return Err(ParleyError::config(
                "request_reply.default_timeout_ms cannot be zero",
            ));
        }
        if self.request_reply.max_pending == 0 {
            return Err(ParleyError::config("request_reply.max_pending cannot be zero"));
        }
        if self.identity.max_entries == Some(0) {
            return Err(ParleyError::config("identity.max_entries cannot be zero"));
        }
        if self.identity.ttl_secs == Some(0) {
            return Err(ParleyError::config("identity.ttl_secs cannot be zero"));
        }

        if self.identity.max_entries.is_none() && self.identity.ttl_secs.is_none() {
            tracing::warn!("Identity cache has neither a capacity bound nor a TTL");
        }
        Ok(())
    }
}
