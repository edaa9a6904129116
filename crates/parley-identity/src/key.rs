//! Cache keys and internal identities

use serde::{Deserialize, Serialize};
use std::fmt;

/// External user as seen by one messaging platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    platform: String,
    user: String,
}

impl CacheKey {
    pub fn new(platform: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            user: user.into(),
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.platform, self.user)
    }
}

/// Internal user id assigned by the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        assert_eq!(CacheKey::new("telegram", "42").to_string(), "telegram_42");
    }

    #[test]
    fn test_keys_differ_by_platform() {
        assert_ne!(CacheKey::new("telegram", "42"), CacheKey::new("discord", "42"));
    }

    #[test]
    fn test_identity_serializes_as_string() {
        let json = serde_json::to_string(&Identity::new("u-7")).unwrap();
        assert_eq!(json, "\"u-7\"");
    }
}
