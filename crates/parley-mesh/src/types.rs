//! Core type definitions for mesh communication

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for ID validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdValidationError {
    /// The ID string is empty
    Empty,
    /// The ID contains only whitespace
    WhitespaceOnly,
    /// The ID has leading or trailing whitespace
    LeadingTrailingWhitespace,
    /// The ID contains invalid characters
    InvalidCharacters,
}

impl fmt::Display for IdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "ID cannot be empty"),
            Self::WhitespaceOnly => write!(f, "ID cannot be whitespace-only"),
            Self::LeadingTrailingWhitespace => {
                write!(f, "ID cannot have leading or trailing whitespace")
            }
            Self::InvalidCharacters => write!(
                f,
                "ID can only contain alphanumeric characters, hyphens, underscores, and dots"
            ),
        }
    }
}

impl std::error::Error for IdValidationError {}

fn is_valid_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// Unique address of an agent on the mesh
///
/// Valid IDs:
/// - Non-empty
/// - No leading/trailing whitespace
/// - Only ASCII alphanumerics, hyphens, underscores, dots
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Parse and validate an agent ID from a string
    ///
    /// # Examples
    ///
    /// ```
    /// use parley_mesh::AgentId;
    ///
    /// assert!(AgentId::parse("gateway-telegram").is_ok());
    /// assert!(AgentId::parse("user_42").is_ok());
    ///
    /// assert!(AgentId::parse("").is_err());
    /// assert!(AgentId::parse(" gateway").is_err());
    /// assert!(AgentId::parse("agent/path").is_err());
    /// ```
    pub fn parse(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
        let s = id.as_ref();

        if s.is_empty() {
            return Err(IdValidationError::Empty);
        }

        if s.trim().is_empty() {
            return Err(IdValidationError::WhitespaceOnly);
        }

        if s != s.trim() {
            return Err(IdValidationError::LeadingTrailingWhitespace);
        }

        if !s.chars().all(is_valid_id_char) {
            return Err(IdValidationError::InvalidCharacters);
        }

        Ok(Self(s.to_string()))
    }

    /// Create an ID without validation. Intended for constants and tests.
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Compose the address of a per-user worker agent.
    ///
    /// The result is `<prefix>-<identity>` lowercased, with every character that is
    /// not allowed in an agent ID replaced by `_`, so any internal identity maps to
    /// a stable, valid address.
    ///
    /// ```
    /// use parley_mesh::AgentId;
    ///
    /// let id = AgentId::for_worker("user", "Mario Rossi#7").unwrap();
    /// assert_eq!(id.as_str(), "user-mario_rossi_7");
    /// ```
    pub fn for_worker(prefix: &str, identity: &str) -> Result<Self, IdValidationError> {
        let escaped: String = identity
            .chars()
            .map(|c| if is_valid_id_char(c) { c } else { '_' })
            .collect();
        Self::parse(format!("{prefix}-{escaped}").to_lowercase())
    }

    /// Get the agent ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AgentId {
    type Err = IdValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentId {
    type Error = IdValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl From<&str> for AgentId {
    /// Creates an AgentId from a string slice.
    ///
    /// # Panics
    /// Panics if the string fails validation. For non-panicking construction,
    /// use `AgentId::parse()` instead.
    fn from(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|e| panic!("Invalid AgentId '{}': {}", s, e))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
