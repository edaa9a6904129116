//! Message envelope exchanged between agents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::types::AgentId;

/// Metadata field names with a meaning to the runtime
pub mod fields {
    /// Intent of the message, one of the [`Performative`](super::Performative) wire values
    pub const PERFORMATIVE: &str = "performative";
    /// Sender address, stamped explicitly because transport-level sender matching is unreliable
    pub const SENDER: &str = "sender";
    /// Correlation token of a request, echoed on its reply
    pub const REQUEST_CODE: &str = "request_code";
    /// Free-text failure reason, only present on `failure` replies
    pub const FAIL_MESSAGE: &str = "fail_message";
}

/// Closed vocabulary describing the intent of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Performative {
    /// Ask another agent for information or for an action
    Request,
    /// Communicate a piece of information carried in the message
    Inform,
    /// The requested action succeeded; the result is in the body
    InformResult,
    /// The requested action failed; the reason is in `fail_message`
    Failure,
}

impl Performative {
    /// Wire representation stored under [`fields::PERFORMATIVE`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Performative::Request => "request",
            Performative::Inform => "inform",
            Performative::InformResult => "inform-result",
            Performative::Failure => "failure",
        }
    }

    /// Parse a wire value. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "request" => Some(Performative::Request),
            "inform" => Some(Performative::Inform),
            "inform-result" => Some(Performative::InformResult),
            "failure" => Some(Performative::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new random message ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the message ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message metadata
pub type MessageMetadata = HashMap<String, String>;

/// A point-to-point message sent between agents
///
/// Messages are immutable once handed to the mesh: every builder method
/// consumes and returns the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,
    /// Transport-level sender, `None` for messages injected by the host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<AgentId>,
    /// Recipient agent
    pub to: AgentId,
    /// Free-form body
    pub body: String,
    /// Routing and protocol metadata
    #[serde(default)]
    pub metadata: MessageMetadata,
    /// Timestamp when the message was created
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message addressed to `to`
    pub fn new(to: AgentId, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            from: None,
            to,
            body: body.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Set the transport-level sender and stamp the `sender` metadata field
    pub fn with_sender(mut self, from: AgentId) -> Self {
        self.metadata
            .insert(fields::SENDER.to_string(), from.as_str().to_string());
        self.from = Some(from);
        self
    }

    /// Set the performative
    pub fn with_performative(self, performative: Performative) -> Self {
        self.with_metadata(fields::PERFORMATIVE, performative.as_str())
    }

    /// Add metadata to the message
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge several metadata entries, overwriting existing keys
    pub fn with_metadata_map<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Redirect the message to another recipient, keeping body and metadata
    pub fn forward_to(mut self, to: AgentId, via: AgentId) -> Self {
        self.id = MessageId::new();
        self.to = to;
        self.timestamp = Utc::now();
        self.with_sender(via)
    }

    /// Get metadata value by key
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// Raw performative value, if any
    pub fn performative_raw(&self) -> Option<&str> {
        self.get_metadata(fields::PERFORMATIVE)
    }

    /// Parsed performative; `None` when absent or not part of the vocabulary
    pub fn performative(&self) -> Option<Performative> {
        self.performative_raw().and_then(Performative::parse)
    }

    /// Correlation token of a request or reply
    pub fn request_code(&self) -> Option<&str> {
        self.get_metadata(fields::REQUEST_CODE)
    }

    /// Failure reason carried by a `failure` reply
    pub fn fail_message(&self) -> Option<&str> {
        self.get_metadata(fields::FAIL_MESSAGE)
    }

    /// Address replies should go to: the `sender` metadata field, else the transport sender
    pub fn reply_address(&self) -> Option<AgentId> {
        self.get_metadata(fields::SENDER)
            .and_then(|s| AgentId::parse(s).ok())
            .or_else(|| self.from.clone())
    }

    /// Build a reply to this message.
    ///
    /// The reply is addressed to [`reply_address`](Self::reply_address), carries the same
    /// `request_code` and is stamped with `from` as sender. Returns `None` when the
    /// message has no usable sender.
    pub fn reply(
        &self,
        from: AgentId,
        performative: Performative,
        body: impl Into<String>,
    ) -> Option<Message> {
        let to = self.reply_address()?;
        let mut reply = Message::new(to, body)
            .with_sender(from)
            .with_performative(performative);
        if let Some(code) = self.request_code() {
            reply = reply.with_metadata(fields::REQUEST_CODE, code);
        }
        Some(reply)
    }

    /// Build a `failure` reply carrying `reason` in `fail_message`
    pub fn failure_reply(&self, from: AgentId, reason: impl Into<String>) -> Option<Message> {
        self.reply(from, Performative::Failure, "")
            .map(|m| m.with_metadata(fields::FAIL_MESSAGE, reason))
    }

    /// Serialize message to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
