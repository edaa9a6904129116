//! Message fixtures

use parley_mesh::{AgentId, Message, Performative, fields};

/// Agent id from a literal
pub fn agent(name: &str) -> AgentId {
    AgentId::new_unchecked(name)
}

/// A `request` from `from` to `to` carrying `token`
pub fn request(from: &str, to: &str, token: &str, body: &str) -> Message {
    Message::new(agent(to), body)
        .with_sender(agent(from))
        .with_performative(Performative::Request)
        .with_metadata(fields::REQUEST_CODE, token)
}

/// A reply from `from` to `to` answering `token`
pub fn reply(from: &str, to: &str, token: &str, performative: Performative, body: &str) -> Message {
    Message::new(agent(to), body)
        .with_sender(agent(from))
        .with_performative(performative)
        .with_metadata(fields::REQUEST_CODE, token)
}

/// An inbound chat event as a platform gateway sees it
pub fn chat_event(gateway: &str, platform: &str, user: &str, text: &str) -> Message {
    Message::new(agent(gateway), text)
        .with_metadata("platform", platform)
        .with_metadata("user", user)
}
