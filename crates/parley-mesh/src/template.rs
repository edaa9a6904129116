//! Content-based routing predicates
//!
//! A [`Template`] is a disjunction of clause sets. A clause set matches a
//! message when every metadata clause holds and, if set, the recipient and
//! sender agree. An empty template matches everything.

use std::ops::BitOr;

use crate::message::{Message, fields};
use crate::types::AgentId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Clauses {
    to: Option<AgentId>,
    sender: Option<AgentId>,
    metadata: Vec<(String, String)>,
}

impl Clauses {
    fn matches(&self, message: &Message) -> bool {
        if let Some(to) = &self.to
            && &message.to != to
        {
            return false;
        }

        if let Some(sender) = &self.sender {
            let stamped = message.get_metadata(fields::SENDER);
            let transport = message.from.as_ref().map(AgentId::as_str);
            if stamped != Some(sender.as_str()) && transport != Some(sender.as_str()) {
                return false;
            }
        }

        self.metadata
            .iter()
            .all(|(key, value)| message.get_metadata(key) == Some(value.as_str()))
    }
}

/// Routing predicate evaluated against inbound messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    branches: Vec<Clauses>,
}

impl Default for Template {
    fn default() -> Self {
        Self::any()
    }
}

impl Template {
    /// A template that matches every message
    pub fn any() -> Self {
        Self {
            branches: vec![Clauses::default()],
        }
    }

    /// Match replies carrying exactly this correlation token
    pub fn correlation(token: impl Into<String>) -> Self {
        Self::any().with_metadata(fields::REQUEST_CODE, token)
    }

    /// Require a metadata field to equal `value`
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        for branch in &mut self.branches {
            branch.metadata.push((key.clone(), value.clone()));
        }
        self
    }

    /// Require the message recipient
    pub fn with_recipient(mut self, to: AgentId) -> Self {
        for branch in &mut self.branches {
            branch.to = Some(to.clone());
        }
        self
    }

    /// Require the sender, checked against the `sender` stamp or the transport sender
    pub fn with_sender(mut self, sender: AgentId) -> Self {
        for branch in &mut self.branches {
            branch.sender = Some(sender.clone());
        }
        self
    }

    /// Combine two templates: the result matches when either does
    pub fn or(mut self, other: Template) -> Self {
        self.branches.extend(other.branches);
        self
    }

    /// Evaluate the template. Pure, no side effects.
    pub fn matches(&self, message: &Message) -> bool {
        self.branches.iter().any(|branch| branch.matches(message))
    }
}

impl BitOr for Template {
    type Output = Template;

    fn bitor(self, rhs: Template) -> Template {
        self.or(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Performative;
    use proptest::prelude::*;

    fn msg_to(to: &str) -> Message {
        Message::new(AgentId::new_unchecked(to), "body")
    }

    #[test]
    fn test_empty_template_matches_everything() {
        assert!(Template::any().matches(&msg_to("a")));
    }

    #[test]
    fn test_metadata_clauses_are_conjunctive() {
        let template = Template::any()
            .with_metadata("performative", "request")
            .with_metadata("topic", "registration");

        let both = msg_to("a")
            .with_performative(Performative::Request)
            .with_metadata("topic", "registration");
        let one = msg_to("a").with_performative(Performative::Request);

        assert!(template.matches(&both));
        assert!(!template.matches(&one));
    }

    #[test]
    fn test_recipient_clause() {
        let template = Template::any().with_recipient(AgentId::new_unchecked("gateway"));
        assert!(template.matches(&msg_to("gateway")));
        assert!(!template.matches(&msg_to("registry")));
    }

    #[test]
    fn test_sender_clause_accepts_stamp_or_transport() {
        let template = Template::any().with_sender(AgentId::new_unchecked("telegram"));

        let stamped = msg_to("gateway").with_metadata(fields::SENDER, "telegram");
        let mut transport = msg_to("gateway");
        transport.from = Some(AgentId::new_unchecked("telegram"));
        let other = msg_to("gateway").with_sender(AgentId::new_unchecked("webchat"));

        assert!(template.matches(&stamped));
        assert!(template.matches(&transport));
        assert!(!template.matches(&other));
    }

    #[test]
    fn test_or_combination() {
        let telegram = Template::any().with_sender(AgentId::new_unchecked("telegram"));
        let webchat = Template::any().with_sender(AgentId::new_unchecked("webchat"));
        let either = telegram | webchat;

        assert!(either.matches(&msg_to("g").with_sender(AgentId::new_unchecked("webchat"))));
        assert!(either.matches(&msg_to("g").with_sender(AgentId::new_unchecked("telegram"))));
        assert!(!either.matches(&msg_to("g").with_sender(AgentId::new_unchecked("slack"))));
    }

    #[test]
    fn test_correlation_template() {
        let template = Template::correlation("tok-1");
        assert!(template.matches(&msg_to("g").with_metadata(fields::REQUEST_CODE, "tok-1")));
        assert!(!template.matches(&msg_to("g").with_metadata(fields::REQUEST_CODE, "tok-2")));
        assert!(!template.matches(&msg_to("g")));
    }

    proptest! {
        #[test]
        fn prop_or_is_union(
            key in "[a-z]{1,8}",
            a in "[a-z0-9]{1,8}",
            b in "[a-z0-9]{1,8}",
            actual in "[a-z0-9]{1,8}",
        ) {
            let ta = Template::any().with_metadata(key.clone(), a.clone());
            let tb = Template::any().with_metadata(key.clone(), b.clone());
            let message = msg_to("g").with_metadata(key, actual);

            let union = ta.clone().or(tb.clone());
            prop_assert_eq!(union.matches(&message), ta.matches(&message) || tb.matches(&message));
        }

        #[test]
        fn prop_matching_is_pure(value in "[a-z0-9]{0,12}") {
            let template = Template::correlation("fixed");
            let message = msg_to("g").with_metadata(fields::REQUEST_CODE, value);
            let first = template.matches(&message);
            prop_assert_eq!(first, template.matches(&message));
        }
    }
}
