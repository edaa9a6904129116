//! Finite-state machine dispatcher
//!
//! An [`Fsm`] owns a set of named states and the declared edges between them.
//! It hands each message to the current state's handler and applies the
//! returned [`ControlSignal`]. Exactly one handler runs at a time.

use futures::FutureExt;
use parley_mesh::{Inbox, Message};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    error::{BehaviourError, BehaviourResult},
    state::{ControlSignal, State},
};

/// What a single dispatch did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// The handler asked to stay
    Stayed,
    /// The machine moved along a declared edge
    Moved { from: String, to: String },
    /// The handler failed or panicked; the machine stayed
    HandlerFailed,
}

/// State machine driving one agent's behaviour
pub struct Fsm<C: Send> {
    name: String,
    states: HashMap<String, Box<dyn State<C>>>,
    transitions: HashSet<(String, String)>,
    initial: Option<String>,
    current: Option<String>,
}

impl<C: Send> std::fmt::Debug for Fsm<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fsm")
            .field("name", &self.name)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("initial", &self.initial)
            .field("current", &self.current)
            .finish()
    }
}

impl<C: Send> Fsm<C> {
    /// Create an empty machine; `name` labels its log lines
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: HashMap::new(),
            transitions: HashSet::new(),
            initial: None,
            current: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a state, optionally as the entry state
    pub fn add_state<S>(&mut self, state: S, initial: bool) -> BehaviourResult<()>
    where
        S: State<C> + 'static,
    {
        let name = state.name().to_string();
        if self.states.contains_key(&name) {
            return Err(BehaviourError::DuplicateState(name));
        }
        if initial {
            if let Some(existing) = &self.initial {
                return Err(BehaviourError::InitialAlreadySet(existing.clone()));
            }
            self.initial = Some(name.clone());
        }
        self.states.insert(name, Box::new(state));
        Ok(())
    }

    fn require_state(&self, name: &str) -> BehaviourResult<()> {
        if self.states.contains_key(name) {
            Ok(())
        } else {
            Err(BehaviourError::UnknownState(name.to_string()))
        }
    }

    /// Declare the edge `from -> to`. Both states must exist.
    pub fn add_transition(&mut self, from: &str, to: &str) -> BehaviourResult<()> {
        self.require_state(from)?;
        self.require_state(to)?;
        self.transitions.insert((from.to_string(), to.to_string()));
        Ok(())
    }

    /// Declare `s0 -> s1 -> ... -> sn`, without self-loops
    pub fn add_chain_transitions(&mut self, states: &[&str]) -> BehaviourResult<()> {
        if states.len() < 2 {
            return Err(BehaviourError::InvalidWiring(format!(
                "a chain needs at least two states, got {}",
                states.len()
            )));
        }
        for pair in states.windows(2) {
            self.add_transition(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Declare a waterfall over `initial` followed by `ordered`
    ///
    /// Every state may move to any state after it. With
    /// `every_state_self_transition` each state also gets a self-loop, and with
    /// `last_to_initial` the last state may move back to `initial`.
    pub fn add_waterfall_transitions(
        &mut self,
        initial: &str,
        ordered: &[&str],
        every_state_self_transition: bool,
        last_to_initial: bool,
    ) -> BehaviourResult<()> {
        let all: Vec<&str> = std::iter::once(initial)
            .chain(ordered.iter().copied())
            .collect();
        for name in &all {
            self.require_state(name)?;
        }

        for (index, from) in all.iter().enumerate() {
            for to in &ordered[index.min(ordered.len())..] {
                self.add_transition(from, to)?;
            }
            if every_state_self_transition {
                self.add_transition(from, from)?;
            }
        }

        if last_to_initial && let Some(last) = all.last() {
            self.add_transition(last, initial)?;
        }
        Ok(())
    }

    /// Waterfall with self-loops and the return edge to `initial`
    pub fn add_default_waterfall(
        &mut self,
        initial: &str,
        ordered: &[&str],
    ) -> BehaviourResult<()> {
        self.add_waterfall_transitions(initial, ordered, true, true)
    }

    /// Whether the edge `from -> to` was declared
    pub fn has_transition(&self, from: &str, to: &str) -> bool {
        self.transitions
            .contains(&(from.to_string(), to.to_string()))
    }

    /// Number of declared edges
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// State the machine is in, once started
    pub fn current_state(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Enter the initial state. Called implicitly by the first dispatch.
    pub async fn start(&mut self, ctx: &mut C) -> BehaviourResult<()> {
        if self.current.is_some() {
            return Ok(());
        }
        let initial = self.initial.clone().ok_or(BehaviourError::NoInitialState)?;
        info!(fsm = %self.name, state = %initial, "Behaviour started");
        self.enter(ctx, initial).await
    }

    async fn enter(&mut self, ctx: &mut C, name: String) -> BehaviourResult<()> {
        let state = self
            .states
            .get_mut(&name)
            .ok_or_else(|| BehaviourError::UnknownState(name.clone()))?;

        match AssertUnwindSafe(state.on_enter(ctx)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(fsm = %self.name, state = %name, error = %e, "State entry failed"),
            Err(panic) => error!(
                fsm = %self.name,
                state = %name,
                panic = %panic_message(panic.as_ref()),
                "State entry panicked"
            ),
        }
        self.current = Some(name);
        Ok(())
    }

    /// Hand one message to the current state
    ///
    /// Handler errors and panics are logged and leave the state unchanged.
    ///
    /// # Errors
    ///
    /// `BehaviourError::InvalidTransition` when the handler asks for an undeclared
    /// edge. The machine stays where it was, but the caller should treat the
    /// behaviour as broken.
    pub async fn dispatch(&mut self, ctx: &mut C, message: Message) -> BehaviourResult<Dispatched> {
        self.start(ctx).await?;
        let current = self.current.clone().ok_or(BehaviourError::NoInitialState)?;
        let state = self
            .states
            .get_mut(&current)
            .ok_or_else(|| BehaviourError::UnknownState(current.clone()))?;

        debug!(fsm = %self.name, state = %current, id = %message.id, "Dispatching message");

        let signal = match AssertUnwindSafe(state.on_message(ctx, message))
            .catch_unwind()
            .await
        {
            Ok(Ok(signal)) => signal,
            Ok(Err(e)) => {
                error!(
                    fsm = %self.name,
                    state = %current,
                    error = %e,
                    "Handler failed, staying in state"
                );
                return Ok(Dispatched::HandlerFailed);
            }
            Err(panic) => {
                error!(
                    fsm = %self.name,
                    state = %current,
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked, staying in state"
                );
                return Ok(Dispatched::HandlerFailed);
            }
        };

        match signal {
            ControlSignal::Stay => Ok(Dispatched::Stayed),
            ControlSignal::GoTo(next) => {
                if !self.has_transition(&current, &next) {
                    error!(fsm = %self.name, from = %current, to = %next, "Invalid transition");
                    return Err(BehaviourError::InvalidTransition {
                        from: current,
                        to: next,
                    });
                }
                debug!(fsm = %self.name, from = %current, to = %next, "Transition");
                self.enter(ctx, next.clone()).await?;
                Ok(Dispatched::Moved {
                    from: current,
                    to: next,
                })
            }
        }
    }

    /// Dispatch messages from `inbox` until cancelled or the inbox closes
    ///
    /// Waiting for a message never polls; the loop sleeps until one arrives.
    pub async fn run(
        &mut self,
        ctx: &mut C,
        inbox: &mut Inbox,
        cancel: &CancellationToken,
    ) -> BehaviourResult<()> {
        self.start(ctx).await?;
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(fsm = %self.name, "Behaviour cancelled");
                    return Ok(());
                }
                message = inbox.receive(None) => message,
            };

            let Some(message) = message else {
                info!(fsm = %self.name, "Inbox closed, behaviour stopping");
                return Ok(());
            };
            self.dispatch(ctx, message).await?;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use async_trait::async_trait;
    use parley_mesh::AgentId;
    use rstest::rstest;

    /// Records bodies and obeys the signal encoded in the message body
    struct Scripted {
        name: &'static str,
    }

    #[async_trait]
    impl State<Vec<String>> for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_enter(&mut self, log: &mut Vec<String>) -> Result<(), HandlerError> {
            log.push(format!("enter:{}", self.name));
            Ok(())
        }

        async fn on_message(
            &mut self,
            log: &mut Vec<String>,
            message: Message,
        ) -> Result<ControlSignal, HandlerError> {
            log.push(format!("{}:{}", self.name, message.body));
            match message.body.as_str() {
                "fail" => Err(HandlerError::rejected("scripted failure")),
                "panic" => panic!("scripted panic"),
                body => match body.strip_prefix("goto:") {
                    Some(next) => Ok(ControlSignal::go_to(next)),
                    None => Ok(ControlSignal::Stay),
                },
            }
        }
    }

    fn msg(body: &str) -> Message {
        Message::new(AgentId::new_unchecked("agent"), body)
    }

    fn machine(names: &[&'static str]) -> Fsm<Vec<String>> {
        let mut fsm = Fsm::new("test");
        for (i, name) in names.iter().copied().enumerate() {
            fsm.add_state(Scripted { name }, i == 0).unwrap();
        }
        fsm
    }

    #[tokio::test]
    async fn test_stay_and_goto() {
        let mut fsm = machine(&["idle", "busy"]);
        fsm.add_chain_transitions(&["idle", "busy"]).unwrap();
        let mut log = Vec::new();

        assert_eq!(fsm.dispatch(&mut log, msg("hello")).await.unwrap(), Dispatched::Stayed);
        assert_eq!(fsm.current_state(), Some("idle"));

        let moved = fsm.dispatch(&mut log, msg("goto:busy")).await.unwrap();
        assert_eq!(
            moved,
            Dispatched::Moved {
                from: "idle".into(),
                to: "busy".into()
            }
        );
        assert_eq!(fsm.current_state(), Some("busy"));
        assert_eq!(log, vec!["enter:idle", "idle:hello", "idle:goto:busy", "enter:busy"]);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_fatal() {
        let mut fsm = machine(&["idle", "busy"]);
        let mut log = Vec::new();

        let err = fsm.dispatch(&mut log, msg("goto:busy")).await.unwrap_err();
        assert_eq!(
            err,
            BehaviourError::InvalidTransition {
                from: "idle".into(),
                to: "busy".into()
            }
        );
        assert_eq!(fsm.current_state(), Some("idle"));
    }

    #[tokio::test]
    async fn test_goto_self_needs_edge() {
        let mut fsm = machine(&["idle"]);
        let mut log = Vec::new();
        assert!(fsm.dispatch(&mut log, msg("goto:idle")).await.is_err());

        fsm.add_transition("idle", "idle").unwrap();
        assert!(fsm.dispatch(&mut log, msg("goto:idle")).await.is_ok());
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_stay() {
        let mut fsm = machine(&["idle", "busy"]);
        fsm.add_chain_transitions(&["idle", "busy"]).unwrap();
        let mut log = Vec::new();

        assert_eq!(fsm.dispatch(&mut log, msg("fail")).await.unwrap(), Dispatched::HandlerFailed);
        assert_eq!(fsm.dispatch(&mut log, msg("panic")).await.unwrap(), Dispatched::HandlerFailed);
        assert_eq!(fsm.current_state(), Some("idle"));

        // The machine keeps working afterwards
        assert!(matches!(
            fsm.dispatch(&mut log, msg("goto:busy")).await.unwrap(),
            Dispatched::Moved { .. }
        ));
    }

    #[tokio::test]
    async fn test_no_initial_state() {
        let mut fsm: Fsm<Vec<String>> = Fsm::new("empty");
        fsm.add_state(Scripted { name: "lonely" }, false).unwrap();
        assert_eq!(
            fsm.dispatch(&mut Vec::new(), msg("x")).await.unwrap_err(),
            BehaviourError::NoInitialState
        );
    }

    #[test]
    fn test_wiring_errors() {
        let mut fsm = machine(&["a", "b"]);
        assert_eq!(
            fsm.add_state(Scripted { name: "a" }, false).unwrap_err(),
            BehaviourError::DuplicateState("a".into())
        );
        assert_eq!(
            fsm.add_state(Scripted { name: "c" }, true).unwrap_err(),
            BehaviourError::InitialAlreadySet("a".into())
        );
        assert_eq!(
            fsm.add_transition("a", "ghost").unwrap_err(),
            BehaviourError::UnknownState("ghost".into())
        );
        assert!(matches!(
            fsm.add_chain_transitions(&["a"]),
            Err(BehaviourError::InvalidWiring(_))
        ));
    }

    #[test]
    fn test_chain_has_no_self_loops() {
        let mut fsm = machine(&["a", "b", "c"]);
        fsm.add_chain_transitions(&["a", "b", "c"]).unwrap();
        assert!(fsm.has_transition("a", "b"));
        assert!(fsm.has_transition("b", "c"));
        assert!(!fsm.has_transition("a", "c"));
        assert!(!fsm.has_transition("a", "a"));
        assert_eq!(fsm.transition_count(), 2);
    }

    #[rstest]
    #[case(true, true, 11)]
    #[case(true, false, 10)]
    #[case(false, true, 7)]
    #[case(false, false, 6)]
    fn test_waterfall_edge_count(
        #[case] self_loops: bool,
        #[case] last_to_initial: bool,
        #[case] expected: usize,
    ) {
        // initial -> {b, c, d}, b -> {c, d}, c -> {d}: 6 forward edges
        let mut fsm = machine(&["a", "b", "c", "d"]);
        fsm.add_waterfall_transitions("a", &["b", "c", "d"], self_loops, last_to_initial)
            .unwrap();
        assert_eq!(fsm.transition_count(), expected);
    }

    #[test]
    fn test_default_waterfall_edges() {
        let mut fsm = machine(&["a", "b", "c"]);
        fsm.add_default_waterfall("a", &["b", "c"]).unwrap();

        for (from, to) in [("a", "b"), ("a", "c"), ("b", "c"), ("c", "a")] {
            assert!(fsm.has_transition(from, to), "{from} -> {to}");
        }
        for name in ["a", "b", "c"] {
            assert!(fsm.has_transition(name, name));
        }
        assert!(!fsm.has_transition("c", "b"));
        assert!(!fsm.has_transition("b", "a"));
    }
}
