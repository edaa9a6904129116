//! FSM state double

use async_trait::async_trait;
use parley_behaviour::{ControlSignal, HandlerError, State};
use parley_mesh::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A state that records every message and answers from a script
///
/// By default it stays. A message whose body was scripted with
/// [`on_body`](Self::on_body) gets that signal instead, and a body scripted
/// with [`fail_on`](Self::fail_on) makes the handler fail. Clones share the
/// record, so a test can keep one while the machine owns another.
#[derive(Debug, Clone)]
pub struct RecordingState {
    name: String,
    script: HashMap<String, ControlSignal>,
    failing: Vec<String>,
    received: Arc<Mutex<Vec<Message>>>,
    entered: Arc<Mutex<usize>>,
}

impl RecordingState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: HashMap::new(),
            failing: Vec::new(),
            received: Arc::new(Mutex::new(Vec::new())),
            entered: Arc::new(Mutex::new(0)),
        }
    }

    /// Answer `signal` to messages with this body
    pub fn on_body(mut self, body: impl Into<String>, signal: ControlSignal) -> Self {
        self.script.insert(body.into(), signal);
        self
    }

    /// Fail on messages with this body
    pub fn fail_on(mut self, body: impl Into<String>) -> Self {
        self.failing.push(body.into());
        self
    }

    /// Messages received so far
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    /// Bodies received so far
    pub fn bodies(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    /// Times the machine entered this state
    pub fn enter_count(&self) -> usize {
        *self.entered.lock().unwrap()
    }
}

#[async_trait]
impl<C: Send> State<C> for RecordingState {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_enter(&mut self, _ctx: &mut C) -> Result<(), HandlerError> {
        *self.entered.lock().unwrap() += 1;
        Ok(())
    }

    async fn on_message(
        &mut self,
        _ctx: &mut C,
        message: Message,
    ) -> Result<ControlSignal, HandlerError> {
        let body = message.body.clone();
        self.received.lock().unwrap().push(message);

        if self.failing.contains(&body) {
            return Err(HandlerError::rejected(format!("scripted failure on '{body}'")));
        }
        Ok(self
            .script
            .get(&body)
            .cloned()
            .unwrap_or(ControlSignal::Stay))
    }
}
