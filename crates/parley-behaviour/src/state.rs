//! States and the control signal their handlers return

use async_trait::async_trait;
use parley_mesh::Message;

use crate::error::HandlerError;

/// What the machine does after a handler returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// Remain in the current state
    Stay,
    /// Move to the named state; the edge must have been declared
    GoTo(String),
}

impl ControlSignal {
    pub fn go_to(state: impl Into<String>) -> Self {
        ControlSignal::GoTo(state.into())
    }
}

/// One node of a behaviour's state machine
///
/// `C` is the context owned by the behaviour and lent to every handler call,
/// so states can share data without locks.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use parley_behaviour::{ControlSignal, HandlerError, State};
/// use parley_mesh::Message;
///
/// struct Echo;
///
/// #[async_trait]
/// impl State<Vec<String>> for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     async fn on_message(
///         &mut self,
///         seen: &mut Vec<String>,
///         message: Message,
///     ) -> Result<ControlSignal, HandlerError> {
///         seen.push(message.body);
///         Ok(ControlSignal::Stay)
///     }
/// }
/// ```
#[async_trait]
pub trait State<C>: Send
where
    C: Send,
{
    /// Name the state is registered under
    fn name(&self) -> &str;

    /// Called each time the machine enters this state, including the start
    async fn on_enter(&mut self, _ctx: &mut C) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Handle one message
    async fn on_message(
        &mut self,
        ctx: &mut C,
        message: Message,
    ) -> Result<ControlSignal, HandlerError>;
}
