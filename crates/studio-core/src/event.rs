//! Broadcasting of state transitions.
//!
//! ## Learning: Observer Pattern in Rust
//!
//! Every action the reducer applies is also broadcast here, so views can
//! subscribe to state transitions without holding references into the
//! studio. `tokio::sync::broadcast` gives each subscriber its own copy.

use crate::action::Action;
use tokio::sync::broadcast;

/// Event bus for state transition records.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Action>,
}

impl EventBus {
    /// Creates a new event bus.
    pub fn new() -> Self {
        // Capacity of 256 actions in the buffer
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Emits an action to all subscribers.
    pub fn emit(&self, action: Action) {
        // No receivers is fine
        let _ = self.sender.send(action);
    }

    /// Subscribes to actions.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper for consuming actions asynchronously.
///
/// ## Example
///
/// ```ignore
/// let mut handler = EventHandler::new(studio.subscribe());
///
/// tokio::spawn(async move {
///     while let Some(action) = handler.next().await {
///         if let Action::SaveFailed(message) = action {
///             // show a toast
///         }
///     }
/// });
/// ```
pub struct EventHandler {
    receiver: broadcast::Receiver<Action>,
}

impl EventHandler {
    pub fn new(receiver: broadcast::Receiver<Action>) -> Self {
        Self { receiver }
    }

    /// Waits for the next action.
    pub async fn next(&mut self) -> Option<Action> {
        loop {
            match self.receiver.recv().await {
                Ok(action) => return Some(action),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event handler lagged, missed {} actions", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
