//! Chat platform adapters

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Text shown to a user whenever a request failed, whatever the cause
pub const GENERIC_ERROR: &str = "Something went wrong, please try again later.";

/// Outbound side of a messaging platform
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Platform name used in cache keys
    fn name(&self) -> &str;

    async fn send_text(&self, user: &str, text: &str);

    /// Show a "typing" indicator. Must be safe to call repeatedly.
    async fn send_typing(&self, user: &str);
}

/// Writes everything to stdout and counts the texts it sent
pub struct ConsoleChat {
    name: String,
    sent: AtomicUsize,
    notify: Notify,
}

impl ConsoleChat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` texts went out; false on timeout
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.sent() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl ChatPlatform for ConsoleChat {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_text(&self, user: &str, text: &str) {
        println!("[{}] -> {user}: {text}", self.name);
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn send_typing(&self, user: &str) {
        println!("[{}] -> {user}: ...", self.name);
    }
}
