//! Where the client engine reports what happened.
//!
//! Every engine event becomes exactly one human-readable line passed to
//! [`UiSink::print`].

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

/// Receives one status line per engine event.
pub trait UiSink: Send + Sync {
    fn print(&self, line: &str);
}

/// Keeps every printed line in memory.
///
/// Push deliveries land from the listener task, so callers that need to
/// observe them can [`wait_for`](MemorySink::wait_for) a line.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    notify: Notify,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.lines.lock().ok().and_then(|l| l.last().cloned())
    }

    pub fn contains(&self, line: &str) -> bool {
        self.lines
            .lock()
            .map(|l| l.iter().any(|x| x == line))
            .unwrap_or(false)
    }

    /// Wait until `line` has been printed, up to `timeout`.
    pub async fn wait_for(&self, line: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.contains(line) {
                return true;
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return self.contains(line);
            }
        }
    }
}

impl UiSink for MemorySink {
    fn print(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
        self.notify.notify_waiters();
    }
}
