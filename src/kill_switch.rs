//! Process-wide cancellation signal.
//!
//! A single `Arc<AtomicBool>` plus a `tokio::sync::Notify` so any
//! approval wait or retry backoff can wake on the flip without polling —
//! dependency-free and cheap to clone across an executor's internals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct KillSwitch {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
    reason: Arc<std::sync::Mutex<Option<String>>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            reason: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Idempotent: triggering twice keeps the first reason.
    pub fn trigger(&self, reason: impl Into<String>) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            *self.reason.lock().unwrap() = Some(reason.into());
        }
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap().clone()
    }

    /// Clears the flag — called at session start and end.
    pub fn reset(&self) {
        self.triggered.store(false, Ordering::SeqCst);
        *self.reason.lock().unwrap() = None;
    }

    /// Resolves once the switch is triggered; resolves immediately if it
    /// already was. Used to race against a tool call or approval wait.
    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_trigger_and_reason() {
        let ks = KillSwitch::new();
        ks.trigger("user requested stop");
        assert!(ks.is_triggered());
        ks.reset();
        assert!(!ks.is_triggered());
        assert!(ks.reason().is_none());
    }

    #[test]
    fn first_trigger_reason_wins() {
        let ks = KillSwitch::new();
        ks.trigger("first");
        ks.trigger("second");
        assert_eq!(ks.reason().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn wait_resolves_after_trigger_from_another_task() {
        let ks = KillSwitch::new();
        let ks2 = ks.clone();
        let handle = tokio::spawn(async move {
            ks2.wait().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ks.trigger("stop");
        tokio::time::timeout(std::time::Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
