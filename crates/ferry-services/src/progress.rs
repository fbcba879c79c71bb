//! Transfer progress callbacks and transfer event notifications.
//!
//! Progress: a `ProgressHook` attached to a `TransferRequest` is called
//! after every plaintext write with the running total. Every chunk of a
//! parallel upload feeds the same counter, so the hook may be called from
//! several tasks at once.
//!
//! Events: the engine publishes one `TransferEvent` per finished attempt on
//! a broadcast channel. Subscribers that fall behind lose the oldest events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use ferry_core::Result;

/// Events buffered per subscriber before the oldest are dropped.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Plaintext bytes moved so far.
    pub transferred: u64,
    /// Bytes expected in total, when known up front (uploads).
    pub total: Option<u64>,
}

impl TransferProgress {
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some(self.transferred as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

type Callback = dyn Fn(TransferProgress) + Send + Sync;

#[derive(Clone)]
pub struct ProgressHook(Arc<Callback>);

impl ProgressHook {
    pub fn new(callback: impl Fn(TransferProgress) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }
}

impl fmt::Debug for ProgressHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressHook")
    }
}

/// Running byte count for one transfer. Clones share the count.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    hook: ProgressHook,
    total: Option<u64>,
    done: Arc<AtomicU64>,
}

impl ProgressTracker {
    pub fn new(hook: ProgressHook, total: Option<u64>) -> Self {
        Self {
            hook,
            total,
            done: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, bytes: u64) {
        let transferred = self.done.fetch_add(bytes, Ordering::Relaxed) + bytes;
        (self.hook.0)(TransferProgress {
            transferred,
            total: self.total,
        });
    }

    pub fn transferred(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    pub action: &'static str,
    pub identifier: String,
    /// "ok", "partial", or the error kind.
    pub status: &'static str,
    pub error: Option<String>,
}

/// Log one finished attempt and publish it to subscribers.
pub(crate) fn record<T>(
    events: &broadcast::Sender<TransferEvent>,
    action: &'static str,
    identifier: &str,
    outcome: &Result<T>,
) {
    let event = match outcome {
        Ok(_) => {
            tracing::info!(action, identifier, status = "ok", "transfer attempt finished");
            TransferEvent {
                action,
                identifier: identifier.to_string(),
                status: "ok",
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(
                action,
                identifier,
                status = e.kind(),
                error = %e,
                "transfer attempt failed"
            );
            TransferEvent {
                action,
                identifier: identifier.to_string(),
                status: e.kind(),
                error: Some(e.to_string()),
            }
        }
    };
    // No subscribers is the common case.
    let _ = events.send(event);
}
