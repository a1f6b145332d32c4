//! Device-side cart and wishlist state.
//!
//! A guest's items live in a [`LocalStore`]; once a session is observed the
//! items move to the account's server copy exactly once and the local copy is
//! cleared. Signed-in mutations apply locally first and are replayed against
//! the server through a [`SyncQueue`] that backs off on failure.

pub mod cart;
pub mod local;
pub mod wishlist;

use std::{collections::VecDeque, time::Duration};

use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;

pub use cart::{CartManager, CartRemote, ServerCart};
pub use local::{JsonFileStore, LocalStore, MemoryStore, StoreError};
pub use wishlist::{ServerWishlist, WishlistManager, WishlistRemote};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Guest,
    Authenticated(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    Pending { queued_ops: usize },
    Diverged { failed_ops: usize, last_error: String },
}

#[derive(Debug, Error)]
pub enum ClientStateError {
    #[error("local storage: {0}")]
    Store(#[from] StoreError),

    #[error("server: {0}")]
    Remote(#[from] AppError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base × 2^(attempt-1), capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Ordered operations still owed to the server.
#[derive(Debug, Clone)]
pub struct SyncQueue<Op> {
    policy: RetryPolicy,
    pending: VecDeque<Op>,
    attempts: u32,
    last_error: Option<String>,
}

impl<Op: Clone> SyncQueue<Op> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: VecDeque::new(),
            attempts: 0,
            last_error: None,
        }
    }

    pub fn push(&mut self, op: Op) {
        self.pending.push_back(op);
    }

    pub fn front(&self) -> Option<Op> {
        self.pending.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn succeeded(&mut self) {
        self.pending.pop_front();
        self.attempts = 0;
        if self.pending.is_empty() {
            self.last_error = None;
        }
    }

    pub fn failed(&mut self, error: String) {
        self.attempts += 1;
        self.last_error = Some(error);
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn next_delay(&self) -> Duration {
        self.policy.delay(self.attempts)
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.attempts = 0;
        self.last_error = None;
    }

    pub fn status(&self) -> SyncStatus {
        if self.pending.is_empty() {
            SyncStatus::Synced
        } else if self.exhausted() {
            SyncStatus::Diverged {
                failed_ops: self.pending.len(),
                last_error: self.last_error.clone().unwrap_or_default(),
            }
        } else {
            SyncStatus::Pending {
                queued_ops: self.pending.len(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_attempts: 5,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn queue_reports_divergence_after_exhaustion() {
        let mut queue = SyncQueue::new(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });
        assert_eq!(queue.status(), SyncStatus::Synced);

        queue.push("op");
        queue.failed("timeout".into());
        assert_eq!(queue.status(), SyncStatus::Pending { queued_ops: 1 });

        queue.failed("timeout".into());
        assert_eq!(
            queue.status(),
            SyncStatus::Diverged {
                failed_ops: 1,
                last_error: "timeout".into()
            }
        );

        queue.succeeded();
        assert_eq!(queue.status(), SyncStatus::Synced);
    }
}
