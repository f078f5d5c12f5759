// ABOUTME: Per-conversation turn serialization keyed by conversation id
// ABOUTME: Owned mutex guards travel with background tasks and clean up their map entry on drop
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-conversation locks serializing turns and summaries
#[derive(Clone, Default)]
pub struct TurnLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    enabled: bool,
}

impl TurnLocks {
    /// Create the lock table; when `enabled` is false every acquire succeeds immediately
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            enabled,
        }
    }

    /// Wait for exclusive access to `conversation_id`
    pub async fn acquire(&self, conversation_id: &str) -> TurnGuard {
        if !self.enabled {
            return TurnGuard {
                guard: None,
                key: String::new(),
                locks: Arc::clone(&self.locks),
            };
        }

        let mutex = Arc::clone(
            self.locks
                .entry(conversation_id.to_owned())
                .or_default()
                .value(),
        );
        let guard = mutex.lock_owned().await;
        TurnGuard {
            guard: Some(guard),
            key: conversation_id.to_owned(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of conversations with a live lock entry
    #[must_use]
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one conversation, released on drop
pub struct TurnGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            // Only the map still references the mutex: nobody holds or awaits it
            self.locks
                .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_conversation_is_serialized() {
        let locks = TurnLocks::new(true);
        let guard = locks.acquire("c1").await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.acquire("c1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_conversations_do_not_block() {
        let locks = TurnLocks::new(true);
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_disabled_locks_never_block() {
        let locks = TurnLocks::new(false);
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("a").await;
        assert_eq!(locks.active(), 0);
    }
}
