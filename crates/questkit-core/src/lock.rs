//! Process-wide gate for destructive operations.
//!
//! Patching, mod installation and imports all mutate the device and the
//! registry. Only one of them may run at a time; there is no waiter queue, so
//! a second caller is turned away with [`LockError::Busy`] instead of blocking.
//!
//! Acquiring the lock yields an [`OperationGuard`]. Functions that mutate
//! shared state take `&OperationGuard` as proof that the caller owns the lock.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

/// Observable state of the [`OperationLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No operation is running.
    Idle,
    /// An operation is running.
    Locked {
        /// The running operation has taken the device away (e.g. reinstalling the app).
        device_unavailable: bool,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Another operation is already in progress")]
    Busy,
}

/// Single-flight mutual exclusion for destructive operations.
///
/// Cloning yields another handle to the same lock.
#[derive(Debug, Clone)]
pub struct OperationLock {
    state: Arc<watch::Sender<LockState>>,
}

impl Default for OperationLock {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationLock {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LockState::Idle);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn state(&self) -> LockState {
        *self.state.borrow()
    }

    /// Returns `true` when no operation holds the lock.
    pub fn is_free(&self) -> bool {
        self.state() == LockState::Idle
    }

    /// Returns `false` only while an operation that took the device away is running.
    pub fn is_device_available(&self) -> bool {
        !matches!(
            self.state(),
            LockState::Locked {
                device_unavailable: true
            }
        )
    }

    /// Start an operation.
    ///
    /// Not reentrant: a holder calling this again gets [`LockError::Busy`] too.
    pub fn try_start(&self, device_unavailable: bool) -> Result<OperationGuard, LockError> {
        let acquired = self.state.send_if_modified(|state| {
            if *state == LockState::Idle {
                *state = LockState::Locked { device_unavailable };
                true
            } else {
                false
            }
        });

        if !acquired {
            tracing::debug!("Operation lock busy");
            return Err(LockError::Busy);
        }

        tracing::debug!(device_unavailable, "Operation started");
        Ok(OperationGuard {
            lock: self.clone(),
        })
    }

    /// Watch state changes, e.g. to grey out UI while an operation runs.
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.state.subscribe()
    }
}

/// Ownership of the [`OperationLock`]. Dropping it ends the operation.
#[derive(Debug)]
#[must_use = "the operation ends as soon as the guard is dropped"]
pub struct OperationGuard {
    lock: OperationLock,
}

impl OperationGuard {
    /// End the operation explicitly.
    pub fn finish(self) {}

    /// Returns `true` if this guard was issued by `lock`.
    pub fn guards(&self, lock: &OperationLock) -> bool {
        Arc::ptr_eq(&self.lock.state, &lock.state)
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.lock.state.send_replace(LockState::Idle);
        tracing::debug!("Operation finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_start_is_refused() {
        let lock = OperationLock::new();
        assert!(lock.is_free());

        let guard = lock.try_start(false).unwrap();
        assert!(!lock.is_free());
        assert_eq!(lock.try_start(false).unwrap_err(), LockError::Busy);
        assert!(guard.guards(&lock));

        guard.finish();
        assert!(lock.is_free());
        assert!(lock.try_start(true).is_ok());
    }

    #[test]
    fn test_drop_releases_lock() {
        let lock = OperationLock::new();
        {
            let _guard = lock.try_start(true).unwrap();
            assert!(!lock.is_device_available());
        }
        assert!(lock.is_free());
        assert!(lock.is_device_available());
    }

    #[test]
    fn test_guard_belongs_to_its_own_lock() {
        let a = OperationLock::new();
        let b = OperationLock::new();
        let guard = a.try_start(false).unwrap();
        assert!(!guard.guards(&b));
        assert!(guard.guards(&a.clone()));
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let lock = OperationLock::new();
        let mut rx = lock.subscribe();

        let guard = lock.try_start(false).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow_and_update(),
            LockState::Locked {
                device_unavailable: false
            }
        );

        drop(guard);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), LockState::Idle);
    }
}
