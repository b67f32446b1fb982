//! Cancel-then-replace coordination for background refreshes.
//!
//! Starting a new refresh cancels the one in flight. A refresh that was
//! superseded never applies its result, even if its request already finished.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    token: CancellationToken,
}

/// Tracks the single live refresh of one resource.
#[derive(Debug, Default)]
pub struct Supersede {
    slot: Mutex<Slot>,
}

/// Handle for one refresh attempt, issued by [`Supersede::begin`].
#[derive(Debug)]
pub struct Ticket {
    generation: u64,
    token: CancellationToken,
}

impl Supersede {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the current refresh, if any, and start a new one.
    pub fn begin(&self) -> Ticket {
        let mut slot = self.slot();
        slot.token.cancel();
        slot.generation += 1;
        slot.token = CancellationToken::new();
        Ticket {
            generation: slot.generation,
            token: slot.token.clone(),
        }
    }

    /// Cancel the current refresh without starting another.
    pub fn cancel(&self) {
        let mut slot = self.slot();
        slot.token.cancel();
        slot.generation += 1;
        slot.token = CancellationToken::new();
    }

    /// Returns `true` if nothing has superseded `ticket`.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.slot().generation == ticket.generation
    }

    /// Drive `fut` until it completes or `ticket` is superseded.
    pub async fn run<F: Future>(&self, ticket: &Ticket, fut: F) -> Option<F::Output> {
        if !self.is_current(ticket) {
            return None;
        }
        tokio::select! {
            () = ticket.token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Apply a result only if `ticket` is still current.
    ///
    /// The check and `apply` happen under one lock, so a concurrent
    /// [`begin`](Self::begin) cannot slip in between them.
    pub fn commit<R>(&self, ticket: &Ticket, apply: impl FnOnce() -> R) -> Option<R> {
        let slot = self.slot();
        (slot.generation == ticket.generation).then(apply)
    }
}
