//! The single shared cell holding the runtime's lifecycle state.
//!
//! `StateCell` wraps a `tokio::sync::watch` channel. Every mutation runs
//! inside `send_if_modified`, so the check and the write happen under one
//! lock and all waiters are notified after every successful transition.
//!
//! Each successful claim stamps the state with a fresh [`AttemptId`].
//! Conditional writes compare both the expected [`Phase`] and the attempt
//! id, so a result arriving from an older attempt can never overwrite a
//! state produced by a newer one.
//!
//! A claimed attempt stays in flight until its claimer calls
//! [`StateCell::finish`], even after it has published `Failed`. No new
//! attempt can be claimed in between.

use std::fmt;

use tokio::sync::watch;

use crate::state::{AttemptId, LifecycleState, Phase};

struct Slot<R> {
    attempt: AttemptId,
    in_flight: bool,
    state: LifecycleState<R>,
}

/// Holds the current [`LifecycleState`] and lets callers wait for it to change.
pub struct StateCell<R> {
    tx: watch::Sender<Slot<R>>,
}

impl<R> StateCell<R> {
    /// Creates a cell in the `Idle` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot {
            attempt: AttemptId::INITIAL,
            in_flight: false,
            state: LifecycleState::Idle,
        });
        Self { tx }
    }

    /// Returns the current phase without blocking.
    pub fn phase(&self) -> Phase {
        self.tx.borrow().state.phase()
    }

    /// Returns the attempt that produced the current state.
    pub fn attempt(&self) -> AttemptId {
        self.tx.borrow().attempt
    }

    /// Whether a claimed attempt has not yet finished.
    pub fn is_in_flight(&self) -> bool {
        self.tx.borrow().in_flight
    }

    /// Evaluates `f` against the current state.
    ///
    /// Writers are excluded while `f` runs, so `f` must not block or call
    /// back into the cell.
    pub fn read<T>(&self, f: impl FnOnce(&LifecycleState<R>) -> T) -> T {
        f(&self.tx.borrow().state)
    }

    /// Atomically moves `Idle`/`Failed` to `InProgress`.
    ///
    /// Returns the id of the new attempt to the single winner, or the phase
    /// that prevented the claim. While an earlier attempt is still in
    /// flight the claim fails with `InProgress`, whatever it has published.
    pub fn claim(&self) -> Result<AttemptId, Phase> {
        let mut outcome = Err(Phase::InProgress);
        self.tx.send_if_modified(|slot| {
            let phase = slot.state.phase();
            if !phase.is_claimable() {
                outcome = Err(phase);
                return false;
            }
            if slot.in_flight {
                outcome = Err(Phase::InProgress);
                return false;
            }
            slot.in_flight = true;
            slot.attempt = slot.attempt.next();
            slot.state = LifecycleState::InProgress;
            outcome = Ok(slot.attempt);
            true
        });
        outcome
    }

    /// Sets `new` only if the cell still holds `expected` from `attempt`.
    ///
    /// A rejected write hands `new` back so that a resource it carries can
    /// be released by the caller.
    pub fn compare_and_set(
        &self,
        attempt: AttemptId,
        expected: Phase,
        new: LifecycleState<R>,
    ) -> Result<(), LifecycleState<R>> {
        let mut proposed = Some(new);
        self.tx.send_if_modified(|slot| {
            if slot.attempt != attempt || slot.state.phase() != expected {
                return false;
            }
            match proposed.take() {
                Some(new) => {
                    slot.state = new;
                    true
                }
                None => false,
            }
        });
        proposed.map_or(Ok(()), Err)
    }

    /// Ends `attempt`, allowing the next claim.
    ///
    /// Does nothing if `attempt` is not the latest one. Waiters are not
    /// notified since the phase does not change.
    pub fn finish(&self, attempt: AttemptId) {
        self.tx.send_if_modified(|slot| {
            if slot.attempt == attempt {
                slot.in_flight = false;
            }
            false
        });
    }

    /// Moves `Ready` to `Disposed`, transferring the resource to the caller.
    ///
    /// Returns `None` when the cell was not `Ready`; at most one caller ever
    /// receives the resource.
    pub fn take_ready(&self) -> Option<R> {
        let mut taken = None;
        self.tx.send_if_modified(|slot| {
            if slot.state.phase() != Phase::Ready {
                return false;
            }
            taken =
                std::mem::replace(&mut slot.state, LifecycleState::Disposed).into_resource();
            true
        });
        taken
    }

    /// Suspends until the phase is no longer `phase`, then returns the new phase.
    pub async fn wait_while(&self, phase: Phase) -> Phase {
        let mut rx = self.tx.subscribe();
        let changed = rx
            .wait_for(|slot| slot.state.phase() != phase)
            .await
            .map(|slot| slot.state.phase());
        // The sender lives in `self`, so the channel cannot close under us.
        changed.unwrap_or_else(|_| self.phase())
    }

    /// Returns a watcher that observes subsequent phase changes.
    pub fn subscribe(&self) -> PhaseWatcher<R> {
        PhaseWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl<R> Default for StateCell<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for StateCell<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.tx.borrow();
        f.debug_struct("StateCell")
            .field("attempt", &slot.attempt)
            .field("in_flight", &slot.in_flight)
            .field("phase", &slot.state.phase())
            .finish()
    }
}

/// Observes phase changes of a [`StateCell`].
///
/// Changes are coalesced: a slow watcher sees the latest phase, not every
/// intermediate one.
pub struct PhaseWatcher<R> {
    rx: watch::Receiver<Slot<R>>,
}

impl<R> PhaseWatcher<R> {
    /// Returns the latest published phase.
    pub fn current(&self) -> Phase {
        self.rx.borrow().state.phase()
    }

    /// Waits for the next published change and returns the phase after it.
    ///
    /// Returns `None` once the cell has been dropped.
    pub async fn changed(&mut self) -> Option<Phase> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().state.phase())
    }

    /// Waits until `predicate` accepts the current phase.
    ///
    /// Returns `None` once the cell has been dropped.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(Phase) -> bool) -> Option<Phase> {
        let slot = self
            .rx
            .wait_for(|slot| predicate(slot.state.phase()))
            .await
            .ok()?;
        Some(slot.state.phase())
    }
}

impl<R> fmt::Debug for PhaseWatcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseWatcher")
            .field("phase", &self.current())
            .finish()
    }
}
