//! Counting permit gate serializing calls to the aggregation provider.
//!
//! The provider misbehaves under concurrent requests from the same
//! credential, so the reference deployment runs with a capacity of one.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GateError {
    #[error("gate capacity must be at least one")]
    ZeroCapacity,
    #[error("permit {0} is not currently held")]
    NotHeld(u64),
    #[error("gate closed while {0} permit(s) are still held")]
    HoldersActive(usize),
    #[error("gate is closed")]
    Closed,
}

/// A permit gate with a fixed number of slots and FIFO fairness.
///
/// `acquire` suspends the caller until a slot frees; on release the
/// longest-waiting live waiter is granted the freed slot. Dropping a
/// [`Permit`] releases its slot, so every exit path out of a gated scope
/// frees the gate, including panics and early `?` returns.
#[derive(Clone)]
pub struct Gate {
    state: Arc<Mutex<GateState>>,
}

struct GateState {
    capacity: usize,
    next_permit: u64,
    holders: HashSet<u64>,
    waiters: VecDeque<oneshot::Sender<u64>>,
    closed: bool,
}

impl GateState {
    fn issue(&mut self) -> u64 {
        self.next_permit += 1;
        self.holders.insert(self.next_permit);
        self.next_permit
    }
}

/// A held gate slot. Release explicitly via [`Gate::release`] to observe
/// double-release errors, or let it drop.
pub struct Permit {
    state: Arc<Mutex<GateState>>,
    id: u64,
    released: bool,
}

impl Gate {
    pub fn new(capacity: usize) -> Result<Self, GateError> {
        if capacity == 0 {
            return Err(GateError::ZeroCapacity);
        }
        Ok(Self {
            state: Arc::new(Mutex::new(GateState {
                capacity,
                next_permit: 0,
                holders: HashSet::new(),
                waiters: VecDeque::new(),
                closed: false,
            })),
        })
    }

    /// Acquire a slot, suspending until one is free. Waiters are served in
    /// arrival order.
    pub async fn acquire(&self) -> Result<Permit, GateError> {
        let rx = {
            let mut state = self.state.lock().expect("gate lock poisoned");
            if state.closed {
                return Err(GateError::Closed);
            }
            if state.holders.len() < state.capacity {
                let id = state.issue();
                return Ok(Permit {
                    state: Arc::clone(&self.state),
                    id,
                    released: false,
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let id = rx.await.map_err(|_| GateError::Closed)?;
        Ok(Permit {
            state: Arc::clone(&self.state),
            id,
            released: false,
        })
    }

    /// Release an explicitly held permit. Errors if the permit was already
    /// released.
    pub fn release(&self, mut permit: Permit) -> Result<(), GateError> {
        permit.released = true;
        release_slot(&self.state, permit.id)
    }

    /// Acquire, run `f`, and release on every exit path. An error or panic
    /// inside `f` still frees the slot via the permit's drop.
    pub async fn with_permit<F, Fut, T>(&self, f: F) -> Result<T, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.acquire().await?;
        let out = f().await;
        self.release(permit)?;
        Ok(out)
    }

    /// Shut the gate down. Errors while any permit is still held; pending
    /// waiters observe [`GateError::Closed`].
    pub fn close(&self) -> Result<(), GateError> {
        let mut state = self.state.lock().expect("gate lock poisoned");
        if !state.holders.is_empty() {
            return Err(GateError::HoldersActive(state.holders.len()));
        }
        state.closed = true;
        state.waiters.clear();
        Ok(())
    }

    #[cfg(test)]
    fn holders(&self) -> usize {
        self.state.lock().expect("gate lock poisoned").holders.len()
    }
}

fn release_slot(state: &Arc<Mutex<GateState>>, id: u64) -> Result<(), GateError> {
    let mut state = state.lock().expect("gate lock poisoned");
    if !state.holders.remove(&id) {
        return Err(GateError::NotHeld(id));
    }
    // Hand the freed slot to the longest-waiting live waiter. A waiter whose
    // future was dropped has hung up its channel; skip it.
    while let Some(tx) = state.waiters.pop_front() {
        let next = state.issue();
        if tx.send(next).is_err() {
            state.holders.remove(&next);
            continue;
        }
        break;
    }
    Ok(())
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            let _ = release_slot(&self.state, self.id);
        }
    }
}
