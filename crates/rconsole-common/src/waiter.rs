//! Blocking handoffs between threads.
//!
//! `Waiter` is an edge-triggered park/unpark pair: a `resume()` releases one
//! thread that is parked *right now* and is forgotten otherwise. Callers keep
//! the real condition in their own state and re-check it after waking.
//!
//! `SignalWaiter` moves exactly one value from a producer thread to a blocked
//! consumer. The consumer arms the slot before it asks for the value, so an
//! answer that races ahead of `pause()` is still delivered, while a value
//! nobody asked for is dropped.

use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use crate::sync::mutex_lock_or_recover;

#[derive(Debug, Default)]
struct Parking {
    parked: usize,
    permits: usize,
}

#[derive(Debug, Default)]
pub struct Waiter {
    state: Mutex<Parking>,
    cond: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until another thread calls `resume()`.
    pub fn pause(&self) {
        self.park(None);
    }

    /// Returns `true` when released by `resume()`, `false` on timeout.
    pub fn pause_timeout(&self, timeout: Duration) -> bool {
        self.park(Some(timeout))
    }

    /// Releases one currently parked caller. No-op when nobody is parked.
    pub fn resume(&self) {
        let mut state = mutex_lock_or_recover(&self.state);
        if state.permits < state.parked {
            state.permits += 1;
            self.cond.notify_one();
        }
    }

    /// Number of threads currently parked.
    pub fn parked(&self) -> usize {
        mutex_lock_or_recover(&self.state).parked
    }

    fn park(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = mutex_lock_or_recover(&self.state);
        state.parked += 1;

        loop {
            if state.permits > 0 {
                state.permits -= 1;
                state.parked -= 1;
                return true;
            }

            match deadline {
                None => {
                    state = self
                        .cond
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.parked -= 1;
                        return false;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }
    }
}

/// Outcome of a `SignalWaiter` pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff<T> {
    Value(T),
    Killed,
    TimedOut,
}

impl<T> Handoff<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Handoff::Value(value) => Some(value),
            Handoff::Killed | Handoff::TimedOut => None,
        }
    }
}

#[derive(Debug)]
enum Slot<T> {
    Idle,
    Armed,
    Filled(T),
    Killed,
}

#[derive(Debug)]
pub struct SignalWaiter<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> Default for SignalWaiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SignalWaiter<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
            cond: Condvar::new(),
        }
    }

    /// Opens the slot for exactly one value. An unclaimed value left over
    /// from a previous round is discarded. Returns `false` once killed.
    pub fn arm(&self) -> bool {
        let mut slot = mutex_lock_or_recover(&self.slot);
        match *slot {
            Slot::Killed => false,
            _ => {
                *slot = Slot::Armed;
                true
            }
        }
    }

    /// Hands `value` to the armed consumer. Returns `false` (dropping the
    /// value) when nothing is armed, the slot is already filled, or the
    /// waiter has been killed.
    pub fn receive(&self, value: T) -> bool {
        let mut slot = mutex_lock_or_recover(&self.slot);
        if !matches!(*slot, Slot::Armed) {
            return false;
        }
        *slot = Slot::Filled(value);
        self.cond.notify_all();
        true
    }

    /// Blocks until a value arrives or the waiter is killed. Arms the slot
    /// if the caller has not done so already.
    pub fn pause(&self) -> Handoff<T> {
        self.wait(None)
    }

    pub fn pause_timeout(&self, timeout: Duration) -> Handoff<T> {
        self.wait(Some(timeout))
    }

    /// Releases every blocked caller with `Handoff::Killed`. Permanent.
    pub fn kill(&self) {
        let mut slot = mutex_lock_or_recover(&self.slot);
        *slot = Slot::Killed;
        self.cond.notify_all();
    }

    pub fn is_killed(&self) -> bool {
        matches!(*mutex_lock_or_recover(&self.slot), Slot::Killed)
    }

    fn wait(&self, timeout: Option<Duration>) -> Handoff<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = mutex_lock_or_recover(&self.slot);
        if matches!(*slot, Slot::Idle) {
            *slot = Slot::Armed;
        }

        loop {
            if let Some(outcome) = Self::take(&mut slot) {
                return outcome;
            }

            match deadline {
                None => {
                    slot = self
                        .cond
                        .wait(slot)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        // Disarm so a late answer is not mistaken for the next one.
                        *slot = Slot::Idle;
                        return Handoff::TimedOut;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    slot = guard;
                }
            }
        }
    }

    fn take(slot: &mut MutexGuard<'_, Slot<T>>) -> Option<Handoff<T>> {
        match std::mem::replace(&mut **slot, Slot::Idle) {
            Slot::Filled(value) => Some(Handoff::Value(value)),
            Slot::Killed => {
                **slot = Slot::Killed;
                Some(Handoff::Killed)
            }
            other => {
                **slot = other;
                None
            }
        }
    }
}
