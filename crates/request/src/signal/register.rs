use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::warn;

use super::Flags;

/// A set of [`Flags`] that can be read, set, cleared and waited on atomically.
///
/// This is the only state the controller and the worker thread touch concurrently.
/// Every operation takes the internal lock once, so each call is a single group
/// operation; [`update`](Self::update) extends that to arbitrary read-modify-write
/// transitions. Waiters are woken on every change.
#[derive(Debug, Default)]
pub struct SignalFlags {
    bits: Mutex<Flags>,
    changed: Condvar,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self::default()
    }

    // the guarded value is a plain bit set, a panic elsewhere cannot leave it half written
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.bits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of all bits.
    pub fn get(&self) -> Flags {
        *self.lock()
    }

    /// Sets the bits of `mask` and returns the resulting value.
    pub fn set(&self, mask: impl Into<Flags>) -> Flags {
        let mask = mask.into();
        self.update(|bits| {
            bits.insert(mask);
            *bits
        })
    }

    /// Clears the bits of `mask` and returns the value as it was before clearing.
    ///
    /// The returned value makes this a test-and-clear: `clear(X).contains(X)` tells
    /// whether this call was the one that consumed `X`.
    pub fn clear(&self, mask: impl Into<Flags>) -> Flags {
        let mask = mask.into();
        self.update(|bits| {
            let before = *bits;
            bits.remove(mask);
            before
        })
    }

    /// Runs `f` on the bits while holding the lock and wakes waiters if anything changed.
    pub fn update<T>(&self, f: impl FnOnce(&mut Flags) -> T) -> T {
        let mut bits = self.lock();
        let before = *bits;
        let ret = f(&mut bits);
        if *bits != before {
            self.changed.notify_all();
        }
        ret
    }

    /// Blocks until any bit of `mask` is set or `timeout` elapses.
    ///
    /// `None` waits without limit. Returns the bits observed when the wait ended,
    /// callers check `intersects(mask)` to tell a match from a timeout. With
    /// `clear_on_exit` the matched bits of `mask` are cleared before returning,
    /// other bits are left alone.
    pub fn wait(&self, mask: impl Into<Flags>, clear_on_exit: bool, timeout: Option<Duration>) -> Flags {
        let mask = mask.into();
        let bits = self.lock();
        let mut bits = match timeout {
            None => self.changed.wait_while(bits, |bits| !bits.intersects(mask)).unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                let (bits, _) = self
                    .changed
                    .wait_timeout_while(bits, timeout, |bits| !bits.intersects(mask))
                    .unwrap_or_else(PoisonError::into_inner);
                bits
            }
        };

        let observed = *bits;
        if clear_on_exit && observed.intersects(mask) {
            bits.remove(mask);
            self.changed.notify_all();
        }
        observed
    }

    /// Waits for `mask` in two phases: a bounded probe, then without limit.
    ///
    /// A probe timeout is not a failure, it only gets logged so that slow thread
    /// startup or shutdown is visible. The returned value always intersects `mask`.
    pub fn wait_staged(&self, mask: impl Into<Flags>, clear_on_exit: bool, probe: Duration, what: &str) -> Flags {
        let mask = mask.into();
        let observed = self.wait(mask, clear_on_exit, Some(probe));
        if observed.intersects(mask) {
            return observed;
        }

        warn!(flags = ?mask, probe_ms = probe.as_millis(), "{what} not observed in time, waiting without timeout");
        self.wait(mask, clear_on_exit, None)
    }
}
