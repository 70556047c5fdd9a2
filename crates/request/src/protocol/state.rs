//! Lifecycle states and the legal transitions between them.
//!
//! The signal register holds independent bits, but only a handful of combinations
//! are legal. [`EngineState`] is the typed view of a register snapshot, and the
//! transition functions below are the only places the request bits are changed.
//! Each one runs inside [`SignalFlags::update`](crate::signal::SignalFlags::update),
//! so a check and its write happen in one group operation.

use crate::ensure;
use crate::protocol::RequestError;
use crate::signal::{Flag, Flags};

/// Where a request engine currently is in its lifecycle.
///
/// The request states are mutually exclusive variants: a request is queued,
/// running or finished, never two of them at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// No worker has ever been started.
    Idle,
    /// A worker existed and has terminated.
    WorkerStopped,
    /// Worker running, nothing queued, no unread outcome.
    WorkerIdle,
    /// A request was handed to the worker and not yet picked up.
    RequestQueued,
    /// The worker is driving the transport.
    RequestRunning,
    /// The last outcome is available.
    RequestFinished,
}

impl EngineState {
    pub fn from_flags(flags: Flags, had_worker: bool) -> Self {
        if !flags.contains(Flag::TaskRunning) {
            return if had_worker { Self::WorkerStopped } else { Self::Idle };
        }

        if flags.contains(Flag::RequestRunning) {
            Self::RequestRunning
        } else if flags.contains(Flag::StartRequest) {
            Self::RequestQueued
        } else if flags.contains(Flag::RequestFinished) {
            Self::RequestFinished
        } else {
            Self::WorkerIdle
        }
    }
}

/// What the worker found after waking up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pickup {
    /// A queued request moved to running.
    Request,
    /// The controller asked the worker to stop.
    End,
    /// Neither bit was set.
    Spurious,
}

/// Queue a request: rejected while another one is queued or running.
pub(crate) fn enqueue(bits: &mut Flags) -> Result<(), RequestError> {
    ensure!(!bits.intersects(Flag::IN_PROGRESS), RequestError::InProgress);
    bits.remove(Flag::RequestFinished);
    bits.insert(Flag::StartRequest);
    Ok(())
}

/// Worker side: take whatever woke us up.
///
/// A queued request is served before a pending end so that a request queued right
/// before shutdown still completes. The queued bit turns into the running bit in
/// the same step, there is no moment where neither is set.
pub(crate) fn pickup(bits: &mut Flags) -> Pickup {
    if bits.contains(Flag::StartRequest) {
        debug_assert!(!bits.contains(Flag::RequestRunning), "request queued while another is running: {bits:?}");
        bits.remove(Flag::StartRequest | Flag::RequestFinished);
        bits.insert(Flag::RequestRunning);
        Pickup::Request
    } else if bits.contains(Flag::EndTask) {
        bits.remove(Flag::EndTask);
        Pickup::End
    } else {
        Pickup::Spurious
    }
}

/// Worker side: the request is over, whatever the outcome.
pub(crate) fn complete(bits: &mut Flags) {
    debug_assert!(bits.contains(Flag::RequestRunning), "completing a request that is not running: {bits:?}");
    bits.remove(Flag::RequestRunning | Flag::AbortRequest);
    bits.insert(Flag::RequestFinished);
}

/// Ask the in-flight request to stop.
pub(crate) fn request_abort(bits: &mut Flags) -> Result<(), RequestError> {
    ensure!(bits.intersects(Flag::IN_PROGRESS), RequestError::NotRunning);
    ensure!(!bits.contains(Flag::AbortRequest), RequestError::AbortAlreadyRequested);
    bits.insert(Flag::AbortRequest);
    Ok(())
}

/// Ask the worker to stop. `Ok(false)` means there is no worker to stop.
pub(crate) fn request_end(bits: &mut Flags) -> Result<bool, RequestError> {
    if !bits.contains(Flag::TaskRunning) {
        return Ok(false);
    }
    ensure!(!bits.contains(Flag::EndTask), RequestError::EndAlreadyPending);
    bits.insert(Flag::EndTask);
    Ok(true)
}

/// Worker side: the thread entered its loop.
pub(crate) fn worker_started(bits: &mut Flags) {
    bits.remove(Flag::TaskEnded);
    bits.insert(Flag::TaskRunning);
}

/// Worker side: the thread is leaving, on any path.
pub(crate) fn worker_ended(bits: &mut Flags) {
    bits.remove(Flag::TaskRunning | Flag::EndTask);
    bits.insert(Flag::TaskEnded);
}

/// Worker side: consume a pending abort. Returns whether one was pending.
pub(crate) fn take_abort(bits: &mut Flags) -> bool {
    let pending = bits.contains(Flag::AbortRequest);
    bits.remove(Flag::AbortRequest);
    pending
}

/// Whether the outcome of the last request may be read.
pub(crate) fn check_finished(bits: Flags) -> Result<(), RequestError> {
    ensure!(!bits.contains(Flag::RequestRunning), RequestError::StillRunning);
    ensure!(bits.contains(Flag::RequestFinished), RequestError::NotFinished);
    Ok(())
}
