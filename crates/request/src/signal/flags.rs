use enumflags2::{BitFlags, bitflags, make_bitflags};

/// A named bit shared between the request controller and its worker thread.
///
/// Each bit has exactly one writer role; see the variant docs. Sets of bits are
/// plain data, atomicity comes from [`SignalFlags`](super::SignalFlags) which guards them.
#[bitflags]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Flag {
    /// The worker thread is alive and inside its loop.
    TaskRunning = 1 << 0,
    /// A request has been queued and not yet picked up by the worker.
    StartRequest = 1 << 1,
    /// The worker is driving the transport step loop.
    RequestRunning = 1 << 2,
    /// The last request's outcome is available and unread.
    RequestFinished = 1 << 3,
    /// The controller asked the worker to terminate.
    EndTask = 1 << 4,
    /// The worker has terminated. One-shot, consumed by the waiter.
    TaskEnded = 1 << 5,
    /// The controller asked the in-flight request to stop early.
    AbortRequest = 1 << 6,
}

impl Flag {
    /// Either of the two "a request is in progress" bits.
    pub const IN_PROGRESS: Flags = make_bitflags!(Flag::{StartRequest | RequestRunning});
}

/// A set of [`Flag`]s.
pub type Flags = BitFlags<Flag>;
