//! Inter-thread signalling.
//!
//! The controller and the worker thread coordinate through a single register of
//! named bits ([`Flags`]) guarded by [`SignalFlags`]. Group reads and writes are
//! atomic, and a wait blocks until any bit of a mask is set, optionally consuming
//! the matched bits.

mod flags;
mod register;

pub use flags::{Flag, Flags};
pub use register::SignalFlags;
