//! The request engine: a caller-side [`RequestController`] and the worker thread it drives.
//!
//! The controller and the worker share nothing but the signal register. A request
//! travels to the worker as a job over a channel and its outcome comes back over a
//! oneshot channel, sent before the request is flagged finished.

mod controller;
mod task;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::RequestController;
pub use controller::RequestOptions;
pub use controller::RetryOptions;
