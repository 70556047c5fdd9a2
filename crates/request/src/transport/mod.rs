//! The boundary between the engine and whatever performs the network I/O.
//!
//! The engine never touches sockets. It configures a [`TransportDriver`], hands it
//! to the worker thread, and drives it with [`TransportDriver::perform_step`] until
//! the step reports done or failed. Response headers and body bytes come back
//! synchronously during a step through a [`ResponseSink`].
//!
//! A driver is built by a [`Connector`] from a [`ClientConfig`]. [`TcpConnector`]
//! provides a plain HTTP/1.1 driver; tests and embedders can supply their own.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::config::ClientConfig;
use crate::protocol::{SizeLimitExceeded, TransportError};

mod tcp;
pub use tcp::TcpConnector;
pub use tcp::TcpTransport;

/// Why a step asked to be called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// The underlying I/O would block.
    WouldBlock,
    /// An operation such as connecting was started and has not completed.
    InProgress,
}

/// Result of one non-blocking perform step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The response is complete.
    Done,
    /// No failure, but the request is not complete either; call again.
    RetryLater(Pending),
    /// The request failed and must not be stepped again.
    Failed(TransportError),
}

/// What a driver can say about its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The driver waited for its I/O source; the next step can make progress.
    Ready,
    /// The driver has no readiness source. The worker paces steps with a backoff.
    Unknown,
}

/// Receives response events while a driver performs a step.
pub trait ResponseSink {
    fn on_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Returns an error when the data no longer fits. The driver must turn that into a failed step.
    fn on_data(&mut self, data: &[u8]) -> Result<(), SizeLimitExceeded>;
}

/// A single HTTP request/response exchange performed in non-blocking steps.
///
/// Configuration calls happen on the caller thread, everything from
/// [`perform_step`](Self::perform_step) on happens on the worker thread.
#[async_trait]
pub trait TransportDriver: Send {
    fn set_url(&mut self, url: &str) -> Result<(), TransportError>;

    fn set_method(&mut self, method: &Method) -> Result<(), TransportError>;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    fn set_header(&mut self, key: &str, value: &str) -> Result<(), TransportError>;

    /// Prepares a request body of exactly `body_len` bytes.
    fn open(&mut self, body_len: usize) -> Result<(), TransportError>;

    /// Appends body bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Advances the request without blocking, delivering response events to `sink`.
    fn perform_step(&mut self, sink: &mut dyn ResponseSink) -> StepOutcome;

    /// Suspends until the next step can make progress.
    async fn ready(&mut self) -> Result<Readiness, TransportError> {
        Ok(Readiness::Unknown)
    }

    /// Status code of the response, once its head has been received.
    fn status_code(&self) -> Option<StatusCode>;

    /// Releases the connection. The driver may be configured and performed again afterwards.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Builds transport drivers.
#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send + Sync {
    fn connect(&self, config: &ClientConfig) -> Result<Box<dyn TransportDriver>, TransportError>;
}

/// A [`Connector`] backed by a function.
pub struct ConnectorFn<F> {
    f: F,
}

impl<F> Connector for ConnectorFn<F>
where
    F: Fn(&ClientConfig) -> Result<Box<dyn TransportDriver>, TransportError> + Send + Sync,
{
    fn connect(&self, config: &ClientConfig) -> Result<Box<dyn TransportDriver>, TransportError> {
        (self.f)(config)
    }
}

impl<F> fmt::Debug for ConnectorFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorFn").finish_non_exhaustive()
    }
}

pub fn make_connector<F>(f: F) -> ConnectorFn<F>
where
    F: Fn(&ClientConfig) -> Result<Box<dyn TransportDriver>, TransportError> + Send + Sync,
{
    ConnectorFn { f }
}
