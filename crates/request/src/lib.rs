//! A cancellable HTTP request engine
//!
//! This crate runs HTTP requests one at a time on a dedicated worker thread, decoupled
//! from the thread of the caller. The caller queues a request, polls for completion,
//! reads a size-bounded response buffer and can abort the request while it runs. The
//! engine rejects concurrent misuse: a second request while one is in flight, deleting
//! a client mid-flight, or overlapping abort requests.
//!
//! # Features
//!
//! - Dedicated worker thread with a configurable name, stack size and core affinity
//! - Non-blocking, cancellable request execution on a single-threaded tokio runtime
//! - Response body buffered under a hard size ceiling
//! - Optional collection of response headers
//! - Pluggable transports through the [`transport::TransportDriver`] trait
//! - A plain HTTP/1.1 transport over TCP ([`transport::TcpTransport`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use micro_request::config::EngineConfig;
//! use micro_request::engine::{RequestController, RequestOptions};
//! use micro_request::transport::TcpConnector;
//! use tracing::{error, info, Level};
//! use tracing_subscriber::FmtSubscriber;
//!
//! fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let mut controller = RequestController::new(EngineConfig::default(), Arc::new(TcpConnector));
//!
//!     let options = RequestOptions::get("http://127.0.0.1:8080/", Duration::from_secs(5));
//!     if let Err(e) = controller.start(options) {
//!         error!(cause = %e, "failed to start request");
//!         return;
//!     }
//!
//!     while !controller.finished() {
//!         std::thread::sleep(Duration::from_millis(10));
//!     }
//!
//!     match controller.result() {
//!         Ok(()) => info!(body = %String::from_utf8_lossy(controller.buffer()), "request succeeded"),
//!         Err(e) => error!(cause = %e, "request failed"),
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`engine`]: the [`engine::RequestController`] and its worker thread
//! - [`signal`]: the flag register the two threads coordinate through
//! - [`protocol`]: errors, lifecycle states and decoded response messages
//! - [`transport`]: the driver and connector traits, and the TCP transport
//! - [`accumulator`]: the bounded response buffer
//! - [`codec`]: HTTP/1.1 encoding and decoding used by the TCP transport
//! - [`config`]: engine and client configuration
//!
//! # Request lifecycle
//!
//! A request is queued, then running, then finished. Only one request can be queued
//! or running at a time. [`engine::RequestController::clear_finished`] marks the
//! outcome as read, after which `result()` reports the request as not finished. The
//! response body, status code and headers stay readable until the next request is
//! started.
//!
//! ## Error Handling
//!
//! - [`protocol::RequestError`]: errors of controller operations, classified by [`protocol::ErrorKind`]
//! - [`protocol::TransportError`]: failures of a transport driver
//! - [`protocol::ParseError`]: response decoding errors
//!
//! # Limitations
//!
//! - One request at a time per engine
//! - The TCP transport speaks HTTP/1.1 without TLS, redirects or connection reuse
//! - Maximum response header size: 8KB
//! - Maximum number of response headers: 64

pub mod accumulator;
pub mod codec;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod signal;
pub mod transport;

mod utils;
pub(crate) use utils::ensure;
