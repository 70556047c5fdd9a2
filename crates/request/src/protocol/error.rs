use std::io;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Broad category of a [`RequestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller misuse, detected locally before any I/O and never retried.
    State,
    /// A configuration-time failure; the request was not enqueued.
    Setup,
    /// The request ran and failed; only reported through `result()`.
    Transport,
}

/// Errors returned by the [`RequestController`](crate::engine::RequestController) operations.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("worker task already running")]
    AlreadyRunning,

    #[error("failed creating worker task: {reason}")]
    TaskCreation { reason: String },

    #[error("worker task end already pending")]
    EndAlreadyPending,

    #[error("transport client already exists")]
    ClientAlreadyExists,

    #[error("transport client could not be constructed: {source}")]
    Construction { source: TransportError },

    #[error("failed to set client {field}: {source}")]
    Configure { field: &'static str, source: TransportError },

    #[error("no transport client configured")]
    NoClient,

    #[error("another request is in progress")]
    InProgress,

    #[error("no request queued or running")]
    NotRunning,

    #[error("abort already requested")]
    AbortAlreadyRequested,

    #[error("request still running")]
    StillRunning,

    #[error("request not finished")]
    NotFinished,

    #[error("failed to set header {key}: {value}: {source}")]
    Header { key: String, value: String, source: TransportError },

    #[error("failed to write request body: {reason}")]
    BodyWrite { reason: String },

    #[error("http request failed: {reason}")]
    RequestFailed { reason: String },
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRunning
            | Self::EndAlreadyPending
            | Self::ClientAlreadyExists
            | Self::NoClient
            | Self::InProgress
            | Self::NotRunning
            | Self::AbortAlreadyRequested
            | Self::StillRunning
            | Self::NotFinished => ErrorKind::State,
            Self::TaskCreation { .. }
            | Self::Construction { .. }
            | Self::Configure { .. }
            | Self::Header { .. }
            | Self::BodyWrite { .. } => ErrorKind::Setup,
            Self::RequestFailed { .. } => ErrorKind::Transport,
        }
    }

    pub fn task_creation<S: ToString>(str: S) -> Self {
        Self::TaskCreation { reason: str.to_string() }
    }

    pub fn header<K: ToString, V: ToString>(key: K, value: V, source: TransportError) -> Self {
        Self::Header { key: key.to_string(), value: value.to_string(), source }
    }

    pub fn body_write<S: ToString>(str: S) -> Self {
        Self::BodyWrite { reason: str.to_string() }
    }

    pub fn partial_body_write(expected: usize, written: usize) -> Self {
        Self::BodyWrite { reason: format!("wrote {written} of {expected} body bytes") }
    }

    pub fn request_failed<S: ToString>(str: S) -> Self {
        Self::RequestFailed { reason: str.to_string() }
    }

    pub(crate) fn bad_status(status: StatusCode) -> Self {
        Self::RequestFailed { reason: format!("status {}", status.as_u16()) }
    }
}

/// Errors produced by a transport driver while configuring or performing a request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("response parse error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("invalid url: {reason}")]
    InvalidUrl { reason: String },

    #[error("unsupported url scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("request aborted")]
    Aborted,

    #[error("response exceeds the size limit of {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("connection closed before the response completed")]
    ConnectionClosed,

    #[error("invalid transport state: {reason}")]
    InvalidState { reason: String },

    #[error("worker dropped the request without reporting an outcome")]
    Lost,

    #[error("{reason}")]
    Other { reason: String },
}

impl TransportError {
    pub fn invalid_url<S: ToString>(str: S) -> Self {
        Self::InvalidUrl { reason: str.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_state<S: ToString>(str: S) -> Self {
        Self::InvalidState { reason: str.to_string() }
    }

    pub fn other<S: ToString>(str: S) -> Self {
        Self::Other { reason: str.to_string() }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// The response grew past the accumulator's size ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response exceeds the size limit of {limit} bytes")]
pub struct SizeLimitExceeded {
    pub limit: usize,
}

impl From<SizeLimitExceeded> for TransportError {
    fn from(e: SizeLimitExceeded) -> Self {
        Self::ResponseTooLarge { limit: e.limit }
    }
}

/// Errors raised while decoding an HTTP/1.1 response.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http status")]
    InvalidStatus,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }
}
