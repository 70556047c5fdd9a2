//! Configuration for the request engine and its transport clients.

use std::fmt;
use std::time::Duration;

use http::Method;

/// Default size ceiling for a buffered response body, in bytes.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 4096;

/// Settings of one [`RequestController`](crate::engine::RequestController) and its worker thread.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Name given to the worker thread (default: "httpRequestTask")
    pub task_name: String,

    /// Worker thread stack size in bytes (default: 512 KiB)
    pub stack_size: usize,

    /// Core the worker thread is pinned to, `None` leaves placement to the OS
    pub core_affinity: Option<usize>,

    /// How long task start/end wait before logging a warning and waiting on (default: 1 second)
    pub task_probe: Duration,

    /// Ceiling for the buffered response body (default: 4096 bytes)
    pub max_response_size: usize,

    /// Keep response headers in a map (default: false)
    pub collect_headers: bool,

    /// Keep a driver after a successful close instead of rebuilding it for the next request (default: false)
    pub reuse_driver: bool,

    /// Authentication retries handed to the transport configuration (default: 1)
    pub max_auth_retries: u32,

    /// Pacing of retry-later steps for drivers without a readiness source
    pub backoff: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_name: "httpRequestTask".to_owned(),
            stack_size: 512 * 1024,
            core_affinity: None,
            task_probe: Duration::from_secs(1),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            collect_headers: false,
            reuse_driver: false,
            max_auth_retries: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_task_name<S: Into<String>>(mut self, task_name: S) -> Self {
        self.task_name = task_name.into();
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_core_affinity(mut self, core: usize) -> Self {
        self.core_affinity = Some(core);
        self
    }

    pub fn with_task_probe(mut self, task_probe: Duration) -> Self {
        self.task_probe = task_probe;
        self
    }

    pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    pub fn with_collect_headers(mut self, collect_headers: bool) -> Self {
        self.collect_headers = collect_headers;
        self
    }

    pub fn with_reuse_driver(mut self, reuse_driver: bool) -> Self {
        self.reuse_driver = reuse_driver;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Exponential backoff between perform steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// First delay after a retry-later step (default: 1 ms)
    pub initial_delay: Duration,

    /// Upper bound for the delay (default: 64 ms)
    pub max_delay: Duration,

    /// Factor applied after every retry-later step (default: 2.0)
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_delay: Duration::from_millis(1), max_delay: Duration::from_millis(64), multiplier: 2.0 }
    }
}

impl BackoffConfig {
    pub(crate) fn delays(&self) -> Backoff {
        Backoff { config: *self, next: self.initial_delay }
    }
}

/// The running delay sequence of one request.
#[derive(Debug)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    next: Duration,
}

impl Backoff {
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        // a product that does not fit a Duration caps the delay
        self.next = Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.multiplier)
            .map_or(self.config.max_delay, |next| next.min(self.config.max_delay));
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.next = self.config.initial_delay;
    }
}

/// Username and password for HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("username", &self.username).field("password", &"***").finish()
    }
}

/// Everything a [`Connector`](crate::transport::Connector) needs to build a driver.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
    pub credentials: Option<Credentials>,
    pub max_auth_retries: u32,
    /// Drivers must perform in non-blocking steps; kept explicit for transports that support both modes.
    pub is_async: bool,
}

impl ClientConfig {
    pub fn new<S: Into<String>>(url: S, method: Method, timeout: Duration) -> Self {
        Self { url: url.into(), method, timeout, credentials: None, max_auth_retries: 1, is_async: true }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_max_auth_retries(mut self, max_auth_retries: u32) -> Self {
        self.max_auth_retries = max_auth_retries;
        self
    }
}
