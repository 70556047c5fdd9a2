//! The caller-side handle of the request engine.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accumulator::ResponseAccumulator;
use crate::config::{ClientConfig, Credentials, EngineConfig};
use crate::engine::task;
use crate::engine::worker::{Job, Outcome};
use crate::ensure;
use crate::protocol::state;
use crate::protocol::{EngineState, RequestError, TransportError};
use crate::signal::{Flag, Flags, SignalFlags};
use crate::transport::{Connector, TransportDriver};

/// A request to run on a freshly built transport client.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Duration,
    pub credentials: Option<Credentials>,
}

impl RequestOptions {
    pub fn new<S: Into<String>>(url: S, method: Method, timeout: Duration) -> Self {
        Self { url: url.into(), method, headers: Vec::new(), body: Bytes::new(), timeout, credentials: None }
    }

    pub fn get<S: Into<String>>(url: S, timeout: Duration) -> Self {
        Self::new(url, Method::GET, timeout)
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// A request reusing the existing client. Only the fields that are set change its configuration.
#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    pub url: Option<String>,
    pub method: Option<Method>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
    pub credentials: Option<Credentials>,
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// The running worker thread and the sending half of its job channel.
struct WorkerHandle {
    thread: JoinHandle<()>,
    jobs: mpsc::UnboundedSender<Job>,
}

/// A configured transport client. The driver is absent while a request runs
/// and after it was discarded on close.
struct Client {
    config: ClientConfig,
    driver: Option<Box<dyn TransportDriver>>,
}

impl Client {
    fn connect(config: ClientConfig, connector: &dyn Connector) -> Result<Self, RequestError> {
        let driver = connector.connect(&config).map_err(|source| RequestError::Construction { source })?;
        Ok(Self { config, driver: Some(driver) })
    }

    fn driver(&mut self, connector: &dyn Connector) -> Result<&mut Box<dyn TransportDriver>, RequestError> {
        if self.driver.is_none() {
            debug!(url = %self.config.url, "rebuilding transport client");
            self.driver = Some(connector.connect(&self.config).map_err(|source| RequestError::Construction { source })?);
        }
        self.driver.as_mut().ok_or(RequestError::NoClient)
    }

    fn apply(&mut self, options: &RetryOptions) -> Result<(), RequestError> {
        if let Some(credentials) = &options.credentials {
            self.config.credentials = Some(credentials.clone());
            // credentials are fixed at construction
            self.driver = None;
        }

        if let Some(url) = &options.url {
            self.config.url.clone_from(url);
            if let Some(driver) = self.driver.as_mut() {
                driver.set_url(url).map_err(|source| RequestError::Configure { field: "url", source })?;
            }
        }

        if let Some(method) = &options.method {
            self.config.method = method.clone();
            if let Some(driver) = self.driver.as_mut() {
                driver.set_method(method).map_err(|source| RequestError::Configure { field: "method", source })?;
            }
        }

        if let Some(timeout) = options.timeout {
            self.config.timeout = timeout;
            if let Some(driver) = self.driver.as_mut() {
                driver.set_timeout(timeout).map_err(|source| RequestError::Configure { field: "timeout", source })?;
            }
        }

        Ok(())
    }

    /// Applies headers and body, then takes the driver out for the worker.
    fn prime(
        &mut self,
        headers: &[(String, String)],
        body: &[u8],
        connector: &dyn Connector,
    ) -> Result<Box<dyn TransportDriver>, RequestError> {
        let driver = self.driver(connector)?;
        if let Err(e) = load(driver.as_mut(), headers, body) {
            // a half loaded driver is never handed out again, the next request rebuilds it
            self.driver = None;
            return Err(e);
        }

        self.driver.take().ok_or(RequestError::NoClient)
    }
}

fn load(driver: &mut dyn TransportDriver, headers: &[(String, String)], body: &[u8]) -> Result<(), RequestError> {
    for (key, value) in headers {
        driver.set_header(key, value).map_err(|source| RequestError::header(key, value, source))?;
    }

    if !body.is_empty() {
        driver.open(body.len()).map_err(RequestError::body_write)?;
        let written = driver.write(body).map_err(RequestError::body_write)?;
        ensure!(written == body.len(), RequestError::partial_body_write(body.len(), written));
    }
    Ok(())
}

/// The request currently handed to the worker, or finished and not yet collected.
struct InFlight {
    reply: oneshot::Receiver<Outcome>,
    cancel: CancellationToken,
}

/// The response of the last request.
#[derive(Debug)]
struct LastResponse {
    accumulator: ResponseAccumulator,
    result: Option<Result<(), TransportError>>,
    status: Option<StatusCode>,
}

impl LastResponse {
    fn empty(config: &EngineConfig) -> Self {
        Self {
            accumulator: ResponseAccumulator::new(config.max_response_size, config.collect_headers),
            result: None,
            status: None,
        }
    }
}

/// Runs HTTP requests, one at a time, on a dedicated worker thread.
///
/// All operations return immediately except [`start_task`](Self::start_task) and
/// [`end_task`](Self::end_task), which wait for the worker to come up or go down.
/// A request is started with [`start`](Self::start) or [`retry`](Self::retry), polled
/// with [`finished`](Self::finished) and read with [`result`](Self::result) and the
/// response accessors.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use micro_request::config::EngineConfig;
/// use micro_request::engine::{RequestController, RequestOptions};
/// use micro_request::transport::TcpConnector;
///
/// let mut controller = RequestController::new(EngineConfig::default(), Arc::new(TcpConnector));
/// controller.start(RequestOptions::get("http://127.0.0.1:8080/", Duration::from_secs(5))).unwrap();
///
/// while !controller.finished() {
///     std::thread::sleep(Duration::from_millis(10));
/// }
///
/// controller.result().unwrap();
/// println!("{}", String::from_utf8_lossy(controller.buffer()));
/// ```
pub struct RequestController {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    flags: Arc<SignalFlags>,
    worker: Option<WorkerHandle>,
    had_worker: bool,
    client: Option<Client>,
    in_flight: Option<InFlight>,
    response: LastResponse,
}

impl RequestController {
    pub fn new(config: EngineConfig, connector: Arc<dyn Connector>) -> Self {
        let response = LastResponse::empty(&config);
        Self {
            config,
            connector,
            flags: Arc::new(SignalFlags::new()),
            worker: None,
            had_worker: false,
            client: None,
            in_flight: None,
            response,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts the worker thread and waits until it runs.
    pub fn start_task(&mut self) -> Result<(), RequestError> {
        ensure!(self.worker.is_none() && !self.task_running(), RequestError::AlreadyRunning);

        self.flags.update(|bits| *bits = Flags::empty());
        let (jobs, receiver) = mpsc::unbounded_channel();
        let thread = task::spawn(&self.config, Arc::clone(&self.flags), receiver)?;
        self.worker = Some(WorkerHandle { thread, jobs });
        self.had_worker = true;

        let observed = self.flags.wait_staged(
            Flag::TaskRunning | Flag::TaskEnded,
            false,
            self.config.task_probe,
            "worker task start",
        );
        if !observed.contains(Flag::TaskRunning) {
            self.reap();
            return Err(RequestError::task_creation("worker task exited during startup"));
        }

        info!(name = %self.config.task_name, "worker task started");
        Ok(())
    }

    /// Asks the worker to stop and waits until it is gone. A request in flight completes first.
    pub fn end_task(&mut self) -> Result<(), RequestError> {
        if !self.flags.update(state::request_end)? {
            self.reap();
            return Ok(());
        }

        self.flags.wait_staged(Flag::TaskEnded, true, self.config.task_probe, "worker task end");
        self.reap();
        info!(name = %self.config.task_name, "worker task ended");
        Ok(())
    }

    pub fn task_running(&self) -> bool {
        self.flags.get().contains(Flag::TaskRunning)
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_flags(self.flags.get(), self.had_worker)
    }

    /// Builds a transport client for later [`retry`](Self::retry) calls.
    pub fn create_client<S: Into<String>>(
        &mut self,
        url: S,
        method: Method,
        timeout: Duration,
        credentials: Option<Credentials>,
    ) -> Result<(), RequestError> {
        ensure!(self.client.is_none(), RequestError::ClientAlreadyExists);

        let config = ClientConfig::new(url, method, timeout)
            .with_credentials(credentials)
            .with_max_auth_retries(self.config.max_auth_retries);
        debug!(url = %config.url, method = %config.method, "creating transport client");
        self.client = Some(Client::connect(config, self.connector.as_ref())?);
        Ok(())
    }

    pub fn delete_client(&mut self) -> Result<(), RequestError> {
        if self.client.is_none() {
            return Ok(());
        }
        ensure!(!self.in_progress(), RequestError::InProgress);

        self.client = None;
        debug!("transport client deleted");
        Ok(())
    }

    /// Queues a request on a new transport client, replacing any existing one.
    pub fn start(&mut self, options: RequestOptions) -> Result<(), RequestError> {
        self.prepare()?;

        if self.client.take().is_some() {
            debug!("discarding previous transport client");
        }
        self.create_client(options.url, options.method, options.timeout, options.credentials)?;

        let connector = Arc::clone(&self.connector);
        let client = self.client.as_mut().ok_or(RequestError::NoClient)?;
        let driver = client.prime(&options.headers, &options.body, connector.as_ref())?;
        self.dispatch(driver)
    }

    /// Queues a request on the existing transport client.
    pub fn retry(&mut self, options: RetryOptions) -> Result<(), RequestError> {
        self.prepare()?;

        let connector = Arc::clone(&self.connector);
        let client = self.client.as_mut().ok_or(RequestError::NoClient)?;
        client.apply(&options)?;
        let driver = client.prime(&options.headers, &options.body, connector.as_ref())?;
        self.dispatch(driver)
    }

    /// Asks the request in flight to stop. Returns without waiting for it.
    pub fn abort(&self) -> Result<(), RequestError> {
        self.flags.update(state::request_abort)?;
        if let Some(in_flight) = &self.in_flight {
            in_flight.cancel.cancel();
        }
        info!("request abort requested");
        Ok(())
    }

    pub fn in_progress(&self) -> bool {
        self.flags.get().intersects(Flag::IN_PROGRESS)
    }

    pub fn finished(&self) -> bool {
        self.flags.get().contains(Flag::RequestFinished)
    }

    /// Marks the last outcome as read.
    pub fn clear_finished(&self) {
        self.flags.clear(Flag::RequestFinished);
    }

    /// Outcome of the last request: `Ok` when the transport completed with a 2xx status.
    pub fn result(&mut self) -> Result<(), RequestError> {
        state::check_finished(self.flags.get())?;
        self.collect();

        match &self.response.result {
            Some(Ok(())) => match self.response.status {
                Some(status) if status.is_success() => Ok(()),
                Some(status) => Err(RequestError::bad_status(status)),
                None => Err(RequestError::request_failed("no status code")),
            },
            Some(Err(e)) => Err(RequestError::request_failed(e)),
            None => Err(RequestError::NotFinished),
        }
    }

    pub fn buffer(&mut self) -> &[u8] {
        self.collect();
        self.response.accumulator.body()
    }

    /// Takes the response body, leaving an empty buffer behind.
    pub fn take_buffer(&mut self) -> Bytes {
        self.collect();
        self.response.accumulator.take_body()
    }

    pub fn status_code(&mut self) -> Option<StatusCode> {
        self.collect();
        self.response.status
    }

    /// Headers of the last response, empty unless header collection is enabled.
    pub fn response_headers(&mut self) -> &HeaderMap {
        self.collect();
        self.response.accumulator.headers()
    }

    pub fn take_response_headers(&mut self) -> HeaderMap {
        self.collect();
        self.response.accumulator.take_headers()
    }

    /// The transport failure of the last request, if it failed.
    pub fn transport_error(&mut self) -> Option<&TransportError> {
        self.collect();
        self.response.result.as_ref().and_then(|result| result.as_ref().err())
    }

    /// Common preconditions of `start` and `retry`.
    fn prepare(&mut self) -> Result<(), RequestError> {
        ensure!(!self.in_progress(), RequestError::InProgress);
        self.collect();
        self.ensure_worker()
    }

    fn ensure_worker(&mut self) -> Result<(), RequestError> {
        if self.task_running() {
            return Ok(());
        }
        self.reap();
        self.start_task()
    }

    fn dispatch(&mut self, driver: Box<dyn TransportDriver>) -> Result<(), RequestError> {
        let (reply, receiver) = oneshot::channel();
        let cancel = CancellationToken::new();
        let job = Job {
            driver,
            accumulator: ResponseAccumulator::new(self.config.max_response_size, self.config.collect_headers),
            cancel: cancel.clone(),
            reply,
            reuse_driver: self.config.reuse_driver,
            backoff: self.config.backoff,
        };

        let worker = self.worker.as_ref().ok_or(RequestError::NotRunning)?;
        self.flags.update(state::enqueue)?;
        if worker.jobs.send(job).is_err() {
            // the loaded driver goes down with the job, the client rebuilds it on the next request
            self.flags.clear(Flag::StartRequest);
            return Err(RequestError::task_creation("worker task is gone"));
        }

        self.response = LastResponse::empty(&self.config);
        self.in_flight = Some(InFlight { reply: receiver, cancel });
        debug!("request queued");
        Ok(())
    }

    /// Moves the outcome of a completed request into the controller.
    fn collect(&mut self) {
        if self.in_progress() {
            return;
        }
        let Some(mut in_flight) = self.in_flight.take() else {
            return;
        };

        match in_flight.reply.try_recv() {
            Ok(Outcome { result, status, accumulator, driver }) => {
                self.response = LastResponse { accumulator, result: Some(result), status };
                if let (Some(client), Some(driver)) = (self.client.as_mut(), driver) {
                    client.driver = Some(driver);
                }
            }
            Err(TryRecvError::Empty) => {
                error!("request completed without an outcome");
                self.in_flight = Some(in_flight);
            }
            Err(TryRecvError::Closed) => {
                warn!("worker dropped the request");
                self.response.result = Some(Err(TransportError::Lost));
            }
        }
    }

    fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            drop(worker.jobs);
            if worker.thread.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

impl fmt::Debug for RequestController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestController")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("client", &self.client.as_ref().map(|client| &client.config))
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

impl Drop for RequestController {
    fn drop(&mut self) {
        if self.in_progress() {
            if let Err(e) = self.abort() {
                debug!(cause = %e, "abort on drop");
            }
        }
        if let Err(e) = self.end_task() {
            warn!(cause = %e, "failed to end worker task on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FakeDriver, Probe, Step};
    use crate::protocol::ErrorKind;
    use crate::transport::{MockConnector, make_connector};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn config() -> EngineConfig {
        EngineConfig::default().with_task_probe(Duration::from_millis(200))
    }

    /// A connector handing out the given drivers in order.
    fn connector_of(drivers: Vec<FakeDriver>) -> Arc<dyn Connector> {
        let drivers = Mutex::new(VecDeque::from(drivers));
        Arc::new(make_connector(move |_config: &ClientConfig| {
            let driver = drivers.lock().unwrap().pop_front().ok_or_else(|| TransportError::other("no more drivers"))?;
            Ok(Box::new(driver) as Box<dyn TransportDriver>)
        }))
    }

    fn controller_with(driver: FakeDriver) -> RequestController {
        RequestController::new(config(), connector_of(vec![driver]))
    }

    fn wait_finished(controller: &RequestController) {
        let deadline = Instant::now() + TIMEOUT;
        while !controller.finished() {
            assert!(Instant::now() < deadline, "request did not finish, state {:?}", controller.state());
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn get() -> RequestOptions {
        RequestOptions::get("http://fake.test/", TIMEOUT)
    }

    #[test]
    fn task_start_and_end() {
        let (driver, _probe) = FakeDriver::responding(b"");
        let mut controller = controller_with(driver);
        assert_eq!(controller.state(), EngineState::Idle);

        controller.start_task().unwrap();
        assert!(controller.task_running());
        assert_eq!(controller.state(), EngineState::WorkerIdle);
        assert!(matches!(controller.start_task(), Err(RequestError::AlreadyRunning)));

        controller.end_task().unwrap();
        assert!(!controller.task_running());
        assert_eq!(controller.state(), EngineState::WorkerStopped);

        controller.end_task().unwrap();
    }

    #[test]
    fn request_completes_and_outcome_is_read() {
        let (driver, probe) = FakeDriver::scripted(vec![
            Step::Retry,
            Step::Header("content-length", "10"),
            Step::Data(b"01234"),
            Step::Retry,
            Step::Data(b"56789"),
            Step::Done,
        ]);
        let mut controller = controller_with(driver);

        controller.start(get().header("x-trace", "1").body("payload")).unwrap();
        wait_finished(&controller);

        assert!(controller.task_running());
        assert_eq!(controller.state(), EngineState::RequestFinished);
        controller.result().unwrap();
        assert_eq!(controller.buffer(), b"0123456789");
        assert_eq!(controller.status_code(), Some(StatusCode::OK));
        assert!(controller.transport_error().is_none());
        assert_eq!(probe.headers(), vec![("x-trace".to_owned(), "1".to_owned())]);
        assert_eq!(probe.body(), b"payload");
        assert_eq!(probe.closes(), 1);

        assert_eq!(&controller.take_buffer()[..], b"0123456789");
        assert!(controller.buffer().is_empty());

        controller.clear_finished();
        assert!(matches!(controller.result(), Err(RequestError::NotFinished)));
        assert_eq!(controller.status_code(), Some(StatusCode::OK));
    }

    #[test]
    fn single_request_in_progress() {
        let (driver, _probe) = FakeDriver::hanging();
        let mut controller = controller_with(driver);

        controller.start(get()).unwrap();
        assert!(controller.in_progress());

        let err = controller.start(get()).unwrap_err();
        assert!(matches!(err, RequestError::InProgress));
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(matches!(controller.retry(RetryOptions::new()), Err(RequestError::InProgress)));

        controller.abort().unwrap();
        wait_finished(&controller);
    }

    #[test]
    fn result_while_running() {
        let (driver, _probe) = FakeDriver::hanging();
        let mut controller = controller_with(driver);

        assert!(matches!(controller.result(), Err(RequestError::NotFinished)));

        controller.start(get()).unwrap();
        let deadline = Instant::now() + TIMEOUT;
        while controller.state() != EngineState::RequestRunning {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(controller.result(), Err(RequestError::StillRunning)));

        controller.abort().unwrap();
        wait_finished(&controller);
    }

    #[test]
    fn abort_reports_failure() {
        let (driver, _probe) = FakeDriver::hanging();
        let mut controller = controller_with(driver);

        assert!(matches!(controller.abort(), Err(RequestError::NotRunning)));

        controller.start(get()).unwrap();
        controller.abort().unwrap();
        wait_finished(&controller);

        let err = controller.result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("aborted"));
        assert!(controller.transport_error().is_some_and(TransportError::is_aborted));
        assert!(matches!(controller.abort(), Err(RequestError::NotRunning)));
    }

    #[test]
    fn non_success_status_fails_the_result() {
        let (driver, _probe) = FakeDriver::responding(b"missing");
        let mut controller = controller_with(driver.with_status(StatusCode::NOT_FOUND));

        controller.start(get()).unwrap();
        wait_finished(&controller);

        let err = controller.result().unwrap_err();
        assert!(err.to_string().contains("404"));
        assert_eq!(controller.buffer(), b"missing");
    }

    #[test]
    fn oversized_response_is_capped() {
        let (driver, _probe) = FakeDriver::scripted(vec![Step::Data(b"0123456789abcde"), Step::Done]);
        let mut controller = RequestController::new(config().with_max_response_size(10), connector_of(vec![driver]));

        controller.start(get()).unwrap();
        wait_finished(&controller);

        assert!(controller.result().is_err());
        assert_eq!(controller.buffer(), b"0123456789");
        assert!(matches!(controller.transport_error(), Some(TransportError::ResponseTooLarge { limit: 10 })));
    }

    #[test]
    fn headers_are_collected_when_enabled() {
        let script = || {
            FakeDriver::scripted(vec![
                Step::Header("x-dup", "first"),
                Step::Header("x-dup", "second"),
                Step::Header("content-type", "text/plain"),
                Step::Done,
            ])
            .0
        };

        let mut controller = controller_with(script());
        controller.start(get()).unwrap();
        wait_finished(&controller);
        assert!(controller.response_headers().is_empty());

        let mut controller = RequestController::new(config().with_collect_headers(true), connector_of(vec![script()]));
        controller.start(get()).unwrap();
        wait_finished(&controller);

        let headers = controller.take_response_headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-dup").unwrap(), "second");
        assert!(controller.response_headers().is_empty());
    }

    #[test]
    fn header_failure_does_not_enqueue() {
        let (driver, _probe) = FakeDriver::responding(b"");
        let mut controller = controller_with(driver.rejecting_header("x-bad"));

        let err = controller.start(get().header("x-bad", "1")).unwrap_err();

        assert!(matches!(err, RequestError::Header { ref key, .. } if key == "x-bad"));
        assert_eq!(err.kind(), ErrorKind::Setup);
        assert!(!controller.in_progress());
    }

    #[test]
    fn rejected_setup_does_not_reach_the_next_request() {
        let (first, first_probe) = FakeDriver::responding(b"");
        let (second, second_probe) = FakeDriver::responding(b"ok");
        let mut controller =
            RequestController::new(config(), connector_of(vec![first.rejecting_header("x-bad"), second]));

        let err = controller.start(get().header("x-stale", "1").header("x-bad", "1")).unwrap_err();
        assert!(matches!(err, RequestError::Header { ref key, .. } if key == "x-bad"));
        assert_eq!(first_probe.headers(), [("x-stale".to_owned(), "1".to_owned())]);

        controller.retry(RetryOptions::new().header("x-fresh", "2")).unwrap();
        wait_finished(&controller);
        controller.result().unwrap();

        assert_eq!(controller.buffer(), b"ok");
        assert_eq!(first_probe.steps(), 0);
        assert_eq!(second_probe.headers(), [("x-fresh".to_owned(), "2".to_owned())]);
    }

    #[test]
    fn short_body_write_is_rejected() {
        let (driver, _probe) = FakeDriver::responding(b"");
        let mut controller = controller_with(driver.with_short_write(3));

        let err = controller.start(get().body("payload")).unwrap_err();

        assert!(matches!(err, RequestError::BodyWrite { .. }));
        assert!(err.to_string().contains("wrote 3 of 7"));
        assert!(!controller.in_progress());
    }

    #[test]
    fn construction_failure_is_reported() {
        let mut connector = MockConnector::new();
        connector.expect_connect().times(1).returning(|_| Err(TransportError::invalid_url("nope")));
        let mut controller = RequestController::new(config(), Arc::new(connector));

        let err = controller.start(get()).unwrap_err();

        assert!(matches!(err, RequestError::Construction { .. }));
        assert!(!controller.in_progress());
    }

    #[test]
    fn client_lifecycle() {
        let (driver, _probe) = FakeDriver::hanging();
        let mut connector = MockConnector::new();
        connector.expect_connect().times(1).return_once(move |config| {
            assert_eq!(config.max_auth_retries, 1);
            assert!(config.is_async);
            Ok(Box::new(driver) as Box<dyn TransportDriver>)
        });
        let mut controller = RequestController::new(config(), Arc::new(connector));

        controller.delete_client().unwrap();
        assert!(matches!(controller.retry(RetryOptions::new()), Err(RequestError::NoClient)));

        controller.create_client("http://fake.test/", Method::GET, TIMEOUT, None).unwrap();
        assert!(matches!(
            controller.create_client("http://fake.test/", Method::GET, TIMEOUT, None),
            Err(RequestError::ClientAlreadyExists)
        ));

        controller.retry(RetryOptions::new()).unwrap();
        assert!(matches!(controller.delete_client(), Err(RequestError::InProgress)));
        assert!(controller.in_progress());

        controller.abort().unwrap();
        wait_finished(&controller);
        controller.delete_client().unwrap();
        controller.delete_client().unwrap();
    }

    #[test]
    fn retry_rebuilds_discarded_driver_with_overrides() {
        let (first, first_probe) = FakeDriver::responding(b"one");
        let (second, second_probe) = FakeDriver::responding(b"two");
        let configs: Arc<Mutex<Vec<ClientConfig>>> = Arc::default();
        let seen = Arc::clone(&configs);
        let drivers = Mutex::new(VecDeque::from(vec![first, second]));
        let connector = make_connector(move |config: &ClientConfig| {
            seen.lock().unwrap().push(config.clone());
            let driver = drivers.lock().unwrap().pop_front().ok_or_else(|| TransportError::other("no more drivers"))?;
            Ok(Box::new(driver) as Box<dyn TransportDriver>)
        });
        let mut controller = RequestController::new(config(), Arc::new(connector));

        controller.create_client("http://fake.test/a", Method::GET, TIMEOUT, None).unwrap();
        controller.retry(RetryOptions::new()).unwrap();
        wait_finished(&controller);
        controller.result().unwrap();
        assert_eq!(controller.buffer(), b"one");

        controller.retry(RetryOptions::new().url("http://fake.test/b").method(Method::POST)).unwrap();
        wait_finished(&controller);
        controller.result().unwrap();
        assert_eq!(controller.buffer(), b"two");

        let configs = configs.lock().unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].url, "http://fake.test/b");
        assert_eq!(configs[1].method, Method::POST);
        assert_eq!(first_probe.closes(), 1);
        assert_eq!(second_probe.steps(), 2);
    }

    #[test]
    fn reused_driver_receives_overrides() {
        let (driver, probe) = FakeDriver::scripted(vec![Step::Done, Step::Done]);
        let mut controller = RequestController::new(config().with_reuse_driver(true), connector_of(vec![driver]));

        controller.create_client("http://fake.test/", Method::GET, TIMEOUT, None).unwrap();
        controller.retry(RetryOptions::new()).unwrap();
        wait_finished(&controller);
        controller.result().unwrap();

        controller
            .retry(RetryOptions::new().url("http://fake.test/again").timeout(Duration::from_secs(1)))
            .unwrap();
        wait_finished(&controller);
        controller.result().unwrap();

        assert_eq!(probe.url().as_deref(), Some("http://fake.test/again"));
        assert_eq!(probe.timeout(), Some(Duration::from_secs(1)));
        assert_eq!(probe.method(), None);
        assert_eq!(probe.closes(), 2);
    }

    #[test]
    fn failed_close_discards_a_reusable_driver() {
        let (first, _) = FakeDriver::responding(b"");
        let (second, second_probe): (FakeDriver, Probe) = FakeDriver::responding(b"");
        let mut controller = RequestController::new(
            config().with_reuse_driver(true),
            connector_of(vec![first.with_failing_close(), second]),
        );

        controller.create_client("http://fake.test/", Method::GET, TIMEOUT, None).unwrap();
        controller.retry(RetryOptions::new()).unwrap();
        wait_finished(&controller);
        controller.result().unwrap();

        controller.retry(RetryOptions::new()).unwrap();
        wait_finished(&controller);
        controller.result().unwrap();
        assert_eq!(second_probe.closes(), 1);
    }

    #[test]
    fn transport_failure_is_reported() {
        let (driver, _probe) = FakeDriver::scripted(vec![Step::Retry, Step::Fail]);
        let mut controller = controller_with(driver);

        controller.start(get()).unwrap();
        wait_finished(&controller);

        let err = controller.result().unwrap_err();
        assert!(matches!(err, RequestError::RequestFailed { .. }));
        assert!(matches!(controller.transport_error(), Some(TransportError::ConnectionClosed)));
    }

    #[test]
    fn drop_aborts_and_stops_the_worker() {
        let (driver, probe) = FakeDriver::hanging();
        let mut controller = controller_with(driver);
        controller.start(get()).unwrap();

        let flags = Arc::clone(&controller.flags);
        drop(controller);

        let bits = flags.get();
        assert!(!bits.contains(Flag::TaskRunning));
        assert!(bits.contains(Flag::RequestFinished));
        assert_eq!(probe.closes(), 1);
    }
}
