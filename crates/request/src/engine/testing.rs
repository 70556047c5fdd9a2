//! A scripted transport driver for the engine tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::protocol::TransportError;
use crate::transport::{Pending, Readiness, ResponseSink, StepOutcome, TransportDriver};

/// One entry of a driver script. Events are delivered in the same step up to the next
/// `Retry`, `Done` or `Fail`. Once the script runs out every step retries.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    Header(&'static str, &'static str),
    Data(&'static [u8]),
    Retry,
    Done,
    Fail,
}

#[derive(Debug, Default)]
struct Recorded {
    steps: usize,
    closes: usize,
    url: Option<String>,
    method: Option<Method>,
    timeout: Option<Duration>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// Shared view of what a [`FakeDriver`] was asked to do.
#[derive(Debug, Clone, Default)]
pub(crate) struct Probe {
    recorded: Arc<Mutex<Recorded>>,
}

impl Probe {
    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        f(&mut self.recorded.lock().unwrap())
    }

    pub(crate) fn steps(&self) -> usize {
        self.with(|r| r.steps)
    }

    pub(crate) fn closes(&self) -> usize {
        self.with(|r| r.closes)
    }

    pub(crate) fn url(&self) -> Option<String> {
        self.with(|r| r.url.clone())
    }

    pub(crate) fn method(&self) -> Option<Method> {
        self.with(|r| r.method.clone())
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.with(|r| r.timeout)
    }

    pub(crate) fn headers(&self) -> Vec<(String, String)> {
        self.with(|r| r.headers.clone())
    }

    pub(crate) fn body(&self) -> Vec<u8> {
        self.with(|r| r.body.clone())
    }
}

#[derive(Debug)]
pub(crate) struct FakeDriver {
    script: VecDeque<Step>,
    status: Option<StatusCode>,
    readiness_delay: Option<Duration>,
    accept_bytes: Option<usize>,
    reject_header: Option<&'static str>,
    fail_close: bool,
    probe: Probe,
}

impl FakeDriver {
    pub(crate) fn scripted(steps: Vec<Step>) -> (Self, Probe) {
        let probe = Probe::default();
        let driver = Self {
            script: steps.into(),
            status: Some(StatusCode::OK),
            readiness_delay: None,
            accept_bytes: None,
            reject_header: None,
            fail_close: false,
            probe: probe.clone(),
        };
        (driver, probe)
    }

    /// A driver whose response is `body` with status 200.
    pub(crate) fn responding(body: &'static [u8]) -> (Self, Probe) {
        Self::scripted(vec![Step::Retry, Step::Data(body), Step::Done])
    }

    /// A driver that never completes on its own.
    pub(crate) fn hanging() -> (Self, Probe) {
        Self::scripted(Vec::new())
    }

    pub(crate) fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// `ready()` waits this long and reports a readiness source.
    pub(crate) fn with_readiness_delay(mut self, delay: Duration) -> Self {
        self.readiness_delay = Some(delay);
        self
    }

    /// `write()` accepts at most this many bytes.
    pub(crate) fn with_short_write(mut self, accept_bytes: usize) -> Self {
        self.accept_bytes = Some(accept_bytes);
        self
    }

    pub(crate) fn rejecting_header(mut self, key: &'static str) -> Self {
        self.reject_header = Some(key);
        self
    }

    pub(crate) fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[async_trait]
impl TransportDriver for FakeDriver {
    fn set_url(&mut self, url: &str) -> Result<(), TransportError> {
        self.probe.with(|r| r.url = Some(url.to_owned()));
        Ok(())
    }

    fn set_method(&mut self, method: &Method) -> Result<(), TransportError> {
        self.probe.with(|r| r.method = Some(method.clone()));
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.probe.with(|r| r.timeout = Some(timeout));
        Ok(())
    }

    fn set_header(&mut self, key: &str, value: &str) -> Result<(), TransportError> {
        if self.reject_header == Some(key) {
            return Err(TransportError::invalid_header(key));
        }
        self.probe.with(|r| r.headers.push((key.to_owned(), value.to_owned())));
        Ok(())
    }

    fn open(&mut self, _body_len: usize) -> Result<(), TransportError> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let accepted = self.accept_bytes.map_or(data.len(), |limit| limit.min(data.len()));
        self.probe.with(|r| r.body.extend_from_slice(&data[..accepted]));
        Ok(accepted)
    }

    fn perform_step(&mut self, sink: &mut dyn ResponseSink) -> StepOutcome {
        self.probe.with(|r| r.steps += 1);

        while let Some(step) = self.script.pop_front() {
            match step {
                Step::Header(name, value) => {
                    sink.on_header(&HeaderName::from_static(name), &HeaderValue::from_static(value));
                }
                Step::Data(data) => {
                    if let Err(e) = sink.on_data(data) {
                        return StepOutcome::Failed(e.into());
                    }
                }
                Step::Retry => return StepOutcome::RetryLater(Pending::WouldBlock),
                Step::Done => return StepOutcome::Done,
                Step::Fail => return StepOutcome::Failed(TransportError::ConnectionClosed),
            }
        }

        StepOutcome::RetryLater(Pending::InProgress)
    }

    async fn ready(&mut self) -> Result<Readiness, TransportError> {
        match self.readiness_delay {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Readiness::Ready)
            }
            None => Ok(Readiness::Unknown),
        }
    }

    fn status_code(&self) -> Option<StatusCode> {
        self.status
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.probe.with(|r| r.closes += 1);
        if self.fail_close {
            return Err(TransportError::other("close failed"));
        }
        Ok(())
    }
}
