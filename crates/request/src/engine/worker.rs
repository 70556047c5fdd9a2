//! The body of the worker thread.
//!
//! The worker sleeps on the signal register until a request is queued or the
//! controller asks it to stop. A queued request arrives as a [`Job`] over the
//! job channel; the worker drives its transport to completion on a
//! single-threaded tokio runtime and answers with an [`Outcome`].

use std::sync::Arc;

use http::StatusCode;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::accumulator::ResponseAccumulator;
use crate::config::BackoffConfig;
use crate::protocol::TransportError;
use crate::protocol::state::{self, Pickup};
use crate::signal::{Flag, SignalFlags};
use crate::transport::{Readiness, StepOutcome, TransportDriver};

/// Everything the worker needs for one request, handed over by value.
pub(crate) struct Job {
    pub(crate) driver: Box<dyn TransportDriver>,
    pub(crate) accumulator: ResponseAccumulator,
    pub(crate) cancel: CancellationToken,
    pub(crate) reply: oneshot::Sender<Outcome>,
    pub(crate) reuse_driver: bool,
    pub(crate) backoff: BackoffConfig,
}

/// What came of a request. Sent back before the request is marked finished.
pub(crate) struct Outcome {
    pub(crate) result: Result<(), TransportError>,
    pub(crate) status: Option<StatusCode>,
    pub(crate) accumulator: ResponseAccumulator,
    /// The closed driver, when it may serve the next request.
    pub(crate) driver: Option<Box<dyn TransportDriver>>,
}

pub(crate) struct Worker {
    flags: Arc<SignalFlags>,
    jobs: mpsc::UnboundedReceiver<Job>,
    runtime: Runtime,
}

impl Worker {
    pub(crate) fn new(flags: Arc<SignalFlags>, jobs: mpsc::UnboundedReceiver<Job>, runtime: Runtime) -> Self {
        Self { flags, jobs, runtime }
    }

    pub(crate) fn run(mut self) {
        let flags = Arc::clone(&self.flags);
        let _task = TaskGuard::enter(&flags);
        info!("worker task running");

        loop {
            self.flags.wait(Flag::StartRequest | Flag::EndTask, false, None);

            match self.flags.update(state::pickup) {
                Pickup::Request => self.serve(),
                Pickup::End => break,
                Pickup::Spurious => continue,
            }
        }

        info!("worker task ending");
    }

    fn serve(&mut self) {
        let _request = RequestGuard { flags: &self.flags };

        let Some(job) = self.jobs.blocking_recv() else {
            error!("request started but the job channel is closed");
            return;
        };

        let Job { mut driver, mut accumulator, cancel, reply, reuse_driver, backoff } = job;

        let result = self.runtime.block_on(drive(driver.as_mut(), &mut accumulator, &self.flags, &cancel, backoff));
        let status = driver.status_code();

        match &result {
            Ok(()) => debug!(status = ?status, bytes = accumulator.body().len(), "request completed"),
            Err(e) if e.is_aborted() => info!("request aborted"),
            Err(e) => warn!(cause = %e, "request failed"),
        }

        let driver = match driver.close() {
            Ok(()) if reuse_driver => Some(driver),
            Ok(()) => None,
            Err(e) => {
                warn!(cause = %e, "failed closing transport, discarding it");
                None
            }
        };

        if reply.send(Outcome { result, status, accumulator, driver }).is_err() {
            debug!("controller went away, dropping request outcome");
        }
    }
}

/// Steps the driver until it is done, fails, or the request is aborted.
pub(crate) async fn drive(
    driver: &mut dyn TransportDriver,
    sink: &mut ResponseAccumulator,
    flags: &SignalFlags,
    cancel: &CancellationToken,
    backoff: BackoffConfig,
) -> Result<(), TransportError> {
    let mut delays = backoff.delays();

    loop {
        if flags.update(state::take_abort) {
            return Err(TransportError::Aborted);
        }

        match driver.perform_step(sink) {
            StepOutcome::Done => return Ok(()),
            StepOutcome::Failed(e) => return Err(e),
            StepOutcome::RetryLater(pending) => {
                trace!(?pending, "request step incomplete");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    readiness = driver.ready() => match readiness? {
                        Readiness::Ready => delays.reset(),
                        Readiness::Unknown => {
                            tokio::select! {
                                biased;
                                () = cancel.cancelled() => {}
                                () = tokio::time::sleep(delays.next_delay()) => {}
                            }
                        }
                    },
                }
            }
        }
    }
}

/// Marks the worker running for as long as it lives, ended once it is gone.
struct TaskGuard<'a> {
    flags: &'a SignalFlags,
}

impl<'a> TaskGuard<'a> {
    fn enter(flags: &'a SignalFlags) -> Self {
        flags.update(state::worker_started);
        Self { flags }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.flags.update(state::worker_ended);
    }
}

/// Marks the current request finished on every exit path.
struct RequestGuard<'a> {
    flags: &'a SignalFlags,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.flags.update(state::complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FakeDriver, Step};
    use std::time::Duration;

    fn backoff() -> BackoffConfig {
        BackoffConfig { initial_delay: Duration::from_millis(1), max_delay: Duration::from_millis(4), multiplier: 2.0 }
    }

    fn running() -> SignalFlags {
        let flags = SignalFlags::new();
        flags.set(Flag::TaskRunning | Flag::RequestRunning);
        flags
    }

    #[tokio::test]
    async fn drive_retries_until_done() {
        let (mut driver, probe) = FakeDriver::scripted(vec![
            Step::Retry,
            Step::Header("content-length", "5"),
            Step::Data(b"he"),
            Step::Retry,
            Step::Data(b"llo"),
            Step::Done,
        ]);
        let mut sink = ResponseAccumulator::new(64, false);

        let result = drive(&mut driver, &mut sink, &running(), &CancellationToken::new(), backoff()).await;

        assert!(result.is_ok());
        assert_eq!(sink.body(), b"hello");
        assert_eq!(probe.steps(), 3);
    }

    #[tokio::test]
    async fn abort_before_first_step_never_steps() {
        let (mut driver, probe) = FakeDriver::scripted(vec![Step::Done]);
        let flags = running();
        flags.set(Flag::AbortRequest);
        let mut sink = ResponseAccumulator::new(64, false);

        let result = drive(&mut driver, &mut sink, &flags, &CancellationToken::new(), backoff()).await;

        assert!(matches!(result, Err(TransportError::Aborted)));
        assert_eq!(probe.steps(), 0);
        assert!(!flags.get().contains(Flag::AbortRequest));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_wait() {
        let (driver, probe) = FakeDriver::scripted(vec![Step::Retry]);
        let mut driver = driver.with_readiness_delay(Duration::from_secs(30));
        let flags = Arc::new(running());
        let cancel = CancellationToken::new();

        let aborter = {
            let flags = Arc::clone(&flags);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flags.set(Flag::AbortRequest);
                cancel.cancel();
            })
        };

        let mut sink = ResponseAccumulator::new(64, false);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            drive(&mut driver, &mut sink, &flags, &cancel, backoff()),
        )
        .await
        .unwrap();

        aborter.await.unwrap();
        assert!(matches!(result, Err(TransportError::Aborted)));
        assert_eq!(probe.steps(), 1);
    }

    #[tokio::test]
    async fn failed_step_ends_the_request() {
        let (mut driver, _probe) = FakeDriver::scripted(vec![Step::Data(b"0123456789abcde"), Step::Done]);
        let mut sink = ResponseAccumulator::new(10, false);

        let result = drive(&mut driver, &mut sink, &running(), &CancellationToken::new(), backoff()).await;

        assert!(matches!(result, Err(TransportError::ResponseTooLarge { limit: 10 })));
        assert_eq!(sink.body(), b"0123456789");
    }

    #[test]
    fn guards_restore_flags_on_panic() {
        let flags = Arc::new(SignalFlags::new());

        let handle = {
            let flags = Arc::clone(&flags);
            std::thread::spawn(move || {
                let _task = TaskGuard::enter(&flags);
                flags.set(Flag::RequestRunning);
                let _request = RequestGuard { flags: &flags };
                panic!("driver blew up");
            })
        };

        assert!(handle.join().is_err());
        let bits = flags.get();
        assert!(bits.contains(Flag::TaskEnded | Flag::RequestFinished));
        assert!(!bits.intersects(Flag::TaskRunning | Flag::RequestRunning));
    }
}
