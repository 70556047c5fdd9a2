//! Spawning of the worker thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::worker::{Job, Worker};
use crate::protocol::RequestError;
use crate::signal::SignalFlags;

/// Builds the worker's runtime and starts its thread.
///
/// The runtime is built before the thread so that both failures surface here as
/// [`RequestError::TaskCreation`].
pub(crate) fn spawn(
    config: &EngineConfig,
    flags: Arc<SignalFlags>,
    jobs: mpsc::UnboundedReceiver<Job>,
) -> Result<JoinHandle<()>, RequestError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(RequestError::task_creation)?;

    let core = config.core_affinity;
    debug!(name = %config.task_name, stack_size = config.stack_size, core = ?core, "spawning worker thread");

    thread::Builder::new()
        .name(config.task_name.clone())
        .stack_size(config.stack_size)
        .spawn(move || {
            if let Some(core) = core {
                if let Err(e) = pin_to_core(core) {
                    warn!(core, cause = %e, "failed to pin worker thread, running unpinned");
                }
            }
            Worker::new(flags, jobs, runtime).run();
        })
        .map_err(RequestError::task_creation)
}

/// Pin the current thread to a specific CPU core.
#[cfg(target_os = "linux")]
fn pin_to_core(core: usize) -> io::Result<()> {
    // SAFETY: cpu_set_t is plain data, zeroed is its empty set, and the pointer passed to
    // sched_setaffinity is valid for the size given.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(_core: usize) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "core affinity is only supported on linux"))
}
