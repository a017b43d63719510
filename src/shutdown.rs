//! Ties supervisor teardown to the host's shutdown event.
use std::sync::{
    Arc, Mutex, MutexGuard, Once,
    mpsc::{self, Receiver, TryRecvError},
};

use tracing::{debug, info, warn};

use crate::{
    error::LauncherError,
    supervisor::{EntryOutcome, ProcessSupervisor, ShutdownReport},
};

struct Inner {
    supervisor: Mutex<ProcessSupervisor>,
    done: Once,
    report: Mutex<Option<ShutdownReport>>,
}

impl Inner {
    fn run_once(&self) -> bool {
        let mut ran = false;
        self.done.call_once(|| {
            ran = true;
            let report = lock(&self.supervisor).shutdown();
            log_report(&report);
            *lock(&self.report) = Some(report);
        });
        ran
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.run_once() {
            debug!("Supervisor torn down on drop");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn log_report(report: &ShutdownReport) {
    for entry in &report.entries {
        match entry.outcome {
            EntryOutcome::Exited { code } => {
                debug!("'{}' had already exited (code {code:?})", entry.name)
            }
            EntryOutcome::Terminated => debug!("'{}' terminated", entry.name),
            EntryOutcome::TerminationUnconfirmed => {
                warn!("'{}' may still be running (PID {})", entry.name, entry.pid)
            }
            EntryOutcome::LeftRunning => debug!("'{}' left running", entry.name),
        }
    }
    info!("Teardown complete for {} process(es)", report.entries.len());
}

/// Runs [`ProcessSupervisor::shutdown`] exactly once, whichever of the signal handler, an
/// explicit [`trigger`](Self::trigger) or dropping the last handle gets there first.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Takes ownership of a supervisor whose entries have been launched.
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        Self {
            inner: Arc::new(Inner {
                supervisor: Mutex::new(supervisor),
                done: Once::new(),
                report: Mutex::new(None),
            }),
        }
    }

    /// Tears the supervisor down. Returns `true` only for the call that did the work;
    /// concurrent callers block until teardown has finished.
    pub fn trigger(&self) -> bool {
        self.inner.run_once()
    }

    /// Takes the teardown report, once available.
    pub fn take_report(&self) -> Option<ShutdownReport> {
        lock(&self.inner.report).take()
    }
}

/// Receiving end of the host shutdown event.
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    /// Routes SIGINT/SIGTERM into the returned signal instead of terminating the process.
    ///
    /// Install before launching: a signal that arrives mid-launch stays queued here.
    /// Teardown runs on the thread that waits on the signal, not in the handler.
    /// Only one handler can be installed per process.
    pub fn install() -> Result<Self, LauncherError> {
        let (tx, rx) = mpsc::channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })?;
        debug!("Shutdown signal handler installed");
        Ok(Self { rx })
    }

    /// Whether a signal has already arrived, without blocking.
    pub fn received(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Blocks until the host is asked to stop.
    pub fn wait(&self) {
        if self.rx.recv().is_err() {
            warn!("Shutdown signal channel closed");
        }
    }
}
