//! Launching configured processes and tearing them down when the host exits.
use std::{
    env, io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::{
    config::ProcessEntry,
    error::{LaunchError, TerminationError},
    logs::{LogSink, OutputChannel, log_file_name, spawn_output_reader},
    process_tree::{ProcessTree, SignalProcessTree},
    runtime::LauncherPaths,
};

/// How long shutdown waits for a killed process to be reaped.
pub const TERMINATION_TIMEOUT: Duration = Duration::from_secs(2);

/// How long shutdown lets output readers flush buffered lines before closing the log.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Presentation requested for the launched program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStyle {
    /// Default presentation.
    Normal,
    /// Start minimized. Unix has no equivalent; the hint is only logged.
    Minimized,
    /// Console program without a window: uncaptured output is discarded.
    Hidden,
}

impl WindowStyle {
    /// Derives the style from the entry's `hide_window` and `minimized` flags.
    pub fn for_entry(entry: &ProcessEntry) -> Self {
        if entry.hide_window {
            WindowStyle::Hidden
        } else if entry.minimized {
            WindowStyle::Minimized
        } else {
            WindowStyle::Normal
        }
    }
}

/// Everything needed to spawn one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments split from the entry's argument string.
    pub args: Vec<String>,
    /// Directory the process starts in.
    pub working_dir: PathBuf,
    /// Window presentation.
    pub window: WindowStyle,
    /// Pipe stdout/stderr back to the supervisor.
    pub capture_output: bool,
}

impl LaunchRequest {
    /// Builds the request for `entry`, starting in `default_dir` unless the entry overrides it.
    pub fn from_entry(entry: &ProcessEntry, default_dir: &Path) -> Result<Self, LaunchError> {
        let name = entry.resolved_name();
        let program = entry.path.trim();
        if program.is_empty() {
            return Err(LaunchError::MissingPath { name });
        }

        let args = shell_words::split(&entry.arguments)
            .map_err(|source| LaunchError::InvalidArguments { name, source })?;

        Ok(Self {
            program: PathBuf::from(program),
            args,
            working_dir: entry
                .working_dir()
                .unwrap_or_else(|| default_dir.to_path_buf()),
            window: WindowStyle::for_entry(entry),
            capture_output: entry.capture_output,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null());

        if self.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else if self.window == WindowStyle::Hidden {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        unsafe {
            cmd.pre_exec(|| {
                // Own process group: the whole tree can be signalled at once, and terminal
                // signals aimed at the host do not reach processes meant to outlive it.
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd
    }
}

/// A process started by the supervisor.
#[derive(Debug)]
pub struct LaunchedEntry {
    spec: Arc<ProcessEntry>,
    name: String,
    child: Child,
    sink: Option<LogSink>,
    readers: Vec<JoinHandle<()>>,
    launched_at: DateTime<Local>,
}

impl LaunchedEntry {
    /// Resolved display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Log file receiving this entry's output, if logging is active.
    pub fn log_path(&self) -> Option<&Path> {
        self.sink.as_ref().map(LogSink::path)
    }

    /// When the process was started.
    pub fn launched_at(&self) -> DateTime<Local> {
        self.launched_at
    }
}

/// Final state of an entry after shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// The process had already exited on its own.
    Exited {
        /// Exit code, if it exited normally.
        code: Option<i32>,
    },
    /// The process tree was killed and the root reaped.
    Terminated,
    /// Kill was attempted but the root was not reaped within the timeout.
    TerminationUnconfirmed,
    /// Left running on purpose (`kill_on_shutdown = false`).
    LeftRunning,
}

/// Shutdown result for one entry.
#[derive(Debug)]
pub struct EntryReport {
    /// Resolved entry name.
    pub name: String,
    /// Process id of the root process.
    pub pid: u32,
    /// What happened to the process.
    pub outcome: EntryOutcome,
    /// Non-fatal termination failures.
    pub termination_errors: Vec<TerminationError>,
    /// Failure flushing the log file, if any.
    pub log_close_error: Option<io::Error>,
}

/// Shutdown results, in launch order.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// One report per entry that was still tracked.
    pub entries: Vec<EntryReport>,
}

impl ShutdownReport {
    /// Looks up the report for an entry name.
    pub fn get(&self, name: &str) -> Option<&EntryReport> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Whether every entry was handled without errors.
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|entry| {
            entry.termination_errors.is_empty()
                && entry.log_close_error.is_none()
                && entry.outcome != EntryOutcome::TerminationUnconfirmed
        })
    }
}

/// Owns the processes launched for one host run.
pub struct ProcessSupervisor {
    log_dir: PathBuf,
    default_working_dir: PathBuf,
    tree: Arc<dyn ProcessTree>,
    termination_timeout: Duration,
    teardown_stack_size: Option<usize>,
    entries: Vec<LaunchedEntry>,
}

impl ProcessSupervisor {
    /// Creates a supervisor writing logs to `log_dir` and starting processes in
    /// `default_working_dir` unless an entry says otherwise.
    pub fn new(log_dir: impl Into<PathBuf>, default_working_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            default_working_dir: default_working_dir.into(),
            tree: Arc::new(SignalProcessTree::new()),
            termination_timeout: TERMINATION_TIMEOUT,
            teardown_stack_size: None,
            entries: Vec::new(),
        }
    }

    /// Supervisor for the given runtime layout, defaulting to the host's current directory.
    pub fn from_paths(paths: &LauncherPaths) -> io::Result<Self> {
        Ok(Self::new(paths.log_dir.clone(), env::current_dir()?))
    }

    /// Replaces the process-tree capability used at shutdown.
    pub fn with_process_tree(mut self, tree: Arc<dyn ProcessTree>) -> Self {
        self.tree = tree;
        self
    }

    /// Overrides how long shutdown waits for each killed process.
    pub fn with_termination_timeout(mut self, timeout: Duration) -> Self {
        self.termination_timeout = timeout;
        self
    }

    /// Currently tracked entries, in launch order.
    pub fn entries(&self) -> &[LaunchedEntry] {
        &self.entries
    }

    /// Launches every enabled entry, in order, and returns the ones that started.
    ///
    /// Failures are logged and never stop the remaining entries.
    pub fn launch(&mut self, entries: &[ProcessEntry]) -> &[LaunchedEntry] {
        let first_new = self.entries.len();

        for entry in entries {
            if !entry.enabled {
                debug!("Skipping disabled entry '{}'", entry.resolved_name());
                continue;
            }

            match self.launch_entry(entry) {
                Ok(launched) => {
                    info!(
                        "Launch: Name:{}, Path:{}, Args:{}, PID:{}",
                        launched.name,
                        entry.path,
                        entry.arguments,
                        launched.pid()
                    );
                    self.entries.push(launched);
                }
                Err(err) => error!("Failed to launch process: {err}"),
            }
        }

        &self.entries[first_new..]
    }

    fn launch_entry(&self, entry: &ProcessEntry) -> Result<LaunchedEntry, LaunchError> {
        let name = entry.resolved_name();
        let mut request = LaunchRequest::from_entry(entry, &self.default_working_dir)?;

        if request.window == WindowStyle::Minimized {
            debug!("'{name}' requested a minimized window; ignored on this platform");
        }

        let launched_at = Local::now();
        let sink = if request.capture_output {
            let path = self.log_dir.join(log_file_name(&name, &launched_at));
            match LogSink::open(&path) {
                Ok(sink) => Some(sink),
                Err(err) => {
                    error!("Failed to open log file for '{name}': {err}");
                    None
                }
            }
        } else {
            None
        };
        // Without a sink nobody would drain the pipes.
        request.capture_output = sink.is_some();

        debug!(
            "Executing {:?} {:?} in {:?}",
            request.program, request.args, request.working_dir
        );
        let mut child = match request.command().spawn() {
            Ok(child) => child,
            Err(source) => {
                if let Some(sink) = &sink {
                    let _ = sink.close();
                }
                return Err(LaunchError::Spawn {
                    name,
                    path: entry.path.clone(),
                    source,
                });
            }
        };

        let mut readers = Vec::new();
        if let Some(sink) = &sink {
            if let Some(stdout) = child.stdout.take() {
                start_reader(&name, stdout, OutputChannel::Stdout, sink, &mut readers);
            }
            if let Some(stderr) = child.stderr.take() {
                start_reader(&name, stderr, OutputChannel::Stderr, sink, &mut readers);
            }
        }

        Ok(LaunchedEntry {
            spec: Arc::new(entry.clone()),
            name,
            child,
            sink,
            readers,
            launched_at,
        })
    }

    /// Tears down every tracked entry and returns what happened to each.
    ///
    /// Entries are handled in parallel and independently; a failure on one never prevents
    /// the others from being visited. Calling this again finds nothing left to do.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let entries = std::mem::take(&mut self.entries);
        if entries.is_empty() {
            return ShutdownReport::default();
        }
        info!("Shutting down {} launched process(es)", entries.len());

        let this = &*self;
        let slots: Vec<Mutex<Option<LaunchedEntry>>> = entries
            .into_iter()
            .map(|entry| Mutex::new(Some(entry)))
            .collect();

        let reports: Vec<EntryReport> = thread::scope(|scope| {
            let spawned: Vec<_> = slots
                .iter()
                .map(|slot| {
                    let (name, pid) = lock(slot)
                        .as_ref()
                        .map(|entry| (entry.name.clone(), entry.pid()))
                        .unwrap_or_default();
                    let mut builder = thread::Builder::new().name(format!("{name}-shutdown"));
                    if let Some(size) = this.teardown_stack_size {
                        builder = builder.stack_size(size);
                    }
                    let handle = builder.spawn_scoped(scope, move || this.shutdown_slot(slot));
                    (name, pid, handle)
                })
                .collect();

            slots
                .iter()
                .zip(spawned)
                .filter_map(|(slot, (name, pid, handle))| match handle {
                    Ok(handle) => match handle.join() {
                        Ok(report) => report,
                        Err(_) => {
                            error!("Shutdown of '{name}' (PID {pid}) panicked");
                            None
                        }
                    },
                    Err(err) => {
                        warn!("No shutdown thread for '{name}' ({err}); tearing down inline");
                        this.shutdown_slot(slot)
                    }
                })
                .collect()
        });

        ShutdownReport { entries: reports }
    }

    fn shutdown_slot(&self, slot: &Mutex<Option<LaunchedEntry>>) -> Option<EntryReport> {
        let entry = lock(slot).take()?;
        Some(self.shutdown_entry(entry))
    }

    fn shutdown_entry(&self, mut entry: LaunchedEntry) -> EntryReport {
        let name = entry.name.clone();
        let pid = entry.pid();
        let mut termination_errors = Vec::new();

        let exit_status = match entry.child.try_wait() {
            Ok(status) => status,
            Err(err) => {
                warn!("Failed to query '{name}' (PID {pid}): {err}");
                None
            }
        };

        let outcome = match exit_status {
            Some(status) => {
                debug!("'{name}' already exited with {status}");
                EntryOutcome::Exited {
                    code: status.code(),
                }
            }
            None if entry.spec.kill_on_shutdown => {
                info!("Killing '{name}' (PID {pid}) and its descendants");
                let result = self.tree.terminate_tree(pid);
                for err in &result.errors {
                    warn!("Failed to terminate part of '{name}': {err}");
                }
                termination_errors.extend(result.errors);

                match wait_with_timeout(&mut entry.child, self.termination_timeout) {
                    Ok(Some(_)) => EntryOutcome::Terminated,
                    Ok(None) => {
                        warn!(
                            "'{name}' (PID {pid}) not reaped within {:?}; reaping in background",
                            self.termination_timeout
                        );
                        reap_in_background(&name, entry.child);
                        EntryOutcome::TerminationUnconfirmed
                    }
                    Err(source) => {
                        let err = TerminationError::Reap { pid, source };
                        warn!("{err}");
                        termination_errors.push(err);
                        EntryOutcome::TerminationUnconfirmed
                    }
                }
            }
            None => {
                info!("Leaving '{name}' (PID {pid}) running");
                EntryOutcome::LeftRunning
            }
        };

        if outcome != EntryOutcome::LeftRunning {
            drain_readers(&mut entry.readers, DRAIN_TIMEOUT);
        }

        let log_close_error = entry.sink.as_ref().and_then(|sink| match sink.close() {
            Ok(()) => None,
            Err(err) => {
                warn!("Failed to close log for '{name}': {err}");
                Some(err)
            }
        });

        EntryReport {
            name,
            pid,
            outcome,
            termination_errors,
            log_close_error,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn start_reader<R>(
    name: &str,
    stream: R,
    channel: OutputChannel,
    sink: &LogSink,
    readers: &mut Vec<JoinHandle<()>>,
) where
    R: io::Read + Send + 'static,
{
    match spawn_output_reader(name, stream, channel, sink.clone()) {
        Ok(handle) => readers.push(handle),
        Err(err) => warn!(
            "Failed to start {} reader for '{name}': {err}",
            channel.stream_name()
        ),
    }
}

/// Wait for a child process with a timeout, returning `Ok(None)` on timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn reap_in_background(name: &str, mut child: Child) {
    let label = format!("{name}-reaper");
    let spawned = thread::Builder::new().name(label).spawn(move || {
        let pid = child.id();
        match child.wait() {
            Ok(status) => debug!("Reaped PID {pid}: {status}"),
            Err(err) => debug!("Failed to reap PID {pid}: {err}"),
        }
    });
    if let Err(err) = spawned {
        warn!("Failed to start reaper for '{name}': {err}");
    }
}

/// Gives reader threads a bounded window to hit EOF, then joins the finished ones.
/// Unfinished readers stay detached and drop their lines once the sink closes.
fn drain_readers(readers: &mut Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while readers.iter().any(|reader| !reader.is_finished()) && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }

    for reader in readers.drain(..) {
        if reader.is_finished() {
            let _ = reader.join();
        }
    }
}
