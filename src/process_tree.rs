//! Killing a process together with everything it spawned.
use std::collections::{HashMap, VecDeque};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{Pid, getpgid},
};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::TerminationError;

/// What happened when a single PID was signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The kill signal was delivered.
    Killed,
    /// No such process; it had already exited.
    AlreadyGone,
}

/// Result of tearing down one process tree.
#[derive(Debug, Default)]
pub struct TreeTermination {
    /// PIDs the kill signal was delivered to, root first.
    pub killed: Vec<u32>,
    /// PIDs that no longer existed.
    pub already_gone: Vec<u32>,
    /// Failures; one PID failing does not stop the others.
    pub errors: Vec<TerminationError>,
}

impl TreeTermination {
    fn record(&mut self, pid: u32, result: Result<TerminateOutcome, TerminationError>) {
        match result {
            Ok(TerminateOutcome::Killed) => self.killed.push(pid),
            Ok(TerminateOutcome::AlreadyGone) => self.already_gone.push(pid),
            Err(err) => self.errors.push(err),
        }
    }
}

/// Platform capability for enumerating and forcefully killing processes.
pub trait ProcessTree: Send + Sync {
    /// All live descendants of `pid` (children, grandchildren, ...), excluding `pid`.
    fn list_descendants(&self, pid: u32) -> Vec<u32>;

    /// Forcefully kills one process.
    fn terminate(&self, pid: u32) -> Result<TerminateOutcome, TerminationError>;

    /// Kills `root` and all of its descendants.
    ///
    /// Descendants are enumerated before anything is signalled, since killing the root
    /// re-parents its children and hides them from the walk.
    fn terminate_tree(&self, root: u32) -> TreeTermination {
        let descendants = self.list_descendants(root);
        let mut outcome = TreeTermination::default();
        for pid in std::iter::once(root).chain(descendants) {
            outcome.record(pid, self.terminate(pid));
        }
        outcome
    }
}

/// Unix implementation: sysinfo for the tree walk and `SIGKILL` for termination.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProcessTree;

impl SignalProcessTree {
    /// Creates the signal-based process tree capability.
    pub fn new() -> Self {
        Self
    }

    /// Kills the process group led by `root`, if `root` leads its own group.
    fn kill_group(&self, root: u32) {
        let root_pid = Pid::from_raw(root as i32);
        let Ok(group) = getpgid(Some(root_pid)) else {
            return;
        };
        let own_group = getpgid(None).ok();

        if group != root_pid || Some(group) == own_group {
            return;
        }

        match signal::killpg(group, Signal::SIGKILL) {
            Ok(()) => debug!("Sent SIGKILL to process group {group}"),
            Err(Errno::ESRCH) => {}
            Err(err) => warn!("Failed to kill process group {group}: {err}"),
        }
    }
}

impl ProcessTree for SignalProcessTree {
    fn list_descendants(&self, pid: u32) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (proc_pid, process) in system.processes() {
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .push(proc_pid.as_u32());
            }
        }

        descendants_of(pid, &children)
    }

    fn terminate(&self, pid: u32) -> Result<TerminateOutcome, TerminationError> {
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => Ok(TerminateOutcome::Killed),
            Err(Errno::ESRCH) => Ok(TerminateOutcome::AlreadyGone),
            Err(Errno::EPERM) => Err(TerminationError::PermissionDenied { pid }),
            Err(source) => Err(TerminationError::Signal { pid, source }),
        }
    }

    fn terminate_tree(&self, root: u32) -> TreeTermination {
        let descendants = self.list_descendants(root);
        debug!("PID {root} has {} descendant(s)", descendants.len());

        self.kill_group(root);

        let mut outcome = TreeTermination::default();
        for pid in std::iter::once(root).chain(descendants) {
            outcome.record(pid, self.terminate(pid));
        }
        outcome
    }
}

/// Breadth-first walk of a parent -> children map, excluding `root` itself.
fn descendants_of(root: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);

    while let Some(current) = queue.pop_front() {
        if let Some(kids) = children.get(&current) {
            for &kid in kids {
                if kid != root && !found.contains(&kid) {
                    found.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }

    found
}
