//! Process registry and task table
//!
//! Both live behind one mutex. Launch tasks append processes and update
//! their own task phase; teardown closes the registry, signals whatever is
//! still running and cancels tasks that have not started a session.

use std::collections::BTreeMap;
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::process::Child;
use tokio::task::AbortHandle;

use crate::testenv::Role;

/// Registry-local process identifier
pub type ProcessId = u64;

/// What is known about a registered process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Sent a cooperative terminate, exit not yet observed
    Terminating,
    /// Sent a hard kill, exit not yet observed
    Killed,
    /// Exit observed with this code (`None` when ended by a signal)
    Exited(Option<i32>),
}

impl ProcessState {
    /// Exit status not yet known
    pub fn is_live(&self) -> bool {
        !matches!(self, ProcessState::Exited(_))
    }
}

#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub id: ProcessId,
    pub client: String,
    pub pid: Option<u32>,
    pub state: ProcessState,
}

/// Where a launch task is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Submitted, not yet polled
    Pending,
    /// Sleeping through its start delay
    Delaying,
    /// Remote session started
    Running,
    /// Cancelled before its session started
    Cancelled,
    Finished,
}

impl TaskPhase {
    /// Can be cancelled without killing anything
    pub fn is_unstarted(&self) -> bool {
        matches!(self, TaskPhase::Pending | TaskPhase::Delaying)
    }
}

#[derive(Debug)]
struct TaskEntry {
    role: Role,
    phase: TaskPhase,
    abort: Option<AbortHandle>,
}

#[derive(Debug, Default)]
struct Tracking {
    processes: Vec<ProcessEntry>,
    tasks: BTreeMap<String, TaskEntry>,
    next_id: ProcessId,
    closed: bool,
}

/// Outcome of trying to register a freshly started process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered(ProcessId),
    /// Teardown already began; the caller must kill the process itself
    Closed,
}

/// Shared, cloneable handle to the registry
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Tracking>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tracking> {
        // A panic while holding the lock leaves the tables consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Processes ===

    /// Record a started process, unless teardown has begun
    pub fn register_process(&self, client: &str, pid: Option<u32>) -> Registration {
        let mut t = self.lock();
        if t.closed {
            return Registration::Closed;
        }
        let id = t.next_id;
        t.next_id += 1;
        t.processes.push(ProcessEntry {
            id,
            client: client.to_string(),
            pid,
            state: ProcessState::Running,
        });
        if let Some(task) = t.tasks.get_mut(client) {
            task.phase = TaskPhase::Running;
        }
        Registration::Registered(id)
    }

    /// Record an observed exit
    pub fn mark_exited(&self, id: ProcessId, code: Option<i32>) {
        let mut t = self.lock();
        if let Some(entry) = t.processes.iter_mut().find(|p| p.id == id) {
            entry.state = ProcessState::Exited(code);
        }
    }

    /// Check whether `child` has exited and reap it, under the lock
    ///
    /// Signals are only sent while holding the same lock, so a reaped pid is
    /// never signalled. An observed exit is recorded on entry `id`.
    pub fn reap(&self, id: ProcessId, child: &mut Child) -> io::Result<Option<ExitStatus>> {
        let mut t = self.lock();
        let status = child.try_wait()?;
        if let Some(status) = status {
            if let Some(entry) = t.processes.iter_mut().find(|p| p.id == id) {
                entry.state = ProcessState::Exited(status.code());
            }
        }
        Ok(status)
    }

    /// Ask a running process to terminate. Returns whether a signal was sent.
    pub fn terminate(&self, id: ProcessId) -> bool {
        let mut t = self.lock();
        let Some(entry) = t.processes.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if entry.state != ProcessState::Running {
            return false;
        }
        let Some(pid) = entry.pid else {
            return false;
        };
        match signal::terminate(pid) {
            Ok(()) => {
                entry.state = ProcessState::Terminating;
                true
            }
            Err(e) => {
                tracing::warn!(client = %entry.client, pid, "Failed to terminate: {}", e);
                false
            }
        }
    }

    /// Stop accepting registrations
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Hard-kill every process whose exit has not been observed
    ///
    /// Processes already killed are not signalled again. Returns the
    /// clients that were killed and the number of failed kill attempts.
    pub fn kill_live(&self) -> (Vec<String>, usize) {
        let mut t = self.lock();
        let mut killed = Vec::new();
        let mut failures = 0;
        for entry in t.processes.iter_mut() {
            if !matches!(entry.state, ProcessState::Running | ProcessState::Terminating) {
                continue;
            }
            let Some(pid) = entry.pid else {
                continue;
            };
            match signal::kill(pid) {
                Ok(()) => {
                    tracing::info!(client = %entry.client, pid, "Killed process");
                    entry.state = ProcessState::Killed;
                    killed.push(entry.client.clone());
                }
                Err(e) => {
                    tracing::warn!(client = %entry.client, pid, "Failed to kill: {}", e);
                    failures += 1;
                }
            }
        }
        (killed, failures)
    }

    /// Remove every process entry
    pub fn drain_processes(&self) -> Vec<ProcessEntry> {
        std::mem::take(&mut self.lock().processes)
    }

    pub fn process_count(&self) -> usize {
        self.lock().processes.len()
    }

    pub fn live_count(&self) -> usize {
        self.lock()
            .processes
            .iter()
            .filter(|p| p.state.is_live())
            .count()
    }

    // === Tasks ===

    pub fn track_task(&self, client: &str, role: Role) {
        self.lock().tasks.insert(
            client.to_string(),
            TaskEntry {
                role,
                phase: TaskPhase::Pending,
                abort: None,
            },
        );
    }

    pub fn set_abort_handle(&self, client: &str, handle: AbortHandle) {
        if let Some(task) = self.lock().tasks.get_mut(client) {
            task.abort = Some(handle);
        }
    }

    /// Move a task to `phase`; a cancelled task stays cancelled
    pub fn set_phase(&self, client: &str, phase: TaskPhase) {
        if let Some(task) = self.lock().tasks.get_mut(client) {
            if task.phase != TaskPhase::Cancelled {
                task.phase = phase;
            }
        }
    }

    pub fn phase(&self, client: &str) -> Option<TaskPhase> {
        self.lock().tasks.get(client).map(|t| t.phase)
    }

    /// Abort tasks that have not started a session, optionally of one role
    pub fn cancel_unstarted(&self, role: Option<Role>) -> Vec<String> {
        let mut t = self.lock();
        let mut cancelled = Vec::new();
        for (name, task) in t.tasks.iter_mut() {
            if !task.phase.is_unstarted() || role.is_some_and(|r| r != task.role) {
                continue;
            }
            if let Some(handle) = &task.abort {
                handle.abort();
            }
            task.phase = TaskPhase::Cancelled;
            cancelled.push(name.clone());
        }
        cancelled
    }
}

/// Signal delivery by pid
#[cfg(unix)]
mod signal {
    use std::io;

    fn send(pid: u32, sig: libc::c_int) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: kill(2) has no memory safety requirements
        if unsafe { libc::kill(pid, sig) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        // Already gone but not yet reaped by its task
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }

    pub fn terminate(pid: u32) -> io::Result<()> {
        send(pid, libc::SIGTERM)
    }

    pub fn kill(pid: u32) -> io::Result<()> {
        send(pid, libc::SIGKILL)
    }
}

#[cfg(not(unix))]
mod signal {
    use std::io;

    pub fn terminate(_pid: u32) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "signals need unix"))
    }

    pub fn kill(_pid: u32) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "signals need unix"))
    }
}
