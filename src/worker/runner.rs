use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TaskFailure;
use crate::worker::relay::{relay_lines, LogSink, StreamTag};

type Outcome = Option<Result<(), TaskFailure>>;

/// Handle to one spawned training task process.
///
/// A monitor task owns the child process and publishes its outcome exactly
/// once. `kill` only asks the monitor to signal the process; once the process
/// has been reaped the request is ignored, so a recycled pid is never hit.
#[derive(Debug)]
pub struct TaskRunner {
    job_id: Arc<str>,
    pid: Option<u32>,
    kill: CancellationToken,
    outcome: watch::Receiver<Outcome>,
    relays: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRunner {
    /// Wrap a freshly spawned child. Must be called within a tokio runtime.
    pub(crate) fn spawned(
        job_id: Arc<str>,
        mut child: Child,
        sink: Arc<dyn LogSink>,
        kill_grace_period: Option<Duration>,
    ) -> Self {
        let pid = child.id();

        let mut relays = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            relays.push(tokio::spawn(relay_lines(
                stdout,
                job_id.clone(),
                StreamTag::Stdout,
                sink.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            relays.push(tokio::spawn(relay_lines(
                stderr,
                job_id.clone(),
                StreamTag::Stderr,
                sink,
            )));
        }

        let kill = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        tokio::spawn(monitor(
            job_id.clone(),
            child,
            kill.clone(),
            kill_grace_period,
            tx,
        ));

        Self {
            job_id,
            pid,
            kill,
            outcome: rx,
            relays: Mutex::new(relays),
        }
    }

    /// A runner whose process never started. `wait` reports the spawn error.
    pub(crate) fn spawn_failed(job_id: Arc<str>, err: io::Error) -> Self {
        let (_, rx) = watch::channel(Some(Err(TaskFailure::spawn(err))));
        Self {
            job_id,
            pid: None,
            kill: CancellationToken::new(),
            outcome: rx,
            relays: Mutex::new(Vec::new()),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// OS process id, while the process is still running.
    pub fn pid(&self) -> Option<u32> {
        if self.is_finished() {
            None
        } else {
            self.pid
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// The outcome, if the process has already exited.
    pub fn try_outcome(&self) -> Option<Result<(), TaskFailure>> {
        self.outcome.borrow().clone()
    }

    /// Wait for the process to exit.
    ///
    /// Does not wait for output relaying to finish; see [`drain_output`](Self::drain_output).
    pub async fn wait(&self) -> Result<(), TaskFailure> {
        let mut rx = self.outcome.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                let last = rx.borrow().clone();
                return last.unwrap_or_else(|| {
                    Err(TaskFailure::wait(io::Error::new(
                        io::ErrorKind::Other,
                        "task monitor stopped without an outcome",
                    )))
                });
            }
        }
    }

    /// Ask the process to terminate. No-op once it has exited or after the
    /// first call.
    pub fn kill(&self) {
        if self.is_finished() || self.kill.is_cancelled() {
            return;
        }
        tracing::info!(job_id = %self.job_id, pid = ?self.pid, "Killing task");
        self.kill.cancel();
    }

    /// Wait until both output streams have been fully relayed.
    pub async fn drain_output(&self) {
        let relays = std::mem::take(&mut *self.relays.lock().await);
        for relay in relays {
            if let Err(e) = relay.await {
                tracing::warn!(job_id = %self.job_id, error = %e, "Output relay failed");
            }
        }
    }
}

async fn monitor(
    job_id: Arc<str>,
    mut child: Child,
    kill: CancellationToken,
    kill_grace_period: Option<Duration>,
    tx: watch::Sender<Outcome>,
) {
    let mut terminate_sent = false;
    let mut escalated = false;
    let mut escalate_at: Option<Instant> = None;

    let status = loop {
        let deadline = escalate_at;
        let escalation = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = child.wait() => break status,
            _ = kill.cancelled(), if !terminate_sent => {
                terminate_sent = true;
                if let Err(e) = terminate(&mut child) {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to signal task");
                }
                escalate_at = kill_grace_period.map(|grace| Instant::now() + grace);
            }
            _ = escalation, if !escalated => {
                escalated = true;
                escalate_at = None;
                tracing::warn!(job_id = %job_id, "Task ignored termination request, sending SIGKILL");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to kill task");
                }
            }
        }
    };

    let outcome = match status {
        Ok(status) => classify(status, escalated),
        Err(e) => Err(TaskFailure::wait(e)),
    };

    match &outcome {
        Ok(()) => tracing::info!(job_id = %job_id, "Task completed"),
        Err(e) if e.is_killed() => tracing::info!(job_id = %job_id, reason = %e, "Task killed"),
        Err(e) => tracing::warn!(job_id = %job_id, reason = %e, "Task failed"),
    }

    tx.send_replace(Some(outcome));
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: plain syscall on a pid this process owns and has not reaped yet.
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// Map an exit status onto success or a failure kind. SIGINT and SIGTERM
/// count as killed, as does the SIGKILL sent by our own escalation.
#[cfg(unix)]
fn classify(status: ExitStatus, escalated: bool) -> Result<(), TaskFailure> {
    use std::os::unix::process::ExitStatusExt;

    if let Some(signo) = status.signal() {
        let signal = signal_name(signo);
        let requested = signo == libc::SIGINT
            || signo == libc::SIGTERM
            || (escalated && signo == libc::SIGKILL);
        return if requested {
            Err(TaskFailure::Killed { signal, signo })
        } else {
            Err(TaskFailure::Crashed { signal, signo })
        };
    }
    exit_code_outcome(status)
}

#[cfg(not(unix))]
fn classify(status: ExitStatus, escalated: bool) -> Result<(), TaskFailure> {
    if escalated {
        return Err(TaskFailure::Killed {
            signal: "kill".to_string(),
            signo: 0,
        });
    }
    exit_code_outcome(status)
}

fn exit_code_outcome(status: ExitStatus) -> Result<(), TaskFailure> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(TaskFailure::NonZeroExit { code }),
        None => Err(TaskFailure::Crashed {
            signal: "unknown".to_string(),
            signo: 0,
        }),
    }
}

#[cfg(unix)]
fn signal_name(signo: i32) -> String {
    let name = match signo {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        _ => return format!("signal {}", signo),
    };
    name.to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    // Raw wait statuses: exit code in the high byte, signal number in the low bits.
    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    fn signaled(signo: i32) -> ExitStatus {
        ExitStatus::from_raw(signo)
    }

    #[test]
    fn clean_exit_is_success() {
        assert!(classify(exited(0), false).is_ok());
    }

    #[test]
    fn non_zero_exit_carries_code() {
        let err = classify(exited(3), false).unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
    }

    #[test]
    fn sigterm_and_sigint_are_killed() {
        for signo in [libc::SIGTERM, libc::SIGINT] {
            let err = classify(signaled(signo), false).unwrap_err();
            assert!(err.is_killed(), "{} should count as killed", signo);
        }
    }

    #[test]
    fn other_signals_are_crashes() {
        match classify(signaled(libc::SIGSEGV), false) {
            Err(TaskFailure::Crashed { signal, signo }) => {
                assert_eq!(signal, "SIGSEGV");
                assert_eq!(signo, libc::SIGSEGV);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn sigkill_is_killed_only_after_escalation() {
        assert!(classify(signaled(libc::SIGKILL), true)
            .unwrap_err()
            .is_killed());
        assert!(matches!(
            classify(signaled(libc::SIGKILL), false),
            Err(TaskFailure::Crashed { .. })
        ));
    }

    #[test]
    fn unknown_signal_names_fall_back_to_number() {
        assert_eq!(signal_name(libc::SIGABRT), "SIGABRT");
        assert_eq!(signal_name(1000), "signal 1000");
    }
}
