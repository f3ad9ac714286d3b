/// Terminate processes by pid without owning a `Child` handle.
///
/// Kill requests arrive in a different host invocation from the one that
/// spawned FFmpeg, so the only handle available is the pid itself.
use streamgrab_shared::errors::ProcessError;

/// What happened to the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The termination signal was delivered.
    Signalled,
    /// No such process; it had already finished.
    AlreadyGone,
}

/// Send a single termination request to `pid`.
pub fn terminate_pid(pid: u32) -> Result<KillOutcome, ProcessError> {
    #[cfg(unix)]
    {
        terminate_pid_unix(pid)
    }

    #[cfg(not(unix))]
    {
        terminate_pid_other(pid)
    }
}

#[cfg(unix)]
fn terminate_pid_unix(pid: u32) -> Result<KillOutcome, ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| ProcessError::SignalFailed(format!("pid {} out of range", pid)))?;

    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => Ok(KillOutcome::Signalled),
        Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyGone),
        Err(e) => Err(ProcessError::SignalFailed(e.to_string())),
    }
}

#[cfg(not(unix))]
fn terminate_pid_other(pid: u32) -> Result<KillOutcome, ProcessError> {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        None => Ok(KillOutcome::AlreadyGone),
        Some(process) if process.kill() => Ok(KillOutcome::Signalled),
        Some(_) => Err(ProcessError::SignalFailed(format!(
            "termination of pid {} was refused",
            pid
        ))),
    }
}
