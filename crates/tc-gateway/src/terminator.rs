//! Process-group termination.
//!
//! The agent spawns its own children (shells, test runners, language
//! servers), so stopping it means signalling the whole group it leads.
//! The mechanism is platform-specific and lives behind
//! [`ProcessGroupTerminator`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("refusing to signal protected process group {0}")]
    Protected(u32),

    #[error("failed to signal process group {pgid}: {reason}")]
    Signal { pgid: u32, reason: String },

    #[error("process-group termination is not supported on this platform")]
    Unsupported,
}

/// Ends a process group, politely or not.
///
/// Both calls are fire-and-forget: they return once the request is issued,
/// not once the group has exited. A group that is already gone is `Ok`.
pub trait ProcessGroupTerminator: Send + Sync {
    /// Ask every process in the group to wind down (interrupt).
    fn request_graceful(&self, pgid: u32) -> Result<(), TerminateError>;

    /// Kill every process in the group.
    fn request_immediate(&self, pgid: u32) -> Result<(), TerminateError>;
}

/// Sends POSIX signals with `killpg`: SIGINT, then SIGKILL.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalTerminator;

#[cfg(unix)]
impl SignalTerminator {
    fn send(&self, pgid: u32, sig: nix::sys::signal::Signal) -> Result<(), TerminateError> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;
        use tracing::{debug, warn};

        // 0 would hit our own group, 1 is init.
        if pgid <= 1 {
            return Err(TerminateError::Protected(pgid));
        }
        let raw = i32::try_from(pgid).map_err(|_| TerminateError::Signal {
            pgid,
            reason: "pgid out of range".into(),
        })?;

        match killpg(Pid::from_raw(raw), sig) {
            Ok(()) => {
                debug!("Sent {sig:?} to process group {pgid}");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!("Process group {pgid} already gone");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send {sig:?} to process group {pgid}: {e}");
                Err(TerminateError::Signal {
                    pgid,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(unix)]
impl ProcessGroupTerminator for SignalTerminator {
    fn request_graceful(&self, pgid: u32) -> Result<(), TerminateError> {
        self.send(pgid, nix::sys::signal::Signal::SIGINT)
    }

    fn request_immediate(&self, pgid: u32) -> Result<(), TerminateError> {
        self.send(pgid, nix::sys::signal::Signal::SIGKILL)
    }
}

#[cfg(not(unix))]
impl ProcessGroupTerminator for SignalTerminator {
    fn request_graceful(&self, _pgid: u32) -> Result<(), TerminateError> {
        Err(TerminateError::Unsupported)
    }

    fn request_immediate(&self, _pgid: u32) -> Result<(), TerminateError> {
        Err(TerminateError::Unsupported)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::time::Duration;

    #[test]
    fn protected_groups_are_rejected() {
        let t = SignalTerminator;
        assert!(matches!(t.request_graceful(0), Err(TerminateError::Protected(0))));
        assert!(matches!(t.request_immediate(1), Err(TerminateError::Protected(1))));
    }

    #[test]
    fn missing_group_is_ok() {
        // Far above any default pid_max.
        assert!(SignalTerminator.request_immediate(4_000_000).is_ok());
    }

    #[test]
    fn kill_reaches_grandchildren() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 300 & wait")
            .process_group(0)
            .spawn()
            .expect("spawn sh");
        std::thread::sleep(Duration::from_millis(200));

        SignalTerminator
            .request_immediate(child.id())
            .expect("killpg");
        let status = child.wait().expect("wait");
        assert!(!status.success());
    }
}
