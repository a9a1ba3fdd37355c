//! Spawning a child on a pseudo-terminal.
//!
//! The child gets the slave end as stdin/stdout/stderr, becomes a session
//! leader (so its pid is also its process-group id) and takes the pty as its
//! controlling terminal. We keep the master end for reading its output and
//! writing its input.

use std::io;
use std::path::Path;

use tokio::process::Child;

/// A freshly spawned child and the two ends we talk to it through.
pub struct PtyChild {
    pub child: Child,
    /// Process-group id of the child (equal to its pid).
    pub pgid: u32,
    pub reader: tokio::fs::File,
    pub writer: tokio::fs::File,
}

/// Spawn `program args…` in `cwd` attached to a new pseudo-terminal.
#[cfg(unix)]
pub fn spawn(program: &str, args: &[String], cwd: &Path) -> io::Result<PtyChild> {
    use std::fs::File;
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::process::Stdio;

    use nix::pty::openpty;
    use nix::sys::termios::{self, LocalFlags, SetArg};
    use tokio::process::Command;

    let pty = openpty(None, None).map_err(io::Error::from)?;

    // Input we write must not be echoed back into the event stream.
    let mut attrs = termios::tcgetattr(&pty.slave).map_err(io::Error::from)?;
    attrs.local_flags.remove(LocalFlags::ECHO);
    termios::tcsetattr(&pty.slave, SetArg::TCSANOW, &attrs).map_err(io::Error::from)?;

    let stdin: OwnedFd = pty.slave.try_clone()?;
    let stdout: OwnedFd = pty.slave.try_clone()?;
    let stderr: OwnedFd = pty.slave;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .env("TERM", "dumb");

    // Safety: only async-signal-safe calls (setsid, ioctl) run between fork
    // and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    // Drop our copies of the slave so reads on the master end once the child
    // (and everything it spawned) has closed it.
    drop(cmd);

    let pgid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child exited before pid was read"))?;

    let master = pty.master;
    let read_end = File::from(master.try_clone()?);
    let write_end = File::from(master);

    tracing::debug!(
        "Spawned {program} on pty master fd {} (pgid {pgid})",
        read_end.as_raw_fd()
    );

    Ok(PtyChild {
        child,
        pgid,
        reader: tokio::fs::File::from_std(read_end),
        writer: tokio::fs::File::from_std(write_end),
    })
}

#[cfg(not(unix))]
pub fn spawn(_program: &str, _args: &[String], _cwd: &Path) -> io::Result<PtyChild> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "pseudo-terminals need a unix host",
    ))
}
