//! Process-group child handle
//!
//! Children are spawned as process-group leaders, so signals sent to the
//! group reach the login shell, the CLI and anything they started.

use std::io;
use std::pin::Pin;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use process_wrap::tokio::ChildWrapper;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};

/// Owned handle on a spawned process group
#[derive(Debug)]
pub struct WrappedChild {
    inner: Box<dyn ChildWrapper>,
    pid: u32,
}

impl WrappedChild {
    pub fn new(inner: Box<dyn ChildWrapper>) -> Self {
        let pid = inner.id().unwrap_or(0);
        Self { inner, pid }
    }

    /// OS pid of the group leader (0 if already reaped at spawn)
    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.inner.stdin().take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.inner.stdout().take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.inner.stderr().take()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> io::Result<std::process::ExitStatus> {
        Pin::from(self.inner.wait()).await
    }

    /// Kill the process group and wait for exit
    pub async fn kill(&mut self) -> io::Result<()> {
        Pin::from(self.inner.kill()).await
    }

    /// Start killing without waiting for exit
    pub fn start_kill(&mut self) -> io::Result<()> {
        self.inner.start_kill()
    }
}

/// Send `signal` to the process group led by `pid`
///
/// Usable while the child itself is mutably borrowed by a pending `wait()`.
/// A group that is already gone is not an error.
pub fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    let Ok(raw) = i32::try_from(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pid out of range: {pid}"),
        ));
    };
    if raw <= 0 {
        return Ok(());
    }

    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_group_ignores_unspawned_pid() {
        assert!(signal_group(0, Signal::SIGTERM).is_ok());
    }

    #[test]
    fn test_signal_group_rejects_overflowing_pid() {
        assert!(signal_group(u32::MAX, Signal::SIGTERM).is_err());
    }
}
