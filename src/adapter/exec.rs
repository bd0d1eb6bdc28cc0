use std::{
    io::{Read, Write},
    sync::Arc,
};

use crate::error::ChannelError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStatus {
    pub exit_code: i32,
    /// Set when the command was killed by a signal instead of exiting.
    pub signal: Option<String>,
    pub stderr: String,
}

impl ExecStatus {
    pub fn new(exit_code: i32, signal: Option<String>, stderr: &[u8]) -> Self {
        Self {
            exit_code,
            signal,
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    /// A killed command never succeeds, whatever exit code was reported with it.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }

    /// One-line description for error messages.
    pub fn describe(&self) -> String {
        let status = match &self.signal {
            Some(signal) => format!("killed by signal {signal}"),
            None => format!("exit status {}", self.exit_code),
        };

        match self.stderr.trim() {
            "" => status,
            stderr => format!("{status}: {stderr}"),
        }
    }
}

/// Runs one command at a time against the remote side.
///
/// Every call opens its own session, streams the command's stdout into
/// `stdout`, and releases the session before returning, whatever the outcome.
/// The command string is passed through verbatim; callers quote paths with
/// [`commands`](super::commands).
///
/// Implementations block. Call them from `spawn_blocking`.
pub trait RemoteExec: Send + Sync {
    fn run(
        &self,
        command: &str,
        stdin: Option<&mut (dyn Read + Send)>,
        stdout: &mut dyn Write,
    ) -> Result<ExecStatus, ChannelError>;

    /// Runs `command` with no input and buffers its whole stdout.
    fn capture(&self, command: &str) -> Result<(Vec<u8>, ExecStatus), ChannelError> {
        let mut stdout = Vec::new();
        let status = self.run(command, None, &mut stdout)?;
        Ok((stdout, status))
    }
}

pub type SharedExec = Arc<dyn RemoteExec>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_is_a_failure_even_with_zero_code() {
        let status = ExecStatus::new(0, Some("KILL".to_owned()), b"");
        assert!(!status.success());
        assert_eq!(status.describe(), "killed by signal KILL");
    }

    #[test]
    fn describe_appends_stderr() {
        assert!(ExecStatus::new(0, None, b"").success());
        assert_eq!(
            ExecStatus::new(2, None, b"no such file\n").describe(),
            "exit status 2: no such file"
        );
    }
}
