use std::{
    io::{self, ErrorKind, Read, Write},
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{Command, Stdio},
    thread,
};

use tracing::trace;

use super::exec::{ExecStatus, RemoteExec};
use crate::error::ChannelError;

/// Runs commands through a local `sh -c`.
///
/// Serves targets that are reachable as a local path (a mount, a second disk)
/// with exactly the same command set the SSH channel uses.
#[derive(Debug, Clone)]
pub struct LocalShell {
    program: PathBuf,
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl LocalShell {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

fn panicked(what: &str) -> ChannelError {
    ChannelError::Io(io::Error::new(
        ErrorKind::Other,
        format!("{what} thread panicked"),
    ))
}

impl RemoteExec for LocalShell {
    fn run(
        &self,
        command: &str,
        stdin: Option<&mut (dyn Read + Send)>,
        stdout: &mut dyn Write,
    ) -> Result<ExecStatus, ChannelError> {
        trace!(command, "spawning local shell");

        let mut child = Command::new(&self.program)
            .arg("-c")
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ChannelError::Spawn {
                command: command.to_owned(),
                source,
            })?;

        let input_pipe = child.stdin.take();
        let (Some(mut output_pipe), Some(mut error_pipe)) = (child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            return Err(ChannelError::Config("child pipes were not captured".to_owned()));
        };

        let (copied, fed, stderr) = thread::scope(|scope| {
            let feeder = stdin
                .zip(input_pipe)
                .map(|(input, mut pipe)| scope.spawn(move || io::copy(input, &mut pipe)));
            let collector = scope.spawn(move || {
                let mut buf = Vec::new();
                error_pipe.read_to_end(&mut buf).map(|_| buf)
            });

            let copied = io::copy(&mut output_pipe, stdout);
            if copied.is_err() {
                let _ = child.kill();
            }
            drop(output_pipe);

            let fed = feeder.map(|handle| handle.join());
            (copied, fed, collector.join())
        });

        let status = child.wait()?;

        copied?;
        match fed {
            Some(Err(_)) => return Err(panicked("stdin")),
            // The command may stop reading early; its exit status says whether that is a failure.
            Some(Ok(Err(err))) if err.kind() != ErrorKind::BrokenPipe => return Err(err.into()),
            _ => {}
        }
        let stderr = stderr.map_err(|_| panicked("stderr"))??;

        Ok(ExecStatus::new(
            status.code().unwrap_or(-1),
            status.signal().map(|signal| signal.to_string()),
            &stderr,
        ))
    }
}

/// Runs one command at a time and sleeps before each, like a busy session.
#[cfg(test)]
pub(crate) struct SlowShell {
    delay: std::time::Duration,
    busy: std::sync::Mutex<()>,
    shell: LocalShell,
}

#[cfg(test)]
impl SlowShell {
    pub(crate) fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            busy: Default::default(),
            shell: LocalShell::default(),
        }
    }
}

#[cfg(test)]
impl RemoteExec for SlowShell {
    fn run(
        &self,
        command: &str,
        stdin: Option<&mut (dyn Read + Send)>,
        stdout: &mut dyn Write,
    ) -> Result<ExecStatus, ChannelError> {
        let _busy = self.busy.lock().unwrap();
        thread::sleep(self.delay);
        self.shell.run(command, stdin, stdout)
    }
}
