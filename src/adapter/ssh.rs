use std::{
    io::{self, Read, Write},
    sync::Arc,
    time::Duration,
};

use ssh2::Session;
use ssh2_config::HostParams;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use self::connect::{authenticate, configure_session, try_connection};
use super::exec::{ExecStatus, RemoteExec};
use crate::{check, error::ChannelError};

mod connect;

pub use connect::Credentials;

/// An authenticated SSH connection.
///
/// libssh2 sessions are not safe to drive from two channels at once, so the
/// session sits behind a mutex and every `run` holds it for its whole
/// lifetime. Clones share the same connection.
#[derive(Clone)]
pub struct SSHSession(Arc<Mutex<Session>>);

impl SSHSession {
    /// Connects, handshakes and authenticates. Blocks.
    ///
    /// `timeout` bounds the TCP connect and every later blocking libssh2
    /// call, so a stalled remote command fails instead of hanging.
    pub fn open(
        hostname: &str,
        params: &HostParams,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let host = params.host_name.as_deref().unwrap_or(hostname);
        let host = if host.contains(':') {
            check!(
                params.port.is_none(),
                "Port {:?} is ignored, because hostname seems to contain port (it has ':')",
                params.port
            );
            host.to_string()
        } else {
            let port = params.port.unwrap_or(22);
            format!("{}:{}", host, port)
        };

        let stream = try_connection(&host, timeout)?;
        info!(
            peer = %stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| host.clone()),
            "connected"
        );

        let mut session = Session::new()?;
        configure_session(&mut session, params);
        session.set_tcp_stream(stream);
        session.handshake()?;
        debug!("handshake complete");

        authenticate(&session, credentials)?;
        if !session.authenticated() {
            return Err(ChannelError::Auth {
                user: credentials.user.clone(),
                reason: "server did not accept any method".to_owned(),
            });
        }

        if let Some(banner) = session.banner() {
            debug!(banner, "server banner");
        }

        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));

        Ok(Self(Arc::new(Mutex::new(session))))
    }
}

impl RemoteExec for SSHSession {
    fn run(
        &self,
        command: &str,
        stdin: Option<&mut (dyn Read + Send)>,
        stdout: &mut dyn Write,
    ) -> Result<ExecStatus, ChannelError> {
        let session = self.0.blocking_lock();
        trace!(command, "opening exec channel");

        let mut channel = session.channel_session()?;
        channel.exec(command)?;

        if let Some(stdin) = stdin {
            io::copy(stdin, &mut channel)?;
        }
        channel.send_eof()?;

        io::copy(&mut channel, stdout)?;

        let mut stderr = Vec::new();
        channel.stderr().read_to_end(&mut stderr)?;

        channel.wait_close()?;

        // libssh2 reports exit code 0 for a command that ended on a signal.
        let signal = channel.exit_signal()?.exit_signal;
        if let Some(signal) = &signal {
            debug!(command, %signal, "remote command killed");
        }

        Ok(ExecStatus::new(channel.exit_status()?, signal, &stderr))
    }
}
