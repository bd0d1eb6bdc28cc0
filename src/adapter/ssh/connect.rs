use std::{
    net::{TcpStream, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use ssh2::{MethodType, Session};
use ssh2_config::HostParams;
use tracing::{debug, info};

use crate::{check, error::ChannelError, util::prompt_password};

pub(super) fn try_connection(host: &str, timeout: Duration) -> Result<TcpStream, ChannelError> {
    let addrs = host.to_socket_addrs().map_err(|err| ChannelError::Connect {
        host: host.to_owned(),
        reason: err.to_string(),
    })?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, %err, "connection attempt failed");
                last_error = Some(err);
            }
        }
    }

    Err(ChannelError::Connect {
        host: host.to_owned(),
        reason: last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no address resolved".to_owned()),
    })
}

/// What the configuration offers for proving who we are.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
    pub identities: Vec<PathBuf>,
}

/// Tries, in order: a configured password, the SSH agent, identity files,
/// and finally an interactive password prompt.
pub(super) fn authenticate(session: &Session, credentials: &Credentials) -> Result<(), ChannelError> {
    let user = credentials.user.as_str();
    let failed = |reason: String| ChannelError::Auth {
        user: user.to_owned(),
        reason,
    };

    if let Some(password) = &credentials.password {
        return session
            .userauth_password(user, password)
            .map_err(|err| failed(err.to_string()));
    }

    if session.userauth_agent(user).is_ok() && session.authenticated() {
        info!(user, "authenticated with ssh-agent");
        return Ok(());
    }

    for identity in &credentials.identities {
        match session.userauth_pubkey_file(user, None, identity, None) {
            Ok(()) if session.authenticated() => {
                info!(user, identity = %identity.display(), "authenticated with identity file");
                return Ok(());
            }
            Ok(()) => {}
            Err(err) => debug!(identity = %identity.display(), %err, "identity rejected"),
        }
    }

    let password = prompt_password(&format!("[{user}] Password: ")).map_err(|err| failed(err.to_string()))?;
    session
        .userauth_password(user, &password)
        .map_err(|err| failed(err.to_string()))
}

/// Algorithm preferences from the host's configuration, as `method_pref`
/// arguments. Ciphers and MACs apply to both directions.
fn algorithm_prefs(params: &HostParams) -> Vec<(MethodType, &'static str, String)> {
    let lists: [(&Option<Vec<String>>, &[(MethodType, &str)]); 4] = [
        (&params.kex_algorithms, &[(MethodType::Kex, "key exchange")]),
        (&params.host_key_algorithms, &[(MethodType::HostKey, "host key")]),
        (
            &params.ciphers,
            &[(MethodType::CryptCs, "cipher"), (MethodType::CryptSc, "cipher")],
        ),
        (
            &params.mac,
            &[(MethodType::MacCs, "MAC"), (MethodType::MacSc, "MAC")],
        ),
    ];

    lists
        .into_iter()
        .filter_map(|(list, methods)| list.as_ref().map(|list| (list.join(","), methods)))
        .flat_map(|(prefs, methods)| {
            methods
                .iter()
                .map(move |(method, label)| (*method, *label, prefs.clone()))
        })
        .collect()
}

/// Applies compression, keep-alive and algorithm choices from `~/.ssh/config`.
/// A choice libssh2 rejects is logged and left at its default.
pub(super) fn configure_session(session: &mut Session, params: &HostParams) {
    if let Some(compress) = params.compression {
        session.set_compress(compress);
    }
    if let (Some(true), Some(interval)) = (params.tcp_keep_alive, params.server_alive_interval) {
        session.set_keepalive(true, interval.as_secs() as u32);
    }

    for (method, label, prefs) in algorithm_prefs(params) {
        let applied = session.method_pref(method, &prefs);
        check!(
            applied.is_ok(),
            "could not prefer {} algorithms {}: {}",
            label,
            prefs,
            applied.err().map(|err| err.to_string()).unwrap_or_default()
        );
    }
}
