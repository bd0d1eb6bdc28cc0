use std::{fs::File, io::BufReader, path::PathBuf, time::Duration};

use anyhow::Context;
use ssh2_config::{HostParams, ParseRule, SshConfig};
use tracing::debug;

use super::SshTarget;
use crate::{
    adapter::ssh::{Credentials, SSHSession},
    error::ChannelError,
};

/// An SSH target with `~/.ssh/config` applied.
pub struct SSHConfig {
    hostname: String,
    config: HostParams,
    credentials: Credentials,
}

fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("config"))
        .filter(|path| path.is_file())
}

fn read_user_config() -> anyhow::Result<SshConfig> {
    let Some(path) = user_config_path() else {
        return Ok(SshConfig::default());
    };
    debug!(path = %path.display(), "reading ssh config");

    let file = File::open(&path).with_context(|| format!("could not open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    SshConfig::default()
        .parse(&mut reader, ParseRule::ALLOW_UNKNOWN_FIELDS)
        .with_context(|| format!("could not parse {}", path.display()))
}

impl SSHConfig {
    pub fn new(target: &SshTarget) -> anyhow::Result<Self> {
        Ok(Self::with_config(target, &read_user_config()?))
    }

    /// Settings written in the sync definition win over the ssh config.
    pub fn with_config(target: &SshTarget, ssh_config: &SshConfig) -> Self {
        let mut config = ssh_config.query(&target.host);
        if target.port.is_some() {
            config.port = target.port;
        }

        let user = target
            .user
            .clone()
            .or_else(|| config.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_owned());

        let mut identities: Vec<PathBuf> = target.identity.iter().cloned().collect();
        identities.extend(config.identity_file.iter().flatten().cloned());
        if identities.is_empty() {
            identities.extend(
                dirs::home_dir()
                    .into_iter()
                    .flat_map(|home| ["id_ed25519", "id_rsa"].map(|name| home.join(".ssh").join(name)))
                    .filter(|path| path.is_file()),
            );
        }

        Self {
            hostname: target.host.clone(),
            config,
            credentials: Credentials {
                user,
                password: target.password.clone(),
                identities,
            },
        }
    }

    pub fn user(&self) -> &str {
        &self.credentials.user
    }

    /// Connects and authenticates. Blocks, and may prompt for a password.
    pub fn open(&self, timeout: Duration) -> Result<SSHSession, ChannelError> {
        let timeout = self.config.connect_timeout.unwrap_or(timeout);
        SSHSession::open(&self.hostname, &self.config, &self.credentials, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(host: &str) -> SshTarget {
        SshTarget {
            host: host.to_owned(),
            port: None,
            user: None,
            password: None,
            identity: None,
        }
    }

    fn parse(config: &str) -> SshConfig {
        SshConfig::default()
            .parse(&mut config.as_bytes(), ParseRule::ALLOW_UNKNOWN_FIELDS)
            .unwrap()
    }

    #[test]
    fn user_comes_from_ssh_config() {
        let ssh_config = parse("Host box\n    HostName 10.0.0.2\n    User builder\n    Port 2200\n");

        let resolved = SSHConfig::with_config(&target("box"), &ssh_config);
        assert_eq!(resolved.user(), "builder");
        assert_eq!(resolved.config.host_name.as_deref(), Some("10.0.0.2"));
        assert_eq!(resolved.config.port, Some(2200));
    }

    #[test]
    fn definition_overrides_ssh_config() {
        let ssh_config = parse("Host box\n    User builder\n    Port 2200\n");
        let mut target = target("box");
        target.user = Some("deploy".to_owned());
        target.port = Some(22);
        target.identity = Some("/keys/deploy".into());

        let resolved = SSHConfig::with_config(&target, &ssh_config);
        assert_eq!(resolved.user(), "deploy");
        assert_eq!(resolved.config.port, Some(22));
        assert_eq!(resolved.credentials.identities[0], PathBuf::from("/keys/deploy"));
    }
}
