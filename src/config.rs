pub mod ssh;

use std::{
  fs::File,
  io::BufReader,
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::{
  adapter::fs::Exclusions,
  error::Direction,
  remote::transfer::ExecutorOptions,
  services::sync::SyncOptions,
  snapshot::Depth,
};

pub const DEFAULT_CONFIG: &str = "./remsync.yaml";

pub fn read_config(path: Option<PathBuf>) -> anyhow::Result<ConfigContext> {
  let path = path.unwrap_or(DEFAULT_CONFIG.into());
  let file = File::open(&path).with_context(|| format!("could not open {}", path.display()))?;
  let reader = BufReader::new(file);

  Ok(ConfigContext {
    config: serde_yaml::from_reader(reader)
      .with_context(|| format!("could not parse {}", path.display()))?,
    config_file: path,
  })
}

pub struct ConfigContext {
  pub config_file: PathBuf,
  pub config: Configuration,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Configuration {
  #[serde(rename = "sync")]
  SyncDefinition(SyncDefinition),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncDefinition {
  pub target: TargetDefinition,
  pub local: PathBuf,
  pub remote: String,

  #[serde(default)]
  pub mode: Mode,
  #[serde(default)]
  pub depth: Depth,
  #[serde(default)]
  pub ignore: String,
  #[serde(default)]
  pub upload: UploadDefinition,

  #[serde(default = "default_workers")]
  pub workers: usize,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default)]
  pub verify: bool,
}

fn default_workers() -> usize {
  4
}

fn default_timeout_secs() -> u64 {
  60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetDefinition {
  Ssh(SshTarget),
  Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshTarget {
  /// Host alias or name, looked up in `~/.ssh/config`.
  pub host: String,
  pub port: Option<u16>,
  pub user: Option<String>,
  pub password: Option<String>,
  pub identity: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum UploadDefinition {
  #[default]
  Exec,
  Http { url: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
  /// Show the remote files and the plan, transfer nothing.
  List,
  /// Move files both ways.
  #[default]
  Sync,
  /// Only download; local changes stay local.
  Pull,
  /// Only upload; remote changes stay remote.
  Push,
}

impl Mode {
  /// The one direction this mode transfers in, if it is restricted.
  pub fn only(self) -> Option<Direction> {
    match self {
      Mode::Pull => Some(Direction::Download),
      Mode::Push => Some(Direction::Upload),
      Mode::List | Mode::Sync => None,
    }
  }
}

impl SyncDefinition {
  /// Validates the definition. Relative paths are taken from the directory
  /// holding `config_file`.
  pub fn options(&self, config_file: &Path) -> anyhow::Result<SyncOptions> {
    ensure!(self.workers >= 1, "workers must be at least 1");
    ensure!(self.timeout_secs >= 1, "timeout_secs must be at least 1");
    ensure!(!self.remote.trim().is_empty(), "remote must not be empty");
    if let UploadDefinition::Http { url } = &self.upload {
      ensure!(
        url.starts_with("http://") || url.starts_with("https://"),
        "upload url must be http(s): {url}"
      );
    }

    let base = config_file.parent().unwrap_or(Path::new("."));
    let exclusions = Exclusions::new(&self.ignore, config_file)
      .with_context(|| format!("invalid ignore pattern in {}", config_file.display()))?;

    Ok(SyncOptions {
      local_root: base.join(&self.local),
      remote_root: self.remote.clone(),
      depth: self.depth,
      exclusions,
      mode: self.mode,
      executor: ExecutorOptions {
        workers: self.workers,
        timeout: Duration::from_secs(self.timeout_secs),
        verify: self.verify,
      },
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(yaml: &str) -> SyncDefinition {
    match serde_yaml::from_str(yaml).unwrap() {
      Configuration::SyncDefinition(definition) => definition,
    }
  }

  #[test]
  fn minimal_definition_uses_defaults() {
    let definition = parse(
      "type: sync\n\
       target: { type: local }\n\
       local: ./data\n\
       remote: /srv/data\n",
    );

    assert!(matches!(definition.target, TargetDefinition::Local));
    assert!(matches!(definition.upload, UploadDefinition::Exec));
    assert_eq!(definition.mode, Mode::Sync);
    assert_eq!(definition.depth, Depth::Shallow);

    let options = definition.options(Path::new("/etc/remsync/remsync.yaml")).unwrap();
    assert_eq!(options.local_root, Path::new("/etc/remsync").join("./data"));
    assert_eq!(options.remote_root, "/srv/data");
    assert_eq!(options.executor.workers, 4);
    assert_eq!(options.executor.timeout, Duration::from_secs(60));
    assert!(!options.executor.verify);
  }

  #[test]
  fn full_definition_is_read() {
    let definition = parse(
      r#"
type: sync
target:
  type: ssh
  host: build-box
  port: 2222
  user: deploy
local: /home/me/out
remote: /srv/out
mode: list
depth: recursive
ignore: |
  *.tmp
  target/
upload:
  via: http
  url: http://build-box:8080/upload
workers: 8
timeout_secs: 5
verify: true
"#,
    );

    let TargetDefinition::Ssh(target) = &definition.target else {
      panic!("expected an ssh target");
    };
    assert_eq!(target.host, "build-box");
    assert_eq!(target.port, Some(2222));
    assert_eq!(target.user.as_deref(), Some("deploy"));

    let options = definition.options(Path::new("remsync.yaml")).unwrap();
    assert_eq!(options.mode, Mode::List);
    assert_eq!(options.depth, Depth::Recursive);
    assert_eq!(options.local_root, Path::new("/home/me/out"));
    assert!(options.exclusions.is_excluded("a.tmp"));
    assert!(options.exclusions.is_excluded("target/debug/x"));
    assert!(options.executor.verify);
  }

  #[test]
  fn one_way_modes_are_read() {
    let pull = parse("type: sync\ntarget: { type: local }\nlocal: a\nremote: b\nmode: pull\n");
    assert_eq!(pull.mode, Mode::Pull);
    assert_eq!(pull.mode.only(), Some(Direction::Download));

    let push = parse("type: sync\ntarget: { type: local }\nlocal: a\nremote: b\nmode: push\n");
    assert_eq!(push.mode.only(), Some(Direction::Upload));
    assert_eq!(Mode::Sync.only(), None);
  }

  #[test]
  fn zero_workers_are_rejected() {
    let definition = parse(
      "type: sync\ntarget: { type: local }\nlocal: a\nremote: b\nworkers: 0\n",
    );
    assert!(definition.options(Path::new("remsync.yaml")).is_err());
  }

  #[test]
  fn unknown_document_type_is_rejected() {
    let parsed = serde_yaml::from_str::<Configuration>("type: task\n");
    assert!(parsed.is_err());
  }
}
