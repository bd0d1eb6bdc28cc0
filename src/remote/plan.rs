//! Reconciliation of a local and a remote snapshot into a [`SyncPlan`].
//!
//! Modification time is the only authority. When both sides carry the same
//! timestamp the file is considered up to date even if the sizes disagree;
//! such entries are flagged in the skip reason but never transferred.

use std::{
    collections::BTreeSet,
    fmt::Display,
    path::PathBuf,
};

use tracing::warn;

use crate::{
    error::Direction,
    snapshot::{FileRecord, Snapshot},
};

/// One file to move, with both ends resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub path: String,
    pub local: PathBuf,
    pub remote: String,
    /// Modification time of the side being copied from.
    pub modified_at: i64,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UpToDate,
    /// Same timestamp, different size. Not reconciled by content.
    SizeMismatch { local: u64, remote: u64 },
    /// Needs a transfer the run mode does not allow.
    Disabled(Direction),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UpToDate => write!(f, "up to date"),
            SkipReason::SizeMismatch { local, remote } => write!(
                f,
                "up to date (same timestamp, sizes differ: local {local}, remote {remote})"
            ),
            SkipReason::Disabled(direction) => write!(f, "{direction} disabled by mode"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Upload,
    Download,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Upload(Transfer),
    Download(Transfer),
    Skip { path: String, reason: SkipReason },
}

impl SyncAction {
    pub fn path(&self) -> &str {
        match self {
            SyncAction::Upload(transfer) | SyncAction::Download(transfer) => &transfer.path,
            SyncAction::Skip { path, .. } => path,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            SyncAction::Upload(_) => ActionKind::Upload,
            SyncAction::Download(_) => ActionKind::Download,
            SyncAction::Skip { .. } => ActionKind::Skip,
        }
    }
}

impl Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAction::Upload(transfer) => write!(
                f,
                "upload   {} ({} -> {})",
                transfer.path,
                transfer.local.display(),
                transfer.remote
            ),
            SyncAction::Download(transfer) => write!(
                f,
                "download {} ({} -> {})",
                transfer.path,
                transfer.remote,
                transfer.local.display()
            ),
            SyncAction::Skip { path, reason } => write!(f, "skip     {path} ({reason})"),
        }
    }
}

/// Exactly one action per distinct path, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    actions: Vec<SyncAction>,
}

impl SyncPlan {
    pub fn actions(&self) -> &[SyncAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions
            .iter()
            .filter(|action| action.kind() == kind)
            .count()
    }

    /// True when nothing needs to move.
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|action| action.kind() == ActionKind::Skip)
    }

    /// Keeps the transfers going the `allowed` way. The others become skips,
    /// so every path still has its action.
    pub fn restrict(self, allowed: Direction) -> SyncPlan {
        let actions = self
            .actions
            .into_iter()
            .map(|action| match (&action, allowed) {
                (SyncAction::Upload(transfer), Direction::Download) => SyncAction::Skip {
                    path: transfer.path.clone(),
                    reason: SkipReason::Disabled(Direction::Upload),
                },
                (SyncAction::Download(transfer), Direction::Upload) => SyncAction::Skip {
                    path: transfer.path.clone(),
                    reason: SkipReason::Disabled(Direction::Download),
                },
                _ => action,
            })
            .collect();

        SyncPlan { actions }
    }
}

fn transfer(local: &Snapshot, remote: &Snapshot, source: &FileRecord) -> Transfer {
    Transfer {
        path: source.relative_path.clone(),
        local: local.local_path(&source.relative_path),
        remote: remote.remote_path(&source.relative_path),
        modified_at: source.modified_at,
        size: source.size,
    }
}

/// Decides, per path in either snapshot, which way it has to move.
///
/// Total and deterministic: the plan depends only on the two snapshots and
/// is ordered lexicographically by relative path.
pub fn reconcile(local: &Snapshot, remote: &Snapshot) -> SyncPlan {
    let paths: BTreeSet<&str> = local.paths().chain(remote.paths()).collect();

    let actions = paths
        .into_iter()
        .map(|path| match (local.get(path), remote.get(path)) {
            (Some(mine), None) => SyncAction::Upload(transfer(local, remote, mine)),
            (None, Some(theirs)) => SyncAction::Download(transfer(local, remote, theirs)),
            (Some(mine), Some(theirs)) if mine.modified_at > theirs.modified_at => {
                SyncAction::Upload(transfer(local, remote, mine))
            }
            (Some(mine), Some(theirs)) if mine.modified_at < theirs.modified_at => {
                SyncAction::Download(transfer(local, remote, theirs))
            }
            (Some(mine), Some(theirs)) => {
                let reason = match (mine.size, theirs.size) {
                    (Some(local), Some(remote)) if local != remote => {
                        warn!(path, local, remote, "same timestamp but sizes differ; not transferred");
                        SkipReason::SizeMismatch { local, remote }
                    }
                    _ => SkipReason::UpToDate,
                };
                SyncAction::Skip {
                    path: path.to_owned(),
                    reason,
                }
            }
            (None, None) => unreachable!("path comes from one of the snapshots"),
        })
        .collect();

    SyncPlan { actions }
}
