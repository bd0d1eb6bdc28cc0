use std::{
    fmt::Display,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use filetime::{set_file_mtime, FileTime};
use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use super::{
    gate::CommitGate,
    plan::{ActionKind, SkipReason, SyncAction, SyncPlan, Transfer},
    sink::{UploadSink, ABANDONED},
};
use crate::{
    adapter::{
        commands,
        exec::{RemoteExec, SharedExec},
    },
    error::{Direction, TransferError},
};

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Actions in flight at once. Channel calls still take turns.
    pub workers: usize,
    /// Bound on each action once it holds the channel, verification included.
    pub timeout: Duration,
    /// Compare SHA-256 digests of both ends after a transfer.
    pub verify: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout: Duration::from_secs(60),
            verify: false,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Skipped(SkipReason),
    Failed(TransferError),
}

#[derive(Debug)]
pub struct ActionReport {
    pub path: String,
    pub kind: ActionKind,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        )
    }
}

/// Outcome of every action of one run, in plan order.
#[derive(Debug, Default)]
pub struct SyncReport {
    actions: Vec<ActionReport>,
}

impl SyncReport {
    pub fn actions(&self) -> &[ActionReport] {
        &self.actions
    }

    pub fn summary(&self) -> Summary {
        self.actions
            .iter()
            .fold(Summary::default(), |mut summary, report| {
                match report.outcome {
                    Outcome::Succeeded => summary.succeeded += 1,
                    Outcome::Skipped(_) => summary.skipped += 1,
                    Outcome::Failed(_) => summary.failed += 1,
                }
                summary
            })
    }

    pub fn failures(&self) -> impl Iterator<Item = &TransferError> {
        self.actions.iter().filter_map(|report| match &report.outcome {
            Outcome::Failed(err) => Some(err),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Carries out a [`SyncPlan`].
///
/// Every action is attempted and recorded on its own; a failure never stops
/// the rest of the plan. Only this type writes to either tree.
///
/// Actions that use the execution channel take turns on it. An action's
/// deadline only starts once it holds the channel, and a job that outlives
/// its deadline keeps the channel until it has wound down.
pub struct TransferExecutor {
    exec: SharedExec,
    sink: Arc<dyn UploadSink>,
    options: ExecutorOptions,
    cancelled: Arc<AtomicBool>,
    channel: Arc<Semaphore>,
}

impl TransferExecutor {
    pub fn new(exec: SharedExec, sink: Arc<dyn UploadSink>, options: ExecutorOptions) -> Self {
        Self {
            exec,
            sink,
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
            channel: Arc::new(Semaphore::new(1)),
        }
    }

    /// Raising this flag stops new actions from starting. Unstarted actions
    /// fail with [`TransferError::Cancelled`].
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub async fn execute(&self, plan: &SyncPlan) -> SyncReport {
        self.execute_with(plan, |_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_done(report, done, total)`
    /// as each action finishes.
    pub async fn execute_with(
        &self,
        plan: &SyncPlan,
        mut on_done: impl FnMut(&ActionReport, usize, usize),
    ) -> SyncReport {
        let total = plan.len();
        let mut finished = Vec::with_capacity(total);

        let mut running = futures::stream::iter(plan.actions().iter().enumerate())
            .map(|(index, action)| async move { (index, self.perform(action).await) })
            .buffer_unordered(self.options.workers.max(1));

        while let Some((index, report)) = running.next().await {
            on_done(&report, finished.len() + 1, total);
            finished.push((index, report));
        }

        finished.sort_by_key(|(index, _)| *index);
        let report = SyncReport {
            actions: finished.into_iter().map(|(_, report)| report).collect(),
        };
        info!(summary = %report.summary(), "transfers finished");

        report
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn perform(&self, action: &SyncAction) -> ActionReport {
        let outcome = match action {
            SyncAction::Skip { reason, .. } => Outcome::Skipped(reason.clone()),
            _ if self.is_cancelled() => Outcome::Failed(TransferError::Cancelled {
                path: action.path().to_owned(),
            }),
            SyncAction::Upload(transfer) => self.upload(transfer).await.into(),
            SyncAction::Download(transfer) => self.download(transfer).await.into(),
        };

        if let Outcome::Failed(err) = &outcome {
            warn!(path = action.path(), %err, "action failed");
        }

        ActionReport {
            path: action.path().to_owned(),
            kind: action.kind(),
            outcome,
        }
    }

    /// Waits for the channel with no deadline, then checks for cancellation
    /// once more since the wait may have been long.
    async fn channel_permit(&self, path: &str) -> Result<OwnedSemaphorePermit, TransferError> {
        let cancelled = || TransferError::Cancelled {
            path: path.to_owned(),
        };

        let permit = self
            .channel
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| cancelled())?;
        if self.is_cancelled() {
            return Err(cancelled());
        }

        Ok(permit)
    }

    async fn upload(&self, transfer: &Transfer) -> Result<(), TransferError> {
        let uses_channel = self.sink.uses_channel();
        let permit = match uses_channel {
            true => Some(self.channel_permit(&transfer.path).await?),
            false => None,
        };
        debug!(path = %transfer.path, "uploading");

        let gate = Arc::new(CommitGate::default());
        let sink = self.sink.clone();
        let exec = self.exec.clone();
        let job = transfer.clone();
        let job_gate = gate.clone();
        let verify_after = self.options.verify && self.sink.writes_remote_path();

        let task = tokio::spawn(async move {
            let _permit = permit;
            sink.upload(&job, job_gate).await?;

            if verify_after {
                let path = job.path.clone();
                tokio::task::spawn_blocking(move || verify(&*exec, &job, &job.local))
                    .await
                    .map_err(|err| TransferError::upload(&path, err))??;
            }

            Ok(())
        });

        // Only an upload off the channel can be cut short; one on the channel
        // has to wind down while it still holds the channel.
        self.settle(transfer, Direction::Upload, &gate, task, !uses_channel)
            .await
    }

    async fn download(&self, transfer: &Transfer) -> Result<(), TransferError> {
        let permit = self.channel_permit(&transfer.path).await?;
        debug!(path = %transfer.path, "downloading");

        let gate = Arc::new(CommitGate::default());
        let exec = self.exec.clone();
        let job = transfer.clone();
        let job_gate = gate.clone();
        let verify = self.options.verify;

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            download_blocking(&*exec, &job, verify, &job_gate)
        });

        self.settle(transfer, Direction::Download, &gate, task, false)
            .await
    }

    /// Waits for `task` under the action deadline.
    ///
    /// When the deadline passes first the action is abandoned and reported as
    /// timed out, unless the job already committed its result. In that case
    /// the result is about to become visible, so it is awaited and reported.
    async fn settle(
        &self,
        transfer: &Transfer,
        direction: Direction,
        gate: &CommitGate,
        mut task: JoinHandle<Result<(), TransferError>>,
        abortable: bool,
    ) -> Result<(), TransferError> {
        let limit = self.options.timeout;

        let joined = match timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) if gate.abandon() => {
                if abortable {
                    task.abort();
                }
                return Err(TransferError::Timeout {
                    path: transfer.path.clone(),
                    direction,
                    after: limit,
                });
            }
            Err(_) => {
                debug!(path = %transfer.path, "deadline passed after commit; waiting");
                task.await
            }
        };

        joined.map_err(|err| match direction {
            Direction::Upload => TransferError::upload(&transfer.path, err),
            Direction::Download => TransferError::download(&transfer.path, err),
        })?
    }
}

impl From<Result<(), TransferError>> for Outcome {
    fn from(result: Result<(), TransferError>) -> Self {
        match result {
            Ok(()) => Outcome::Succeeded,
            Err(err) => Outcome::Failed(err),
        }
    }
}

/// Streams the remote file into a temp sibling of the destination and renames
/// it into place. Any failure leaves the destination untouched.
fn download_blocking(
    exec: &dyn RemoteExec,
    transfer: &Transfer,
    verify_digest: bool,
    gate: &CommitGate,
) -> Result<(), TransferError> {
    let fail = |cause: &dyn Display| TransferError::download(&transfer.path, cause);
    if gate.is_abandoned() {
        return Err(fail(&ABANDONED));
    }

    let parent = transfer
        .local
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|err| fail(&err))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".remsync-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|err| fail(&err))?;

    let status = exec
        .run(&commands::read_file(&transfer.remote), None, temp.as_file_mut())
        .map_err(|err| fail(&err))?;
    if !status.success() {
        return Err(fail(&status.describe()));
    }

    temp.as_file().sync_all().map_err(|err| fail(&err))?;
    set_file_mtime(temp.path(), FileTime::from_unix_time(transfer.modified_at, 0))
        .map_err(|err| fail(&err))?;

    if verify_digest {
        verify(exec, transfer, temp.path())?;
    }

    // Dropping `temp` removes it.
    if !gate.commit() {
        return Err(fail(&ABANDONED));
    }

    persist(temp, &transfer.local).map_err(|err| fail(&err))
}

fn persist(temp: NamedTempFile, dest: &Path) -> std::io::Result<()> {
    temp.persist(dest).map(drop).map_err(|err| err.error)
}

/// Compares the digest of `local_copy` with `sha256sum` of the remote file.
fn verify(exec: &dyn RemoteExec, transfer: &Transfer, local_copy: &Path) -> Result<(), TransferError> {
    let direction_error = |cause: &dyn Display| {
        if local_copy == transfer.local {
            TransferError::upload(&transfer.path, cause)
        } else {
            TransferError::download(&transfer.path, cause)
        }
    };

    let local = sha256::try_digest(local_copy).map_err(|err| direction_error(&err))?;

    let (stdout, status) = exec
        .capture(&commands::checksum(&transfer.remote))
        .map_err(|err| direction_error(&err))?;
    if !status.success() {
        return Err(direction_error(&status.describe()));
    }

    let remote = String::from_utf8_lossy(&stdout)
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if local.eq_ignore_ascii_case(&remote) {
        debug!(path = %transfer.path, digest = %local, "verified");
        Ok(())
    } else {
        Err(TransferError::Verify {
            path: transfer.path.clone(),
            local,
            remote,
        })
    }
}
