use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    adapter::{
        exec::SharedExec,
        fs::{collect_local, Exclusions},
        shell::LocalShell,
    },
    config::{
        ssh::SSHConfig, ConfigContext, Configuration, Mode, TargetDefinition, UploadDefinition,
    },
    error::SnapshotError,
    progress::ProgressView,
    remote::{
        listing::collect_remote,
        plan::{reconcile, ActionKind, SyncPlan},
        sink::{ExecUploadSink, HttpUploadSink, UploadSink},
        transfer::{ActionReport, ExecutorOptions, Outcome, SyncReport, TransferExecutor},
    },
    snapshot::{Depth, Snapshot},
    util::indent_str,
};

/// Everything a run needs, fixed before it starts.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub local_root: PathBuf,
    pub remote_root: String,
    pub depth: Depth,
    pub exclusions: Exclusions,
    pub mode: Mode,
    pub executor: ExecutorOptions,
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// List mode: nothing was transferred.
    Listed { remote: Snapshot, plan: SyncPlan },
    Synced { plan: SyncPlan, report: SyncReport },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            SyncOutcome::Listed { .. } => true,
            SyncOutcome::Synced { report, .. } => report.is_success(),
        }
    }
}

/// Collects both snapshots concurrently. Either failing fails the pair.
pub async fn collect_snapshots(
    exec: &SharedExec,
    options: &SyncOptions,
) -> Result<(Snapshot, Snapshot), SnapshotError> {
    let local_root = options.local_root.clone();
    let depth = options.depth;
    let exclusions = options.exclusions.clone();

    let local = async {
        tokio::task::spawn_blocking(move || collect_local(&local_root, depth, &exclusions))
            .await
            .map_err(|err| SnapshotError::Io {
                path: options.local_root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, err),
            })?
    };
    let remote = collect_remote(
        exec,
        &options.remote_root,
        options.depth,
        &options.exclusions,
        options.executor.timeout,
    );

    let (local, remote) = tokio::join!(local, remote);
    Ok((local?, remote?))
}

/// Hooks into the phases of [`run_sync_with`]. Every hook does nothing
/// unless overridden.
pub trait SyncObserver {
    fn collecting(&mut self) {}

    fn collected(&mut self, _result: Result<(&Snapshot, &Snapshot), &SnapshotError>) {}

    /// Transfers are about to start. Raising `cancel` stops the ones not yet
    /// started.
    fn transferring(&mut self, _plan: &SyncPlan, _cancel: Arc<AtomicBool>) {}

    fn action_done(&mut self, _action: &ActionReport, _done: usize, _total: usize) {}

    fn finished(&mut self, _outcome: &SyncOutcome) {}
}

impl SyncObserver for () {}

/// Runs one sync without any terminal output.
pub async fn run_sync(
    exec: SharedExec,
    sink: Arc<dyn UploadSink>,
    options: &SyncOptions,
) -> Result<SyncOutcome, SnapshotError> {
    run_sync_with(exec, sink, options, &mut ()).await
}

/// Collects, reconciles and, unless listing, transfers, reporting each phase
/// to `observer`.
pub async fn run_sync_with(
    exec: SharedExec,
    sink: Arc<dyn UploadSink>,
    options: &SyncOptions,
    observer: &mut impl SyncObserver,
) -> Result<SyncOutcome, SnapshotError> {
    observer.collecting();
    let collected = collect_snapshots(&exec, options).await;
    observer.collected(collected.as_ref().map(|(local, remote)| (local, remote)));
    let (local, remote) = collected?;

    let mut plan = reconcile(&local, &remote);
    if let Some(direction) = options.mode.only() {
        debug!(%direction, "transfers restricted to one direction");
        plan = plan.restrict(direction);
    }

    if options.mode == Mode::List {
        let outcome = SyncOutcome::Listed { remote, plan };
        observer.finished(&outcome);
        return Ok(outcome);
    }

    let executor = TransferExecutor::new(exec, sink, options.executor.clone());
    observer.transferring(&plan, executor.cancel_flag());
    let report = executor
        .execute_with(&plan, |action, done, total| {
            observer.action_done(action, done, total)
        })
        .await;

    let outcome = SyncOutcome::Synced { plan, report };
    observer.finished(&outcome);
    Ok(outcome)
}

pub async fn connect(target: &TargetDefinition, options: &SyncOptions) -> anyhow::Result<SharedExec> {
    match target {
        TargetDefinition::Local => Ok(Arc::new(LocalShell::default())),
        TargetDefinition::Ssh(target) => {
            let target = target.clone();
            let timeout = options.executor.timeout;

            let session = tokio::task::spawn_blocking(move || {
                let config = SSHConfig::new(&target)?;
                info!(host = %target.host, user = config.user(), "connecting");
                config
                    .open(timeout)
                    .with_context(|| format!("could not open a session to {}", target.host))
            })
            .await??;

            Ok(Arc::new(session))
        }
    }
}

pub fn upload_sink(upload: &UploadDefinition, exec: &SharedExec) -> Arc<dyn UploadSink> {
    match upload {
        UploadDefinition::Exec => Arc::new(ExecUploadSink::new(exec.clone())),
        UploadDefinition::Http { url } => Arc::new(HttpUploadSink::new(url.clone())),
    }
}

fn print_listing(remote: &Snapshot, plan: &SyncPlan) {
    println!("{} ({} files)", remote.root().display(), remote.len());
    for record in remote.records() {
        let size = record.size.map(|size| size.to_string()).unwrap_or_else(|| "-".to_owned());
        println!("  {:>12} {:>10} {}", record.modified_at, size, record.relative_path);
    }

    println!();
    println!(
        "plan: {} upload, {} download, {} skip",
        plan.count(ActionKind::Upload),
        plan.count(ActionKind::Download),
        plan.count(ActionKind::Skip)
    );
    for action in plan.actions() {
        println!("  {action}");
    }
}

fn print_report(report: &SyncReport) {
    println!("{}", report.summary());

    for action in report.actions() {
        if let Outcome::Failed(err) = &action.outcome {
            println!("! {}", action.path);
            println!("{}", indent_str(&err.to_string(), 1));
        }
    }
}

/// Spinners, the Ctrl-C hook and the final printout of an interactive run.
#[derive(Default)]
struct TerminalView {
    progress: Option<ProgressView>,
    interrupt: Option<JoinHandle<()>>,
}

impl TerminalView {
    fn start(&mut self, task: &str) {
        let mut progress = ProgressView::new(task);
        progress.start();
        self.progress = Some(progress);
    }
}

impl SyncObserver for TerminalView {
    fn collecting(&mut self) {
        self.start("Collecting snapshots");
    }

    fn collected(&mut self, result: Result<(&Snapshot, &Snapshot), &SnapshotError>) {
        let Some(mut progress) = self.progress.take() else {
            return;
        };
        match result {
            Ok((local, remote)) => {
                let counts = format!("{} local, {} remote", local.len(), remote.len());
                progress.success(Some(counts.as_str()));
            }
            Err(_) => progress.failure(None),
        }
    }

    fn transferring(&mut self, plan: &SyncPlan, cancel: Arc<AtomicBool>) {
        if plan.is_noop() {
            println!("Everything is up to date");
        }

        self.interrupt = Some(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; waiting for running transfers");
                cancel.store(true, Ordering::SeqCst);
            }
        }));
        self.start("Transferring files");
    }

    fn action_done(&mut self, action: &ActionReport, done: usize, total: usize) {
        if let Some(progress) = &mut self.progress {
            progress.report_intermediate((done, total), Some(action.path.as_str()));
        }
    }

    fn finished(&mut self, outcome: &SyncOutcome) {
        if let Some(interrupt) = self.interrupt.take() {
            interrupt.abort();
        }

        match outcome {
            SyncOutcome::Listed { remote, plan } => print_listing(remote, plan),
            SyncOutcome::Synced { report, .. } => {
                if let Some(mut progress) = self.progress.take() {
                    let summary = report.summary().to_string();
                    if report.is_success() {
                        progress.success(Some(summary.as_str()));
                    } else {
                        progress.failure(Some(summary.as_str()));
                    }
                }
                print_report(report);
            }
        }
    }
}

/// Runs the definition in `config_ctx` with terminal output.
///
/// `mode` overrides the configured mode.
pub async fn run(config_ctx: &ConfigContext, mode: Option<Mode>) -> anyhow::Result<SyncOutcome> {
    let Configuration::SyncDefinition(definition) = &config_ctx.config;

    let mut options = definition.options(&config_ctx.config_file)?;
    if let Some(mode) = mode {
        options.mode = mode;
    }

    let exec = connect(&definition.target, &options).await?;
    let sink = upload_sink(&definition.upload, &exec);

    Ok(run_sync_with(exec, sink, &options, &mut TerminalView::default()).await?)
}
