use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use filetime::{set_file_mtime, FileTime};
use remsync::{
    adapter::{exec::SharedExec, fs::Exclusions, shell::LocalShell},
    config::{read_config, Mode},
    error::{SnapshotError, TransferError},
    remote::{
        gate::CommitGate,
        listing::collect_remote,
        plan::{ActionKind, Transfer},
        sink::{ExecUploadSink, HttpUploadSink, UploadSink},
        transfer::{ExecutorOptions, Outcome, Summary},
    },
    services::sync::{collect_snapshots, run, run_sync, SyncOptions, SyncOutcome},
    snapshot::Depth,
};
use tempfile::TempDir;
use wiremock::{
    matchers::{body_string_contains, method},
    Mock, MockServer, ResponseTemplate,
};

struct Trees {
    local: TempDir,
    remote: TempDir,
}

impl Trees {
    fn new() -> Self {
        Self {
            local: TempDir::new().unwrap(),
            remote: TempDir::new().unwrap(),
        }
    }

    fn options(&self, depth: Depth) -> SyncOptions {
        SyncOptions {
            local_root: self.local.path().to_path_buf(),
            remote_root: self.remote.path().to_string_lossy().into_owned(),
            depth,
            exclusions: Exclusions::default(),
            mode: Mode::Sync,
            executor: ExecutorOptions {
                timeout: Duration::from_secs(20),
                ..Default::default()
            },
        }
    }
}

fn write(root: &Path, relative: &str, content: &[u8], modified_at: i64) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(modified_at, 0)).unwrap();
}

fn mtime(path: &Path) -> i64 {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
}

fn shell() -> SharedExec {
    Arc::new(LocalShell::default())
}

fn exec_sink(exec: &SharedExec) -> Arc<dyn UploadSink> {
    Arc::new(ExecUploadSink::new(exec.clone()))
}

fn synced(outcome: SyncOutcome) -> (Vec<(ActionKind, String)>, Summary) {
    let SyncOutcome::Synced { plan, report } = outcome else {
        panic!("expected a sync, got {outcome:?}");
    };
    let actions = plan
        .actions()
        .iter()
        .map(|action| (action.kind(), action.path().to_owned()))
        .collect();
    (actions, report.summary())
}

#[derive(Default)]
struct CountingSink(AtomicUsize);

#[async_trait]
impl UploadSink for CountingSink {
    async fn upload(&self, _: &Transfer, _: Arc<CommitGate>) -> Result<(), TransferError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn local_only_file_is_uploaded() {
    let trees = Trees::new();
    write(trees.local.path(), "a.txt", b"first version\n", 100);
    let exec = shell();
    let options = trees.options(Depth::Shallow);

    let outcome = run_sync(exec.clone(), exec_sink(&exec), &options).await.unwrap();
    let (actions, summary) = synced(outcome);

    assert_eq!(actions, [(ActionKind::Upload, "a.txt".to_owned())]);
    assert_eq!(summary.succeeded, 1);

    let remote = collect_remote(
        &exec,
        &options.remote_root,
        Depth::Shallow,
        &Exclusions::default(),
        Duration::from_secs(20),
    )
    .await
    .unwrap();
    assert_eq!(remote.paths().collect::<Vec<_>>(), ["a.txt"]);
    assert!(remote.get("a.txt").unwrap().modified_at >= 100);
    assert_eq!(
        fs::read(trees.remote.path().join("a.txt")).unwrap(),
        b"first version\n"
    );
}

#[tokio::test]
async fn newer_remote_file_is_downloaded() {
    let trees = Trees::new();
    write(trees.local.path(), "a.txt", b"old", 100);
    write(trees.remote.path(), "a.txt", b"new remote content", 200);
    let exec = shell();

    let outcome = run_sync(exec.clone(), exec_sink(&exec), &trees.options(Depth::Shallow))
        .await
        .unwrap();
    let (actions, summary) = synced(outcome);

    assert_eq!(actions, [(ActionKind::Download, "a.txt".to_owned())]);
    assert_eq!(summary.succeeded, 1);

    let local = trees.local.path().join("a.txt");
    assert_eq!(fs::read(&local).unwrap(), b"new remote content");
    assert_eq!(mtime(&local), 200);
}

#[tokio::test]
async fn mixed_trees_follow_path_order() {
    let trees = Trees::new();
    write(trees.local.path(), "a.txt", b"same", 100);
    write(trees.local.path(), "b.txt", b"local only", 50);
    write(trees.remote.path(), "a.txt", b"same", 100);
    write(trees.remote.path(), "c.txt", b"remote only", 10);
    let exec = shell();

    let outcome = run_sync(exec.clone(), exec_sink(&exec), &trees.options(Depth::Shallow))
        .await
        .unwrap();
    let (actions, summary) = synced(outcome);

    assert_eq!(
        actions,
        [
            (ActionKind::Skip, "a.txt".to_owned()),
            (ActionKind::Upload, "b.txt".to_owned()),
            (ActionKind::Download, "c.txt".to_owned()),
        ]
    );
    assert_eq!(
        summary,
        Summary {
            succeeded: 2,
            failed: 0,
            skipped: 1
        }
    );
    assert_eq!(fs::read(trees.remote.path().join("b.txt")).unwrap(), b"local only");
    assert_eq!(fs::read(trees.local.path().join("c.txt")).unwrap(), b"remote only");
}

#[tokio::test]
async fn failed_remote_listing_transfers_nothing() {
    let trees = Trees::new();
    write(trees.local.path(), "a.txt", b"x", 100);
    let mut options = trees.options(Depth::Shallow);
    options.remote_root = trees.remote.path().join("missing").to_string_lossy().into_owned();

    let sink = Arc::new(CountingSink::default());
    let err = run_sync(shell(), sink.clone(), &options).await.unwrap_err();

    assert!(matches!(err, SnapshotError::RemoteList { .. }), "{err:?}");
    assert_eq!(sink.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_rejected_upload_leaves_the_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("filename=\"c.txt\""))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(4)
        .mount(&server)
        .await;

    let trees = Trees::new();
    for name in ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"] {
        write(trees.local.path(), name, name.as_bytes(), 100);
    }
    let sink = Arc::new(HttpUploadSink::new(format!("{}/upload", server.uri())));

    let outcome = run_sync(shell(), sink, &trees.options(Depth::Shallow))
        .await
        .unwrap();
    let SyncOutcome::Synced { report, .. } = outcome else {
        panic!("expected a sync");
    };

    assert_eq!(
        report.summary(),
        Summary {
            succeeded: 4,
            failed: 1,
            skipped: 0
        }
    );
    let failed: Vec<_> = report
        .actions()
        .iter()
        .filter(|action| matches!(action.outcome, Outcome::Failed(_)))
        .map(|action| action.path.as_str())
        .collect();
    assert_eq!(failed, ["c.txt"]);
}

#[tokio::test]
async fn upload_then_download_round_trips_bytes() {
    let trees = Trees::new();
    let content: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
    write(trees.local.path(), "blob.bin", &content, 1_000);
    let exec = shell();
    let options = trees.options(Depth::Shallow);

    run_sync(exec.clone(), exec_sink(&exec), &options).await.unwrap();
    fs::remove_file(trees.local.path().join("blob.bin")).unwrap();

    let outcome = run_sync(exec.clone(), exec_sink(&exec), &options).await.unwrap();
    let (actions, summary) = synced(outcome);

    assert_eq!(actions, [(ActionKind::Download, "blob.bin".to_owned())]);
    assert_eq!(summary.failed, 0);
    assert_eq!(fs::read(trees.local.path().join("blob.bin")).unwrap(), content);
}

#[tokio::test]
async fn second_run_has_nothing_to_do() {
    let trees = Trees::new();
    write(trees.local.path(), "up.txt", b"up", 300);
    write(trees.remote.path(), "down.txt", b"down", 400);
    let exec = shell();
    let options = trees.options(Depth::Shallow);

    run_sync(exec.clone(), exec_sink(&exec), &options).await.unwrap();
    let outcome = run_sync(exec.clone(), exec_sink(&exec), &options).await.unwrap();
    let (actions, summary) = synced(outcome);

    assert!(actions.iter().all(|(kind, _)| *kind == ActionKind::Skip));
    assert_eq!(summary.skipped, 2);
}

#[tokio::test]
async fn recursive_sync_honours_exclusions_and_odd_names() {
    let trees = Trees::new();
    write(trees.local.path(), "dir/with space/file one.txt", b"1", 100);
    write(trees.local.path(), "dir/build.log", b"log", 100);
    write(trees.remote.path(), "from remote/$(touch pwned)", b"2", 100);
    write(trees.remote.path(), "top.txt", b"3", 100);

    let exec = shell();
    let mut options = trees.options(Depth::Recursive);
    options.exclusions = Exclusions::new("*.log\ntop.txt\n", Path::new("test")).unwrap();

    let outcome = run_sync(exec.clone(), exec_sink(&exec), &options).await.unwrap();
    let (actions, summary) = synced(outcome);

    assert_eq!(
        actions,
        [
            (ActionKind::Upload, "dir/with space/file one.txt".to_owned()),
            (ActionKind::Download, "from remote/$(touch pwned)".to_owned()),
        ]
    );
    assert_eq!(summary.succeeded, 2);
    assert!(trees.remote.path().join("dir/with space/file one.txt").is_file());
    assert!(!trees.remote.path().join("dir/build.log").exists());
    assert!(trees.local.path().join("from remote/$(touch pwned)").is_file());
    assert!(!trees.local.path().join("top.txt").exists());
    assert!(!Path::new("pwned").exists());
}

#[tokio::test]
async fn shallow_sync_ignores_subdirectories_on_both_sides() {
    let trees = Trees::new();
    write(trees.local.path(), "nested/local.txt", b"l", 100);
    write(trees.remote.path(), "nested/remote.txt", b"r", 100);
    write(trees.remote.path(), "top.txt", b"t", 100);

    let (local, remote) = collect_snapshots(&shell(), &trees.options(Depth::Shallow))
        .await
        .unwrap();

    assert!(local.is_empty());
    assert_eq!(remote.paths().collect::<Vec<_>>(), ["top.txt"]);
}

#[tokio::test]
async fn list_mode_changes_nothing() {
    let trees = Trees::new();
    write(trees.local.path(), "a.txt", b"a", 100);
    write(trees.remote.path(), "b.txt", b"b", 100);
    let mut options = trees.options(Depth::Shallow);
    options.mode = Mode::List;

    let sink = Arc::new(CountingSink::default());
    let outcome = run_sync(shell(), sink.clone(), &options).await.unwrap();

    let SyncOutcome::Listed { remote, plan } = outcome else {
        panic!("expected a listing");
    };
    assert_eq!(remote.get("b.txt").and_then(|record| record.size), Some(1));
    assert_eq!(plan.len(), 2);
    assert_eq!(sink.0.load(Ordering::SeqCst), 0);
    assert!(!trees.local.path().join("b.txt").exists());
}

#[tokio::test]
async fn pull_only_downloads() {
    let trees = Trees::new();
    write(trees.local.path(), "mine.txt", b"local", 300);
    write(trees.remote.path(), "theirs.txt", b"remote", 300);
    let exec = shell();
    let mut options = trees.options(Depth::Shallow);
    options.mode = Mode::Pull;

    let outcome = run_sync(exec.clone(), exec_sink(&exec), &options).await.unwrap();
    let (actions, summary) = synced(outcome);

    assert_eq!(
        actions,
        [
            (ActionKind::Skip, "mine.txt".to_owned()),
            (ActionKind::Download, "theirs.txt".to_owned()),
        ]
    );
    assert_eq!(summary.succeeded, 1);
    assert!(trees.local.path().join("theirs.txt").is_file());
    assert!(!trees.remote.path().join("mine.txt").exists());
}

#[tokio::test]
async fn push_only_uploads() {
    let trees = Trees::new();
    write(trees.local.path(), "mine.txt", b"local", 300);
    write(trees.remote.path(), "theirs.txt", b"remote", 300);
    let sink = Arc::new(CountingSink::default());
    let mut options = trees.options(Depth::Shallow);
    options.mode = Mode::Push;

    let outcome = run_sync(shell(), sink.clone(), &options).await.unwrap();
    let (actions, _) = synced(outcome);

    assert_eq!(
        actions,
        [
            (ActionKind::Upload, "mine.txt".to_owned()),
            (ActionKind::Skip, "theirs.txt".to_owned()),
        ]
    );
    assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    assert!(!trees.local.path().join("theirs.txt").exists());
}

#[tokio::test]
async fn configured_run_syncs_both_ways() {
    let trees = Trees::new();
    write(trees.local.path(), "up.txt", b"up", 300);
    write(trees.remote.path(), "down.txt", b"down", 400);

    let config_dir = TempDir::new().unwrap();
    let config_file = config_dir.path().join("remsync.yaml");
    fs::write(
        &config_file,
        format!(
            "type: sync\ntarget: {{ type: local }}\nlocal: {}\nremote: '{}'\ntimeout_secs: 20\n",
            trees.local.path().display(),
            trees.remote.path().display()
        ),
    )
    .unwrap();
    let config = read_config(Some(config_file)).unwrap();

    let outcome = run(&config, None).await.unwrap();
    assert!(outcome.is_success());
    let (_, summary) = synced(outcome);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(fs::read(trees.remote.path().join("up.txt")).unwrap(), b"up");
    assert_eq!(fs::read(trees.local.path().join("down.txt")).unwrap(), b"down");

    let listed = run(&config, Some(Mode::List)).await.unwrap();
    assert!(matches!(listed, SyncOutcome::Listed { ref plan, .. } if plan.is_noop()));
}
