use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    adapter::{
        commands::{self, RECORD_SEPARATOR},
        exec::SharedExec,
        fs::Exclusions,
    },
    error::{MalformedRecord, SnapshotError},
    snapshot::{Depth, FileRecord, Snapshot},
};

/// Lists the regular files under the remote `root` with a single command.
///
/// A non-zero exit status aborts with [`SnapshotError::RemoteList`]; records
/// that cannot be parsed are kept as warnings on the returned snapshot.
pub async fn collect_remote(
    exec: &SharedExec,
    root: &str,
    depth: Depth,
    exclusions: &Exclusions,
    limit: Duration,
) -> Result<Snapshot, SnapshotError> {
    let command = commands::list_files(root, depth);
    let exec = exec.clone();

    let (stdout, status) = match timeout(
        limit,
        tokio::task::spawn_blocking(move || exec.capture(&command)),
    )
    .await
    {
        Err(_) => {
            return Err(SnapshotError::Timeout {
                root: root.to_owned(),
                after: limit,
            })
        }
        Ok(Err(join)) => {
            return Err(SnapshotError::RemoteList {
                root: root.to_owned(),
                reason: join.to_string(),
            })
        }
        Ok(Ok(captured)) => captured?,
    };

    if !status.success() {
        return Err(SnapshotError::RemoteList {
            root: root.to_owned(),
            reason: status.describe(),
        });
    }

    let snapshot = parse_listing(root, &stdout, exclusions);
    if !snapshot.warnings().is_empty() {
        warn!(
            root,
            malformed = snapshot.warnings().len(),
            "skipped malformed listing records"
        );
    }
    debug!(root, files = snapshot.len(), "remote snapshot collected");

    Ok(snapshot)
}

/// Parses `<mtime> <size> <path>` records separated by NUL.
///
/// `<mtime>` may carry a fractional part, which is dropped. The path is
/// everything after the second space, so it may itself contain spaces and
/// newlines.
pub fn parse_listing(root: &str, output: &[u8], exclusions: &Exclusions) -> Snapshot {
    let mut snapshot = Snapshot::new(root);

    let records = output
        .split(|byte| *byte == RECORD_SEPARATOR)
        .enumerate()
        .filter(|(_, record)| !record.is_empty());

    for (index, record) in records {
        match parse_record(record) {
            Ok(record) if exclusions.is_excluded(&record.relative_path) => {
                debug!(path = %record.relative_path, "excluded");
            }
            Ok(record) => snapshot.insert(record),
            Err(reason) => {
                debug!(index, %reason, "malformed listing record");
                snapshot.warn(MalformedRecord { index, reason });
            }
        }
    }

    snapshot
}

fn parse_record(record: &[u8]) -> Result<FileRecord, String> {
    let record = std::str::from_utf8(record).map_err(|_| "record is not valid UTF-8".to_owned())?;

    let mut fields = record.splitn(3, ' ');
    let (Some(mtime), Some(size), Some(path)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(format!("expected `<mtime> <size> <path>`, got {record:?}"));
    };

    let modified_at = parse_timestamp(mtime).ok_or_else(|| format!("bad timestamp {mtime:?}"))?;
    let size = size
        .parse::<u64>()
        .map_err(|_| format!("bad size {size:?}"))?;

    if path.is_empty() || path.split('/').any(|part| part.is_empty() || part == "..") {
        return Err(format!("bad path {path:?}"));
    }

    Ok(FileRecord::new(path, modified_at, Some(size)))
}

/// `1700000000.1234567890` -> `1700000000`, flooring negative values.
fn parse_timestamp(raw: &str) -> Option<i64> {
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if !fraction.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    let seconds = whole.parse::<i64>().ok()?;
    let has_fraction = fraction.bytes().any(|byte| byte != b'0');

    Some(if whole.starts_with('-') {
        seconds - i64::from(has_fraction)
    } else {
        seconds
    })
}
