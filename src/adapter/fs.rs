use std::{
    fs, io,
    path::{Component, Path},
    time::{SystemTime, UNIX_EPOCH},
};

use ignore::{
    gitignore::{Gitignore, GitignoreBuilder},
    WalkBuilder,
};
use tracing::{debug, warn};

use super::commands;
use crate::{
    error::{MalformedRecord, SnapshotError},
    snapshot::{Depth, FileRecord, Snapshot},
};

/// Gitignore-style patterns matched against `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct Exclusions(Gitignore);

impl Default for Exclusions {
    fn default() -> Self {
        Self(Gitignore::empty())
    }
}

impl Exclusions {
    /// `origin` only shows up in error messages about bad patterns.
    pub fn new(statement: &str, origin: &Path) -> Result<Self, ignore::Error> {
        let mut gitignore = GitignoreBuilder::new(".");

        for line in statement.lines() {
            gitignore.add_line(Some(origin.to_owned()), line)?;
        }

        Ok(Self(gitignore.build()?))
    }

    pub fn is_excluded(&self, relative_path: &str) -> bool {
        self.0
            .matched_path_or_any_parents(relative_path, false)
            .is_ignore()
    }
}

/// Whole seconds since the epoch, rounded toward negative infinity.
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => {
            let before = before.duration();
            -(before.as_secs() as i64) - i64::from(before.subsec_nanos() > 0)
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let components = path
        .strip_prefix(root)
        .ok()?
        .components()
        .map(|component| match component {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    (!components.is_empty()).then(|| components.join("/"))
}

/// Collects the regular files under `root`.
///
/// Unreadable directories fail the whole collection. Names that are not valid
/// UTF-8 are skipped and recorded as warnings.
pub fn collect_local(
    root: &Path,
    depth: Depth,
    exclusions: &Exclusions,
) -> Result<Snapshot, SnapshotError> {
    let io_error = |path: &Path, source: io::Error| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };

    fs::read_dir(root).map_err(|source| io_error(root, source))?;

    let mut walker = WalkBuilder::new(root);
    walker
        .standard_filters(false)
        .follow_links(false)
        .max_depth(match depth {
            Depth::Shallow => Some(1),
            Depth::Recursive => None,
        });

    let mut snapshot = Snapshot::new(root);

    for (index, entry) in walker.build().enumerate() {
        let entry = entry.map_err(|err| {
            let source = err
                .into_io_error()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "directory walk failed"));
            io_error(root, source)
        })?;

        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }
        if entry.file_name().to_str().is_some_and(commands::is_partial) {
            debug!(path = %entry.path().display(), "skipping unfinished transfer");
            continue;
        }

        let Some(relative) = relative_path(root, entry.path()) else {
            warn!(path = %entry.path().display(), "skipping file with a non UTF-8 name");
            snapshot.warn(MalformedRecord {
                index,
                reason: format!("{} is not valid UTF-8", entry.path().display()),
            });
            continue;
        };

        if exclusions.is_excluded(&relative) {
            debug!(path = %relative, "excluded");
            continue;
        }

        let metadata = entry.metadata().map_err(|err| {
            let source = err
                .into_io_error()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "metadata unavailable"));
            io_error(entry.path(), source)
        })?;
        let modified = metadata.modified().map_err(|source| io_error(entry.path(), source))?;

        snapshot.insert(FileRecord::new(relative, unix_seconds(modified), Some(metadata.len())));
    }

    debug!(root = %root.display(), files = snapshot.len(), "local snapshot collected");
    Ok(snapshot)
}
