use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::MalformedRecord;

/// How deep both collectors look below their root.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    /// Regular files directly inside the root.
    #[default]
    Shallow,
    Recursive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// `/`-separated path relative to the snapshot root.
    pub relative_path: String,
    /// Whole seconds since the Unix epoch.
    pub modified_at: i64,
    pub size: Option<u64>,
}

impl FileRecord {
    pub fn new(relative_path: impl Into<String>, modified_at: i64, size: Option<u64>) -> Self {
        Self {
            relative_path: relative_path.into(),
            modified_at,
            size,
        }
    }
}

/// Point-in-time view of one directory root.
///
/// Built in a single pass by a collector and never updated afterwards.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    root: PathBuf,
    records: BTreeMap<String, FileRecord>,
    warnings: Vec<MalformedRecord>,
}

impl Snapshot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            records: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn from_records(
        root: impl Into<PathBuf>,
        records: impl IntoIterator<Item = FileRecord>,
    ) -> Self {
        let mut snapshot = Self::new(root);
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    /// Adds a record, replacing any previous record with the same path.
    pub(crate) fn insert(&mut self, record: FileRecord) {
        self.records.insert(record.relative_path.clone(), record);
    }

    pub(crate) fn warn(&mut self, warning: MalformedRecord) {
        self.warnings.push(warning);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.records.get(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.records.contains_key(relative_path)
    }

    /// Records in lexicographic path order.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn warnings(&self) -> &[MalformedRecord] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Absolute local path of `relative_path` under this root.
    pub fn local_path(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .fold(self.root.clone(), |path, component| path.join(component))
    }

    /// Absolute remote (POSIX) path of `relative_path` under this root.
    pub fn remote_path(&self, relative_path: &str) -> String {
        let root = self.root.to_string_lossy();
        match root.trim_end_matches('/') {
            "" if root.starts_with('/') => format!("/{relative_path}"),
            "" => relative_path.to_owned(),
            root => format!("{root}/{relative_path}"),
        }
    }
}
