use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

mod git;

pub use git::{DiffBase, GitContext, GitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Retyped,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Retyped => "retyped",
        }
    }

    /// Maps a git status letter (`A`, `M`, `D`, `R087`, `T`, `C75`) to a change type.
    /// Copies introduce a new file, so they count as additions.
    pub fn from_status(status: &str) -> Option<Self> {
        let letter = status.trim().chars().next()?;
        match letter {
            'A' | 'C' => Some(Self::Added),
            'M' => Some(Self::Modified),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            'T' => Some(Self::Retyped),
            _ => None,
        }
    }

    pub fn carries_old_path(self) -> bool {
        matches!(self, Self::Renamed | Self::Retyped)
    }
}

/// Half-open range of 1-based line numbers, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn from_hunk(start: usize, count: usize) -> Self {
        Self {
            start,
            end: start.saturating_add(count),
        }
    }

    pub fn whole_file(line_count: usize) -> Self {
        Self {
            start: 1,
            end: line_count + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn intersects(&self, other: &LineRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }
}

/// One file entry as handed over by the diff collaborator, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiffEntry {
    pub status: String,
    pub old_path: Option<String>,
    pub new_path: String,
    pub patch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    change_type: ChangeType,
    current_path: PathBuf,
    old_path: Option<PathBuf>,
    changed_line_ranges: Option<Vec<LineRange>>,
}

impl ChangeRecord {
    pub fn added(path: PathBuf, ranges: Vec<LineRange>) -> Self {
        Self {
            change_type: ChangeType::Added,
            current_path: path,
            old_path: None,
            changed_line_ranges: Some(ranges),
        }
    }

    pub fn modified(path: PathBuf, ranges: Vec<LineRange>) -> Self {
        Self {
            change_type: ChangeType::Modified,
            current_path: path,
            old_path: None,
            changed_line_ranges: Some(ranges),
        }
    }

    pub fn deleted(path: PathBuf) -> Self {
        Self {
            change_type: ChangeType::Deleted,
            current_path: path,
            old_path: None,
            changed_line_ranges: None,
        }
    }

    pub fn renamed(old_path: PathBuf, path: PathBuf, ranges: Option<Vec<LineRange>>) -> Self {
        Self {
            change_type: ChangeType::Renamed,
            current_path: path,
            old_path: Some(old_path),
            changed_line_ranges: ranges,
        }
    }

    pub fn retyped(old_path: PathBuf, path: PathBuf, ranges: Option<Vec<LineRange>>) -> Self {
        Self {
            change_type: ChangeType::Retyped,
            current_path: path,
            old_path: Some(old_path),
            changed_line_ranges: ranges,
        }
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    pub fn old_path(&self) -> Option<&Path> {
        self.old_path.as_deref()
    }

    pub fn changed_line_ranges(&self) -> Option<&[LineRange]> {
        self.changed_line_ranges.as_deref()
    }

    pub fn ranges(&self) -> &[LineRange] {
        self.changed_line_ranges.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    records: BTreeMap<PathBuf, ChangeRecord>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ChangeRecord) {
        self.records.insert(record.current_path.clone(), record);
    }

    pub fn get(&self, path: &Path) -> Option<&ChangeRecord> {
        self.records.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.records.keys().map(PathBuf::as_path)
    }

    pub fn is_added(&self, path: &Path) -> bool {
        self.records
            .get(path)
            .is_some_and(|record| record.change_type == ChangeType::Added)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&ChangeRecord) -> bool) {
        self.records.retain(|_, record| keep(record));
    }
}

impl FromIterator<ChangeRecord> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = ChangeRecord>>(iter: T) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Root-relative, forward-slash form of `path`; paths outside `root` are shown whole.
pub fn display_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    normalize_path(&relative.to_string_lossy())
}
