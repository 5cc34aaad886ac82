use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use smartcollect_config::ProjectConfig;
use smartcollect_core::{ChangeSet, display_path, normalize_path};
use walkdir::WalkDir;

use crate::AnalysisError;

const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".smartcollect",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".nox",
    ".venv",
    "venv",
    "__pycache__",
    "node_modules",
    "site-packages",
    "build",
    "dist",
];

/// Static table of the project's modules by fully-qualified name.
#[derive(Debug, Clone)]
pub struct ProjectIndex {
    root: PathBuf,
    source_extension: String,
    package_marker: String,
    files: Vec<PathBuf>,
    modules: BTreeMap<String, Vec<PathBuf>>,
}

impl ProjectIndex {
    /// Walks `root` once; `root` should already be canonical.
    pub fn build(root: &Path, project: &ProjectConfig) -> Self {
        let mut index = Self::empty(root, project);

        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry))
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() || !index.is_source(entry.path()) {
                continue;
            }
            index.insert(entry.into_path());
        }

        tracing::debug!(
            root = %root.display(),
            files = index.files.len(),
            modules = index.modules.len(),
            "indexed project modules"
        );
        index
    }

    fn empty(root: &Path, project: &ProjectConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            source_extension: project.source_extension.clone(),
            package_marker: project.package_marker.clone(),
            files: Vec::new(),
            modules: BTreeMap::new(),
        }
    }

    fn insert(&mut self, path: PathBuf) {
        if let Some(name) = self.qualified_name(&path) {
            self.modules.entry(name).or_default().push(path.clone());
        }
        self.files.push(path);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn package_marker(&self) -> &str {
        &self.package_marker
    }

    pub fn source_extension(&self) -> &str {
        &self.source_extension
    }

    /// Project membership is an absolute path prefix match on the root.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    pub fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.source_extension))
    }

    pub fn is_package_init(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name == self.package_marker)
    }

    /// Every indexed file registered under `qualified`.
    pub fn lookup(&self, qualified: &str) -> &[PathBuf] {
        self.modules
            .get(qualified)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The candidate for `qualified` closest to `importer` in the directory tree.
    pub fn closest(&self, qualified: &str, importer: &Path) -> Option<&PathBuf> {
        self.lookup(qualified)
            .iter()
            .max_by_key(|candidate| shared_prefix_len(candidate, importer))
    }

    /// Dotted module name of `path`, found by walking up while the parent
    /// directory is a package. Works for files that no longer exist.
    pub fn qualified_name(&self, path: &Path) -> Option<String> {
        if !self.contains(path) {
            return None;
        }

        let mut parts = Vec::new();
        if !self.is_package_init(path) {
            parts.push(path.file_stem()?.to_str()?.to_owned());
        }

        let mut dir = path.parent()?;
        while dir != self.root && dir.starts_with(&self.root) && self.is_package_dir(dir) {
            parts.push(dir.file_name()?.to_str()?.to_owned());
            let Some(parent) = dir.parent() else {
                break;
            };
            dir = parent;
        }

        if parts.is_empty() {
            return None;
        }
        parts.reverse();
        Some(parts.join("."))
    }

    /// Qualified package name for a directory, `None` for the root or a plain directory.
    pub fn package_name(&self, dir: &Path) -> Option<String> {
        self.qualified_name(&dir.join(&self.package_marker))
            .filter(|_| self.is_package_dir(dir))
    }

    pub fn is_package_dir(&self, dir: &Path) -> bool {
        dir.join(&self.package_marker).is_file()
    }

    pub fn display(&self, path: &Path) -> String {
        display_path(&self.root, path)
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name) || name.ends_with(".egg-info"))
}

fn shared_prefix_len(left: &Path, right: &Path) -> usize {
    left.components()
        .zip(right.components())
        .take_while(|(a, b)| a == b)
        .count()
}

/// Configured `ignore_sources`: root-relative path prefixes or glob patterns.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    root: PathBuf,
    prefixes: Vec<String>,
    globs: GlobSet,
}

impl SourceFilter {
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self, AnalysisError> {
        let mut prefixes = Vec::new();
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let pattern = normalize_path(pattern.trim());
            let pattern = pattern.trim_start_matches("./");
            if pattern.is_empty() {
                continue;
            }
            if pattern.contains(['*', '?', '[', '{']) {
                let glob = Glob::new(pattern).map_err(|err| AnalysisError::Pattern {
                    pattern: pattern.to_owned(),
                    message: err.to_string(),
                })?;
                builder.add(glob);
            } else {
                prefixes.push(pattern.trim_end_matches('/').to_owned());
            }
        }

        let globs = builder.build().map_err(|err| AnalysisError::Pattern {
            pattern: patterns.join(", "),
            message: err.to_string(),
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            prefixes,
            globs,
        })
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let relative = normalize_path(&relative.to_string_lossy());
        let prefixed = self.prefixes.iter().any(|prefix| {
            relative == *prefix
                || relative
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        });
        prefixed || self.globs.is_match(relative.as_str())
    }

    pub fn apply(&self, changes: &mut ChangeSet) {
        changes.retain(|record| {
            let ignored = self.is_ignored(record.current_path());
            if ignored {
                tracing::debug!(path = %record.current_path().display(), "ignoring changed source");
            }
            !ignored
        });
    }
}
