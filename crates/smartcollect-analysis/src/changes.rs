use std::fs;
use std::path::{Path, PathBuf};

use smartcollect_core::{ChangeRecord, ChangeSet, ChangeType, LineRange, RawDiffEntry};

use crate::AnalysisError;

/// Turns raw per-file diff entries into change records for tracked source files.
#[derive(Debug, Clone)]
pub struct ChangeExtractor {
    repo_root: PathBuf,
    source_extension: String,
}

impl ChangeExtractor {
    pub fn new(repo_root: impl Into<PathBuf>, source_extension: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            source_extension: source_extension.into(),
        }
    }

    pub fn extract(&self, entries: &[RawDiffEntry]) -> Result<ChangeSet, AnalysisError> {
        let mut changes = ChangeSet::new();
        for entry in entries {
            if let Some(record) = self.record_for(entry)? {
                changes.insert(record);
            }
        }
        Ok(changes)
    }

    /// Marks every source file in `files` as added, for histories too short to diff.
    pub fn all_files<'a>(&self, files: impl IntoIterator<Item = &'a Path>) -> ChangeSet {
        files
            .into_iter()
            .filter(|path| self.is_source(path))
            .filter_map(|path| {
                let ranges = whole_file_ranges(path)?;
                Some(ChangeRecord::added(path.to_path_buf(), ranges))
            })
            .collect()
    }

    fn record_for(&self, entry: &RawDiffEntry) -> Result<Option<ChangeRecord>, AnalysisError> {
        let change_type =
            ChangeType::from_status(&entry.status).ok_or_else(|| {
                AnalysisError::UnknownChangeType {
                    status: entry.status.clone(),
                    path: entry.new_path.clone(),
                }
            })?;

        let path = self.repo_root.join(&entry.new_path);
        let old_path = entry
            .old_path
            .as_deref()
            .map(|old| self.repo_root.join(old))
            .unwrap_or_else(|| path.clone());

        let record = match change_type {
            ChangeType::Added => {
                if !self.is_source(&path) {
                    return Ok(None);
                }
                let ranges = whole_file_ranges(&path).or_else(|| {
                    let post_image = entry
                        .patch
                        .as_deref()
                        .map(post_image_ranges)
                        .unwrap_or_default();
                    (!post_image.is_empty()).then_some(post_image)
                });
                let Some(ranges) = ranges else {
                    tracing::debug!(path = %path.display(), "skipping added file without content");
                    return Ok(None);
                };
                ChangeRecord::added(path, ranges)
            }
            ChangeType::Modified => {
                if !self.is_source(&path) {
                    return Ok(None);
                }
                let ranges = entry.patch.as_deref().map(hunk_ranges).unwrap_or_default();
                if ranges.is_empty() {
                    tracing::debug!(path = %path.display(), "skipping entry without hunk header");
                    return Ok(None);
                }
                ChangeRecord::modified(path, ranges)
            }
            ChangeType::Deleted => {
                if !self.is_source(&path) {
                    return Ok(None);
                }
                ChangeRecord::deleted(path)
            }
            ChangeType::Renamed => {
                if !self.is_source(&path) && !self.is_source(&old_path) {
                    return Ok(None);
                }
                let ranges = if self.is_source(&path) {
                    whole_file_ranges(&path)
                } else {
                    None
                };
                ChangeRecord::renamed(old_path, path, ranges)
            }
            ChangeType::Retyped => {
                if !self.is_source(&path) && !self.is_source(&old_path) {
                    return Ok(None);
                }
                // A symlink or submodule is no longer a source file even if the name says so.
                let still_source = self.is_source(&path)
                    && fs::symlink_metadata(&path).is_ok_and(|meta| meta.is_file());
                let ranges = if still_source {
                    whole_file_ranges(&path)
                } else {
                    None
                };
                ChangeRecord::retyped(old_path, path, ranges)
            }
        };

        Ok(Some(record))
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.source_extension))
    }
}

/// Pre-image and post-image ranges of every hunk header in `patch`, in order.
pub fn hunk_ranges(patch: &str) -> Vec<LineRange> {
    patch
        .lines()
        .filter_map(parse_hunk_header)
        .flat_map(|(pre_image, post_image)| [pre_image, post_image])
        .collect()
}

fn post_image_ranges(patch: &str) -> Vec<LineRange> {
    patch
        .lines()
        .filter_map(parse_hunk_header)
        .map(|(_, post_image)| post_image)
        .filter(|range| !range.is_empty())
        .collect()
}

/// `@@ -<start>[,<count>] +<start>[,<count>] @@`; a missing count means one line.
///
/// A deletion-only hunk has an empty post-image that starts at the line before
/// the removed block, so it is widened to that line and the one after it.
fn parse_hunk_header(line: &str) -> Option<(LineRange, LineRange)> {
    let rest = line.strip_prefix("@@ ")?;
    let (header, _) = rest.split_once(" @@")?;
    let mut sides = header.split_whitespace();
    let pre_image = parse_hunk_side(sides.next()?.strip_prefix('-')?)?;
    let mut post_image = parse_hunk_side(sides.next()?.strip_prefix('+')?)?;
    if post_image.is_empty() && !pre_image.is_empty() {
        post_image = LineRange::new(post_image.start.max(1), post_image.start + 2);
    }
    Some((pre_image, post_image))
}

fn parse_hunk_side(side: &str) -> Option<LineRange> {
    let (start, count) = match side.split_once(',') {
        Some((start, count)) => (start.parse().ok()?, count.parse().ok()?),
        None => (side.parse().ok()?, 1),
    };
    Some(LineRange::from_hunk(start, count))
}

fn whole_file_ranges(path: &Path) -> Option<Vec<LineRange>> {
    let source = fs::read_to_string(path).ok()?;
    Some(vec![LineRange::whole_file(source.lines().count())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(status: &str, old: Option<&str>, new: &str, patch: Option<&str>) -> RawDiffEntry {
        RawDiffEntry {
            status: status.to_owned(),
            old_path: old.map(str::to_owned),
            new_path: new.to_owned(),
            patch: patch.map(str::to_owned),
        }
    }

    #[test]
    fn hunk_headers_yield_pre_and_post_image_ranges() {
        let patch = "diff --git a/x.py b/x.py\n@@ -3,2 +3,4 @@ def f():\n-a\n+b\n@@ -10 +12,0 @@\n-c\n";
        assert_eq!(
            hunk_ranges(patch),
            vec![
                LineRange::new(3, 5),
                LineRange::new(3, 7),
                LineRange::new(10, 11),
                LineRange::new(12, 14),
            ]
        );
        assert!(hunk_ranges("Binary files a/x.py and b/x.py differ\n").is_empty());
    }

    #[test]
    fn deletion_only_hunks_touch_the_neighbouring_lines() {
        // Last line of a three-line file removed.
        assert_eq!(
            hunk_ranges("@@ -3 +2,0 @@\n-    return 42\n"),
            vec![LineRange::new(3, 4), LineRange::new(2, 4)]
        );
        // Leading lines removed: the post-image anchors before line 1.
        assert_eq!(
            hunk_ranges("@@ -1,2 +0,0 @@\n-import os\n-import sys\n"),
            vec![LineRange::new(1, 3), LineRange::new(1, 2)]
        );
    }

    #[test]
    fn unknown_status_letter_is_an_error() {
        let extractor = ChangeExtractor::new("/repo", "py");
        let err = extractor
            .extract(&[entry("X", None, "weird.py", None)])
            .expect_err("unknown status");
        assert!(matches!(err, AnalysisError::UnknownChangeType { ref status, .. } if status == "X"));
    }

    #[test]
    fn modified_entries_without_hunks_and_foreign_files_are_skipped() {
        let extractor = ChangeExtractor::new("/repo", "py");
        let changes = extractor
            .extract(&[
                entry("M", None, "binary.py", Some("Binary files differ\n")),
                entry("M", None, "README.md", Some("@@ -1 +1 @@\n")),
                entry("M", None, "pkg/mod.py", Some("@@ -4,0 +5,2 @@\n")),
            ])
            .expect("extract");

        assert_eq!(changes.len(), 1);
        let record = changes.get(Path::new("/repo/pkg/mod.py")).expect("mod.py");
        assert_eq!(record.change_type(), ChangeType::Modified);
        assert_eq!(
            record.ranges(),
            &[LineRange::new(4, 4), LineRange::new(5, 7)]
        );
    }

    #[test]
    fn added_and_copied_files_cover_the_whole_file() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("new.py"), "a = 1\nb = 2\nc = 3\n").expect("write");
        fs::write(temp.path().join("copy.py"), "a = 1\n").expect("write");

        let extractor = ChangeExtractor::new(temp.path(), "py");
        let changes = extractor
            .extract(&[
                entry("A", None, "new.py", None),
                entry("C100", Some("new.py"), "copy.py", None),
            ])
            .expect("extract");

        let added = changes.get(&temp.path().join("new.py")).expect("new.py");
        assert_eq!(added.ranges(), &[LineRange::new(1, 4)]);
        assert!(changes.is_added(&temp.path().join("copy.py")));
    }

    #[test]
    fn deleted_files_have_no_ranges_and_renames_keep_the_old_path() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("renamed.py"), "x = 1\n").expect("write");

        let extractor = ChangeExtractor::new(temp.path(), "py");
        let changes = extractor
            .extract(&[
                entry("D", None, "gone.py", None),
                entry("R091", Some("original.py"), "renamed.py", None),
                entry("R100", Some("script.py"), "script.txt", None),
            ])
            .expect("extract");

        let deleted = changes.get(&temp.path().join("gone.py")).expect("gone.py");
        assert_eq!(deleted.changed_line_ranges(), None);

        let renamed = changes
            .get(&temp.path().join("renamed.py"))
            .expect("renamed.py");
        assert_eq!(renamed.old_path(), Some(temp.path().join("original.py").as_path()));
        assert_eq!(renamed.ranges(), &[LineRange::new(1, 2)]);

        let demoted = changes
            .get(&temp.path().join("script.txt"))
            .expect("script.txt");
        assert_eq!(demoted.change_type(), ChangeType::Renamed);
        assert_eq!(demoted.changed_line_ranges(), None);
    }

    #[test]
    fn retyped_entries_keep_ranges_only_while_still_a_source_file() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("mode.py"), "def run():\n    pass\n").expect("write");
        fs::write(temp.path().join("tool.sh"), "echo hi\n").expect("write");

        let extractor = ChangeExtractor::new(temp.path(), "py");
        let changes = extractor
            .extract(&[
                entry("T", Some("mode.py"), "mode.py", None),
                entry("T", Some("tool.py"), "tool.sh", None),
                entry("T", Some("notes.txt"), "notes.md", None),
            ])
            .expect("extract");

        assert_eq!(changes.len(), 2);
        let retyped = changes.get(&temp.path().join("mode.py")).expect("mode.py");
        assert_eq!(retyped.change_type(), ChangeType::Retyped);
        assert_eq!(retyped.ranges(), &[LineRange::new(1, 3)]);

        let demoted = changes.get(&temp.path().join("tool.sh")).expect("tool.sh");
        assert_eq!(demoted.change_type(), ChangeType::Retyped);
        assert_eq!(demoted.old_path(), Some(temp.path().join("tool.py").as_path()));
        assert_eq!(demoted.changed_line_ranges(), None);
    }

    #[cfg(unix)]
    #[test]
    fn retyped_symlinks_lose_their_ranges() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("target.py"), "x = 1\n").expect("write");
        std::os::unix::fs::symlink(temp.path().join("target.py"), temp.path().join("link.py"))
            .expect("symlink");

        let extractor = ChangeExtractor::new(temp.path(), "py");
        let changes = extractor
            .extract(&[entry("T", None, "link.py", None)])
            .expect("extract");

        let link = changes.get(&temp.path().join("link.py")).expect("link.py");
        assert_eq!(link.change_type(), ChangeType::Retyped);
        assert_eq!(link.changed_line_ranges(), None);
    }

    #[test]
    fn all_files_marks_sources_as_added() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("hello.py");
        let notes = temp.path().join("notes.txt");
        fs::write(&source, "def hello():\n    return 1\n").expect("write");
        fs::write(&notes, "hi\n").expect("write");

        let extractor = ChangeExtractor::new(temp.path(), "py");
        let changes = extractor.all_files([source.as_path(), notes.as_path()]);

        assert_eq!(changes.len(), 1);
        assert!(changes.is_added(&source));
    }
}
