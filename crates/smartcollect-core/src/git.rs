use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use thiserror::Error;

use crate::RawDiffEntry;

pub struct GitContext {
    repo: gix::Repository,
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("git {command} failed: {message}")]
    Command { command: String, message: String },
    #[error("repository has no working directory")]
    NoWorkdir,
}

/// The revision the working history is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffBase {
    /// `HEAD~N..HEAD`
    Commits(u32),
    /// `<branch>...HEAD`, i.e. everything since the merge base.
    Branch(String),
}

impl DiffBase {
    fn revision_args(&self) -> Vec<String> {
        match self {
            Self::Commits(count) => vec![format!("HEAD~{}", (*count).max(1)), "HEAD".to_owned()],
            Self::Branch(branch) => vec![format!("{}...HEAD", branch.trim())],
        }
    }
}

impl GitContext {
    pub fn open(workspace: &Path) -> Option<Self> {
        gix::discover(workspace).ok().map(|repo| Self { repo })
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    pub fn head_commit_hash(&self) -> Option<String> {
        let head_id = self.repo.head_id().ok()?.detach();
        Some(head_id.to_string().to_ascii_lowercase())
    }

    /// Number of commits reachable from HEAD; zero for an unborn branch.
    pub fn commit_count(&self) -> usize {
        let Some(head_id) = self.repo.head_id().ok().map(|id| id.detach()) else {
            return 0;
        };

        let Ok(walk) = self.repo.rev_walk([head_id]).all() else {
            return 0;
        };

        walk.filter_map(Result::ok).count()
    }

    pub fn diff_entries(&self, base: &DiffBase) -> Result<Vec<RawDiffEntry>, GitError> {
        let workdir = self.workdir().ok_or(GitError::NoWorkdir)?;
        let revisions = base.revision_args();

        let mut status_args = vec!["diff", "--name-status", "-z", "-M"];
        status_args.extend(revisions.iter().map(String::as_str));
        status_args.push("--");
        let status_output = run_git(workdir, &status_args)?;

        let mut patch_args = vec!["diff", "-U0", "--no-color", "--no-ext-diff", "-M"];
        patch_args.extend(revisions.iter().map(String::as_str));
        patch_args.push("--");
        let patch_output = run_git(workdir, &patch_args)?;

        let mut patches = split_patch_blocks(&String::from_utf8_lossy(&patch_output));
        let entries = parse_name_status(&status_output)
            .into_iter()
            .map(|mut entry| {
                entry.patch = patches.remove(&entry.new_path);
                entry
            })
            .collect();

        Ok(entries)
    }
}

fn run_git(workdir: &Path, args: &[&str]) -> Result<Vec<u8>, GitError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workdir)
        .args(args)
        .output()?;
    if !output.status.success() {
        return Err(GitError::Command {
            command: args.first().copied().unwrap_or_default().to_owned(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(output.stdout)
}

/// Parses `git diff --name-status -z` output. Renames and copies carry two paths.
pub(crate) fn parse_name_status(bytes: &[u8]) -> Vec<RawDiffEntry> {
    let mut fields = bytes
        .split(|byte| *byte == 0)
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .filter(|field| !field.is_empty());

    let mut entries = Vec::new();
    while let Some(status) = fields.next() {
        let two_paths = status.starts_with('R') || status.starts_with('C');
        let Some(first) = fields.next() else {
            break;
        };

        let (old_path, new_path) = if two_paths {
            let Some(second) = fields.next() else {
                break;
            };
            (Some(first), second)
        } else if status.starts_with('T') {
            (Some(first.clone()), first)
        } else {
            (None, first)
        };

        entries.push(RawDiffEntry {
            status,
            old_path,
            new_path,
            patch: None,
        });
    }

    entries
}

/// Splits a multi-file unified diff into one block per file, keyed by the
/// post-image path (the pre-image path for deletions).
pub(crate) fn split_patch_blocks(text: &str) -> HashMap<String, String> {
    let mut blocks = HashMap::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.starts_with("diff --git ") && !current.is_empty() {
            insert_block(&mut blocks, &current);
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        insert_block(&mut blocks, &current);
    }

    blocks
}

fn insert_block(blocks: &mut HashMap<String, String>, lines: &[&str]) {
    let mut minus = None;
    let mut plus = None;
    let mut rename_to = None;

    for line in lines {
        if let Some(path) = line.strip_prefix("--- ") {
            minus = strip_side_prefix(path, "a/");
        } else if let Some(path) = line.strip_prefix("+++ ") {
            plus = strip_side_prefix(path, "b/");
        } else if let Some(path) = line.strip_prefix("rename to ") {
            rename_to = Some(path.trim().to_owned());
        }
    }

    if let Some(key) = plus.or(rename_to).or(minus) {
        blocks.insert(key, lines.join("\n"));
    }
}

fn strip_side_prefix(path: &str, prefix: &str) -> Option<String> {
    let path = path.trim();
    if path == "/dev/null" {
        return None;
    }
    Some(path.strip_prefix(prefix).unwrap_or(path).to_owned())
}
