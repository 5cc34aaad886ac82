use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use smartcollect_config::ProjectConfig;
use walkdir::WalkDir;

const VIRTUALENV_DIRS: &[&str] = &[".venv", "venv", "env"];

/// Package roots of the Python environment the tests would run in.
///
/// Checked in order: the active virtualenv (`VIRTUAL_ENV`), virtualenvs kept
/// inside the project, then the configured interpreter's `sys.path`. Missing
/// interpreters and unreadable directories are skipped.
pub fn installed_package_roots(root: &Path, project: &ProjectConfig) -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Some(active) = env::var_os("VIRTUAL_ENV").filter(|value| !value.is_empty()) {
        roots.extend(site_packages(Path::new(&active)));
    }
    for name in VIRTUALENV_DIRS {
        roots.extend(site_packages(&root.join(name)));
    }
    roots.extend(interpreter_path(&project.python, root));

    let mut unique = Vec::with_capacity(roots.len());
    for path in roots {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    tracing::debug!(roots = unique.len(), "discovered installed package roots");
    unique
}

/// `lib/python*/site-packages` on POSIX layouts, `Lib/site-packages` on Windows.
fn site_packages(environment: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();

    let windows = environment.join("Lib").join("site-packages");
    if windows.is_dir() {
        found.push(windows);
    }

    let lib = environment.join("lib");
    if !lib.is_dir() {
        return found;
    }
    let versions = WalkDir::new(&lib)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("python"));
    for version in versions {
        let candidate = version.path().join("site-packages");
        if candidate.is_dir() {
            found.push(candidate);
        }
    }

    found
}

fn interpreter_path(python: &str, root: &Path) -> Vec<PathBuf> {
    let output = Command::new(python)
        .args(["-c", "import sys; print('\\n'.join(sys.path))"])
        .current_dir(root)
        .output();
    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            tracing::debug!(python, status = %output.status, "interpreter sys.path query failed");
            return Vec::new();
        }
        Err(err) => {
            tracing::debug!(python, error = %err, "interpreter not available");
            return Vec::new();
        }
    };

    parse_sys_path(&String::from_utf8_lossy(&output.stdout), root)
}

/// Absolute, existing directories outside the project root.
fn parse_sys_path(stdout: &str, root: &Path) -> Vec<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.is_absolute() && path.is_dir())
        .filter(|path| !path.starts_with(root))
        .collect()
}
