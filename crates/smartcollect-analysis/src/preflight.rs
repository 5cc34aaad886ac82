use std::fs;
use std::path::{Path, PathBuf};

use smartcollect_core::ChangeType;
use smartcollect_parse::{ImportStatement, ImportStyle};

use crate::graph::AnalysisContext;
use crate::index::ProjectIndex;
use crate::{AnalysisError, AnalysisWarning};

/// An import that still names a module whose file was removed or renamed away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub removed: PathBuf,
    pub module: String,
    pub importer: PathBuf,
    pub line: usize,
}

impl AnalysisContext {
    /// Looks for imports of modules that no longer exist under their old path:
    /// deleted files, the old side of renames, and retyped files that stopped
    /// being source. Fatal or a warning depending on policy.
    pub fn preflight(&mut self) -> Result<Vec<DanglingReference>, AnalysisError> {
        let removed = self
            .changes()
            .iter()
            .filter_map(|record| match record.change_type() {
                ChangeType::Deleted => Some(record.current_path().to_path_buf()),
                ChangeType::Renamed => record.old_path().map(Path::to_path_buf),
                ChangeType::Retyped if record.changed_line_ranges().is_none() => {
                    record.old_path().map(Path::to_path_buf)
                }
                _ => None,
            })
            .filter(|path| self.index.is_source(path))
            .collect::<Vec<_>>();

        let mut found = Vec::new();
        for path in removed {
            let Some(module) = self.index.qualified_name(&path) else {
                continue;
            };
            found.extend(self.references_to(&path, &module)?);
        }

        for reference in &found {
            let importer = self.index.display(&reference.importer);
            let removed = self.index.display(&reference.removed);
            if self.dangling_references.is_fatal() {
                return Err(AnalysisError::DanglingReference {
                    removed,
                    importer,
                    line: reference.line,
                    module: reference.module.clone(),
                });
            }

            tracing::warn!(
                importer = %importer,
                line = reference.line,
                module = %reference.module,
                removed = %removed,
                "import of removed module"
            );
            self.warnings.push(AnalysisWarning::new(
                "dangling_reference",
                format!(
                    "{importer}:{} imports '{}', but {removed} no longer exists",
                    reference.line, reference.module
                ),
            ));
        }

        Ok(found)
    }

    fn references_to(
        &mut self,
        removed: &Path,
        module: &str,
    ) -> Result<Vec<DanglingReference>, AnalysisError> {
        let last_segment = module.rsplit('.').next().unwrap_or(module);
        let files = self.index.files().to_vec();
        let mut found = Vec::new();

        for file in files {
            if file == removed {
                continue;
            }
            // Text check before parsing: the import must spell the last segment.
            let Ok(source) = fs::read_to_string(&file) else {
                continue;
            };
            if !source.contains(last_segment) {
                continue;
            }

            let parsed = self.modules.get(&file)?;
            for import in &parsed.imports {
                if referenced_modules(&self.index, &file, import)
                    .iter()
                    .any(|referenced| referenced == module)
                {
                    found.push(DanglingReference {
                        removed: removed.to_path_buf(),
                        module: module.to_owned(),
                        importer: file.clone(),
                        line: import.line,
                    });
                }
            }
        }

        Ok(found)
    }
}

/// Absolute module names an import statement may load: the module itself and,
/// for `from` imports, each member read as a submodule.
fn referenced_modules(index: &ProjectIndex, importer: &Path, import: &ImportStatement) -> Vec<String> {
    match import.style {
        ImportStyle::Plain => import.module.iter().cloned().collect(),
        ImportStyle::From => {
            let Some(base) = absolute_from_module(index, importer, import) else {
                return Vec::new();
            };
            let mut names = import
                .members
                .iter()
                .map(|member| join_module(&base, &member.name))
                .collect::<Vec<_>>();
            if !base.is_empty() {
                names.insert(0, base);
            }
            names
        }
    }
}

fn absolute_from_module(
    index: &ProjectIndex,
    importer: &Path,
    import: &ImportStatement,
) -> Option<String> {
    let written = import.module.clone().unwrap_or_default();
    if import.level == 0 {
        return Some(written);
    }

    let mut base = importer.parent()?;
    for _ in 1..import.level {
        base = base.parent()?;
    }
    // A plain directory contributes no package prefix, as for top-level test dirs.
    let package = index.package_name(base).unwrap_or_default();
    Some(join_module(&package, &written))
}

fn join_module(prefix: &str, name: &str) -> String {
    match (prefix.is_empty(), name.is_empty()) {
        (true, _) => name.to_owned(),
        (_, true) => prefix.to_owned(),
        _ => format!("{prefix}.{name}"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use smartcollect_config::{FailurePolicy, SmartCollectConfig};
    use smartcollect_core::{ChangeRecord, ChangeSet};
    use tempfile::tempdir;

    fn write(root: &Path, path: &str, source: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, source).expect("write");
    }

    #[test]
    fn deleted_module_still_imported_is_fatal_by_default() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("root");
        write(&root, "pkg/__init__.py", "");
        write(&root, "pkg/users.py", "from .legacy import load\n");
        write(&root, "test_users.py", "from pkg import legacy\n");
        let changes: ChangeSet = [ChangeRecord::deleted(root.join("pkg/legacy.py"))]
            .into_iter()
            .collect();

        let mut context = AnalysisContext::new(&root, &SmartCollectConfig::default(), changes)
            .expect("context");
        let err = context.preflight().expect_err("dangling reference");
        match err {
            AnalysisError::DanglingReference { module, removed, .. } => {
                assert_eq!(module, "pkg.legacy");
                assert_eq!(removed, "pkg/legacy.py");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn renamed_module_imported_by_old_name_warns_under_permissive_policy() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("root");
        write(&root, "fresh.py", "def f():\n    pass\n");
        write(&root, "test_old.py", "import stale\nimport fresh\n");
        let changes: ChangeSet = [ChangeRecord::renamed(
            root.join("stale.py"),
            root.join("fresh.py"),
            None,
        )]
        .into_iter()
        .collect();

        let mut config = SmartCollectConfig::default();
        config.policy.dangling_references = FailurePolicy::Warn;
        let mut context = AnalysisContext::new(&root, &config, changes).expect("context");

        let found = context.preflight().expect("warn only");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].importer, root.join("test_old.py"));
        assert_eq!(found[0].line, 1);
        assert_eq!(context.warnings().len(), 1);
        assert_eq!(context.warnings()[0].code, "dangling_reference");
    }

    #[test]
    fn unrelated_deletions_pass() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("root");
        write(&root, "test_a.py", "import os\n\ndef test_a():\n    pass\n");
        let changes: ChangeSet = [ChangeRecord::deleted(root.join("unused.py"))]
            .into_iter()
            .collect();

        let mut context = AnalysisContext::new(&root, &SmartCollectConfig::default(), changes)
            .expect("context");
        assert!(context.preflight().expect("no references").is_empty());
    }
}
