use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use smartcollect_config::{FailurePolicy, ProjectConfig};
use smartcollect_parse::{ImportStatement, ImportStyle, ParsedModule};

use crate::index::ProjectIndex;
use crate::stdlib::is_stdlib_module;
use crate::{AnalysisError, AnalysisWarning};

/// Where an imported binding points: a symbol in a file, or the module itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportTarget {
    pub file: PathBuf,
    pub symbol: Option<String>,
}

impl ImportTarget {
    pub fn module(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            symbol: None,
        }
    }

    pub fn symbol(file: impl Into<PathBuf>, symbol: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            symbol: Some(symbol.into()),
        }
    }
}

/// Local binding name to the project locations it was imported from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    bindings: BTreeMap<String, Vec<ImportTarget>>,
}

impl ImportTable {
    pub fn bind(&mut self, binding: impl Into<String>, target: ImportTarget) {
        let targets = self.bindings.entry(binding.into()).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    pub fn get(&self, binding: &str) -> &[ImportTarget] {
        self.bindings
            .get(binding)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn binds(&self, binding: &str) -> bool {
        self.bindings.contains_key(binding)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ImportTarget])> {
        self.bindings
            .iter()
            .map(|(binding, targets)| (binding.as_str(), targets.as_slice()))
    }

    /// Resolves a bare or dotted reference such as `helper`, `mod.helper` or
    /// `pkg.mod.helper` through the longest bound prefix.
    pub fn resolve(&self, reference: &str) -> Vec<ImportTarget> {
        let segments = reference.split('.').collect::<Vec<_>>();
        if segments.len() == 1 {
            return self.get(reference).to_vec();
        }

        for split in (1..segments.len()).rev() {
            let prefix = segments[..split].join(".");
            let targets = self.get(&prefix);
            if targets.is_empty() {
                continue;
            }
            return targets
                .iter()
                .map(|target| match &target.symbol {
                    None => ImportTarget::symbol(&target.file, segments[split]),
                    Some(_) => target.clone(),
                })
                .collect();
        }

        Vec::new()
    }
}

/// A module located inside the project. Namespace packages have no file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectModule {
    pub file: Option<PathBuf>,
    pub package_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleResolution {
    Project(ProjectModule),
    Stdlib,
    /// Installed outside the project; never followed.
    External,
    Unresolved,
}

pub struct ImportResolver<'a> {
    index: &'a ProjectIndex,
    search_paths: Vec<PathBuf>,
    external_modules: &'a [String],
}

impl<'a> ImportResolver<'a> {
    pub fn new(index: &'a ProjectIndex, project: &'a ProjectConfig) -> Self {
        let search_paths = project
            .search_paths
            .iter()
            .map(|path| {
                if path.is_absolute() {
                    path.clone()
                } else {
                    index.root().join(path)
                }
            })
            .collect();

        Self {
            index,
            search_paths,
            external_modules: &project.external_modules,
        }
    }

    pub fn resolve_module(
        &self,
        importer: &Path,
        module: Option<&str>,
        level: usize,
    ) -> ModuleResolution {
        if level > 0 {
            return self.resolve_relative(importer, module, level);
        }
        match module {
            Some(module) => self.resolve_absolute(importer, module),
            None => ModuleResolution::Unresolved,
        }
    }

    fn resolve_absolute(&self, importer: &Path, module: &str) -> ModuleResolution {
        if is_stdlib_module(module) {
            return ModuleResolution::Stdlib;
        }

        let sibling = importer
            .parent()
            .and_then(|dir| self.candidate(dir, module));
        if let Some(found) = sibling {
            return ModuleResolution::Project(found);
        }

        if let Some(file) = self.index.closest(module, importer) {
            return ModuleResolution::Project(self.module_for_file(file));
        }

        if let Some(found) = self.candidate(self.index.root(), module) {
            return ModuleResolution::Project(found);
        }

        if self.is_external(module) {
            return ModuleResolution::External;
        }

        ModuleResolution::Unresolved
    }

    fn resolve_relative(
        &self,
        importer: &Path,
        module: Option<&str>,
        level: usize,
    ) -> ModuleResolution {
        let mut base = importer.parent();
        for _ in 1..level {
            base = base.and_then(Path::parent);
        }
        let Some(base) = base.filter(|base| self.index.contains(base)) else {
            return ModuleResolution::Unresolved;
        };

        let Some(module) = module else {
            let marker = base.join(self.index.package_marker());
            return ModuleResolution::Project(ProjectModule {
                file: marker.is_file().then_some(marker),
                package_dir: Some(base.to_path_buf()),
            });
        };

        if let Some(found) = self.candidate(base, module) {
            return ModuleResolution::Project(found);
        }

        let composed = self
            .index
            .package_name(base)
            .map(|package| format!("{package}.{module}"));
        if let Some(file) = composed
            .as_deref()
            .and_then(|qualified| self.index.closest(qualified, importer))
        {
            return ModuleResolution::Project(self.module_for_file(file));
        }

        ModuleResolution::Unresolved
    }

    /// `base/a/b/__init__.py`, then `base/a/b.py`, then the bare directory.
    fn candidate(&self, base: &Path, dotted: &str) -> Option<ProjectModule> {
        let relative = dotted.split('.').collect::<PathBuf>();
        let path = base.join(relative);
        if !self.index.contains(&path) {
            return None;
        }

        let marker = path.join(self.index.package_marker());
        if marker.is_file() {
            return Some(ProjectModule {
                file: Some(marker),
                package_dir: Some(path),
            });
        }

        let file = path.with_extension(self.index.source_extension());
        if file.is_file() {
            return Some(ProjectModule {
                file: Some(file),
                package_dir: None,
            });
        }

        path.is_dir().then(|| ProjectModule {
            file: None,
            package_dir: Some(path),
        })
    }

    fn module_for_file(&self, file: &Path) -> ProjectModule {
        ProjectModule {
            file: Some(file.to_path_buf()),
            package_dir: self
                .index
                .is_package_init(file)
                .then(|| file.parent().map(Path::to_path_buf))
                .flatten(),
        }
    }

    fn submodule(&self, package: &ProjectModule, name: &str) -> Option<PathBuf> {
        let dir = package.package_dir.as_deref()?;
        self.candidate(dir, name)?.file
    }

    fn is_external(&self, module: &str) -> bool {
        let top = module.split('.').next().unwrap_or(module);
        if self
            .external_modules
            .iter()
            .any(|external| external == top || external == module)
        {
            return true;
        }

        let file_name = format!("{top}.{}", self.index.source_extension());
        self.search_paths
            .iter()
            .any(|path| path.join(top).is_dir() || path.join(&file_name).is_file())
    }

    /// Builds the binding table for every import in `module`.
    ///
    /// `exports` yields the names a wildcard import of a project file binds.
    pub fn import_table(
        &self,
        module: &ParsedModule,
        policy: FailurePolicy,
        exports: &mut dyn FnMut(&Path) -> Result<BTreeSet<String>, AnalysisError>,
        warnings: &mut Vec<AnalysisWarning>,
    ) -> Result<ImportTable, AnalysisError> {
        let mut table = ImportTable::default();

        for import in &module.imports {
            match import.style {
                ImportStyle::Plain => {
                    self.bind_plain(module, import, policy, &mut table, warnings)?
                }
                ImportStyle::From => {
                    self.bind_from(module, import, policy, exports, &mut table, warnings)?
                }
            }
        }

        Ok(table)
    }

    fn bind_plain(
        &self,
        module: &ParsedModule,
        import: &ImportStatement,
        policy: FailurePolicy,
        table: &mut ImportTable,
        warnings: &mut Vec<AnalysisWarning>,
    ) -> Result<(), AnalysisError> {
        let Some(name) = import.module.as_deref() else {
            return Ok(());
        };

        let found = match self.resolve_module(&module.path, Some(name), 0) {
            ModuleResolution::Project(found) => found,
            ModuleResolution::Stdlib | ModuleResolution::External => return Ok(()),
            ModuleResolution::Unresolved => {
                return self.unresolved(module, import, name, policy, warnings);
            }
        };

        if let Some(alias) = import.alias.as_deref() {
            if let Some(file) = found.file {
                table.bind(alias, ImportTarget::module(file));
            }
            return Ok(());
        }

        if let Some(file) = found.file {
            table.bind(name, ImportTarget::module(file));
        }
        // `import a.b.c` also binds `a` and `a.b`.
        let segments = name.split('.').collect::<Vec<_>>();
        for split in 1..segments.len() {
            let prefix = segments[..split].join(".");
            if let ModuleResolution::Project(ProjectModule {
                file: Some(file), ..
            }) = self.resolve_module(&module.path, Some(&prefix), 0)
            {
                table.bind(prefix, ImportTarget::module(file));
            }
        }

        Ok(())
    }

    fn bind_from(
        &self,
        module: &ParsedModule,
        import: &ImportStatement,
        policy: FailurePolicy,
        exports: &mut dyn FnMut(&Path) -> Result<BTreeSet<String>, AnalysisError>,
        table: &mut ImportTable,
        warnings: &mut Vec<AnalysisWarning>,
    ) -> Result<(), AnalysisError> {
        let written = written_module(import);
        let found =
            match self.resolve_module(&module.path, import.module.as_deref(), import.level) {
                ModuleResolution::Project(found) => found,
                ModuleResolution::Stdlib | ModuleResolution::External => return Ok(()),
                ModuleResolution::Unresolved => {
                    return self.unresolved(module, import, &written, policy, warnings);
                }
            };

        if import.wildcard
            && let Some(file) = found.file.as_deref()
        {
            for name in exports(file)? {
                table.bind(name.clone(), ImportTarget::symbol(file, name));
            }
        }

        for member in &import.members {
            // A submodule wins over a same-named attribute of the package.
            if let Some(file) = self.submodule(&found, &member.name) {
                table.bind(member.binding(), ImportTarget::module(file));
                continue;
            }
            match found.file.as_deref() {
                Some(file) => table.bind(member.binding(), ImportTarget::symbol(file, &member.name)),
                None => {
                    let qualified = format!("{written}.{}", member.name);
                    self.unresolved(module, import, &qualified, policy, warnings)?;
                }
            }
        }

        Ok(())
    }

    fn unresolved(
        &self,
        module: &ParsedModule,
        import: &ImportStatement,
        name: &str,
        policy: FailurePolicy,
        warnings: &mut Vec<AnalysisWarning>,
    ) -> Result<(), AnalysisError> {
        let path = self.index.display(&module.path);
        if policy.is_fatal() && !import.optional {
            return Err(AnalysisError::UnresolvedImport {
                path,
                line: import.line,
                module: name.to_owned(),
            });
        }

        tracing::warn!(
            path = %path,
            line = import.line,
            module = %name,
            optional = import.optional,
            "cannot resolve import"
        );
        warnings.push(AnalysisWarning::new(
            "unresolved_import",
            format!("{path}:{}: cannot resolve import '{name}'", import.line),
        ));
        Ok(())
    }
}

/// The module as written in the source, leading dots included.
fn written_module(import: &ImportStatement) -> String {
    format!(
        "{}{}",
        ".".repeat(import.level),
        import.module.as_deref().unwrap_or_default()
    )
}
