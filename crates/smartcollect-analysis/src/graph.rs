use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use smartcollect_config::{FailurePolicy, ProjectConfig, SmartCollectConfig};
use smartcollect_core::ChangeSet;
use smartcollect_parse::ParsedModule;

use crate::environment::installed_package_roots;
use crate::fixtures::{
    DecoratorFixtureMarker, FixtureMarker, discover_fixtures, fixture_parameters,
    requested_fixtures,
};
use crate::index::{ProjectIndex, SourceFilter};
use crate::locator::ChangedMemberSet;
use crate::modules::ModuleCache;
use crate::resolver::{ImportResolver, ImportTable, ImportTarget};
use crate::{AnalysisError, AnalysisWarning};

/// A top-level symbol in a module file, or a method of a top-level class
/// written `Class.method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub module: PathBuf,
    pub symbol: String,
}

impl NodeKey {
    pub fn new(module: impl Into<PathBuf>, symbol: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    fn from_target(target: ImportTarget) -> Option<Self> {
        let symbol = target.symbol?;
        Some(Self::new(target.file, symbol))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisitColor {
    #[default]
    Unvisited,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeState {
    #[default]
    Unknown,
    /// Changed itself (`via: None`) or depends on a change through `via`.
    Changed { via: Option<NodeIndex> },
    /// Its whole dependency sub-graph was walked without reaching a change.
    Unchanged,
}

impl ChangeState {
    pub fn is_changed(self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub(crate) key: NodeKey,
    pub(crate) is_test: bool,
    pub(crate) changed: ChangeState,
    pub(crate) color: VisitColor,
    pub(crate) dependencies: Option<Vec<NodeIndex>>,
}

impl DependencyNode {
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn is_test(&self) -> bool {
        self.is_test
    }

    pub fn changed(&self) -> ChangeState {
        self.changed
    }

    pub fn color(&self) -> VisitColor {
        self.color
    }

    /// `None` until the node has been expanded.
    pub fn dependencies(&self) -> Option<&[NodeIndex]> {
        self.dependencies.as_deref()
    }
}

/// Run-scoped analysis state: parse cache, import tables, changed members,
/// fixtures and the shared dependency-node arena.
pub struct AnalysisContext {
    pub(crate) index: ProjectIndex,
    project: ProjectConfig,
    unresolved_imports: FailurePolicy,
    pub(crate) dangling_references: FailurePolicy,
    filter: SourceFilter,
    pub(crate) modules: ModuleCache,
    changes: ChangeSet,
    changed_members: ChangedMemberSet,
    import_tables: HashMap<PathBuf, Arc<ImportTable>>,
    fixture_marker: Box<dyn FixtureMarker>,
    fixtures: Option<BTreeMap<String, Vec<NodeKey>>>,
    pub(crate) graph: DiGraph<DependencyNode, ()>,
    nodes: HashMap<NodeKey, NodeIndex>,
    pub(crate) warnings: Vec<AnalysisWarning>,
}

impl AnalysisContext {
    /// `root` is canonicalized; change records must use the same absolute form.
    pub fn new(
        root: &Path,
        config: &SmartCollectConfig,
        changes: ChangeSet,
    ) -> Result<Self, AnalysisError> {
        let root = root.canonicalize()?;
        let index = ProjectIndex::build(&root, &config.project);
        let filter = SourceFilter::new(&root, &config.project.ignore_sources)?;

        let mut project = config.project.clone();
        if project.discover_installed {
            for path in installed_package_roots(&root, &config.project) {
                if !project.search_paths.contains(&path) {
                    project.search_paths.push(path);
                }
            }
        }

        Ok(Self {
            index,
            project,
            unresolved_imports: config.policy.unresolved_imports,
            dangling_references: config.policy.dangling_references,
            filter,
            modules: ModuleCache::new()?,
            changes,
            changed_members: ChangedMemberSet::new(),
            import_tables: HashMap::new(),
            fixture_marker: Box::new(DecoratorFixtureMarker::new(
                config.tests.fixture_decorators.iter().cloned(),
            )),
            fixtures: None,
            graph: DiGraph::new(),
            nodes: HashMap::new(),
            warnings: Vec::new(),
        })
    }

    pub fn with_fixture_marker(mut self, marker: impl FixtureMarker + 'static) -> Self {
        self.fixture_marker = Box::new(marker);
        self.fixtures = None;
        self
    }

    pub fn root(&self) -> &Path {
        self.index.root()
    }

    pub fn index(&self) -> &ProjectIndex {
        &self.index
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn warnings(&self) -> &[AnalysisWarning] {
        &self.warnings
    }

    pub fn graph(&self) -> &DiGraph<DependencyNode, ()> {
        &self.graph
    }

    pub fn node(&self, node: NodeIndex) -> &DependencyNode {
        &self.graph[node]
    }

    pub fn lookup(&self, key: &NodeKey) -> Option<NodeIndex> {
        self.nodes.get(key).copied()
    }

    pub fn module(&mut self, path: &Path) -> Result<Arc<ParsedModule>, AnalysisError> {
        Ok(self.modules.get(path)?)
    }

    /// `relative/path.py::symbol`, or `relative/path.py::Class::method`
    pub fn render_key(&self, key: &NodeKey) -> String {
        format!(
            "{}::{}",
            self.index.display(&key.module),
            key.symbol.replace('.', "::")
        )
    }

    pub fn render_node(&self, node: NodeIndex) -> String {
        self.render_key(&self.graph[node].key)
    }

    /// The arena entry for `key`, created on first request. Its change state
    /// is fixed at creation from the changed-member set.
    pub fn node_for(&mut self, key: NodeKey, is_test: bool) -> Result<NodeIndex, AnalysisError> {
        if let Some(&node) = self.nodes.get(&key) {
            if is_test && !self.graph[node].is_test {
                // Tests also depend on their fixture parameters.
                self.graph[node].is_test = true;
                self.graph[node].dependencies = None;
            }
            return Ok(node);
        }

        let changed = if self.member_changed(&key)? {
            ChangeState::Changed { via: None }
        } else {
            ChangeState::Unknown
        };

        let node = self.graph.add_node(DependencyNode {
            key: key.clone(),
            is_test,
            changed,
            color: VisitColor::Unvisited,
            dependencies: None,
        });
        self.nodes.insert(key, node);
        Ok(node)
    }

    /// Direct dependencies of `node`, computed once and then reused.
    pub fn expand(&mut self, node: NodeIndex) -> Result<Vec<NodeIndex>, AnalysisError> {
        if let Some(dependencies) = self.graph[node].dependencies.as_ref() {
            return Ok(dependencies.clone());
        }

        let key = self.graph[node].key.clone();
        if !self.index.contains(&key.module) || self.filter.is_ignored(&key.module) {
            return Ok(Vec::new());
        }

        let is_test = self.graph[node].is_test;
        let mut dependencies = Vec::new();
        for dependency in self.dependency_keys(&key, is_test)? {
            if dependency == key {
                continue;
            }
            let child = self.node_for(dependency, false)?;
            if !dependencies.contains(&child) {
                self.graph.update_edge(node, child, ());
                dependencies.push(child);
            }
        }

        tracing::debug!(
            node = %self.render_key(&key),
            dependencies = dependencies.len(),
            "expanded dependency node"
        );
        self.graph[node].dependencies = Some(dependencies.clone());
        Ok(dependencies)
    }

    fn dependency_keys(&mut self, key: &NodeKey, is_test: bool) -> Result<Vec<NodeKey>, AnalysisError> {
        let module = self.module(&key.module)?;
        let table = self.import_table(&key.module)?;

        if let Some((class_name, method_name)) = key.symbol.split_once('.') {
            return self.method_dependency_keys(&module, &table, class_name, method_name, is_test);
        }

        let Some(declaration) = module.declaration(&key.symbol) else {
            // Re-exported through an import, e.g. in a package `__init__`.
            return Ok(table
                .get(&key.symbol)
                .iter()
                .cloned()
                .filter_map(NodeKey::from_target)
                .collect());
        };

        let mut keys = Vec::new();
        if is_test || self.fixture_marker.is_fixture(declaration) {
            keys.extend(self.fixture_keys(&requested_fixtures(declaration))?);
        }

        for base in &declaration.bases {
            keys.extend(resolve_reference(&module, &table, base));
        }
        for target in &declaration.call_targets {
            keys.extend(resolve_reference(&module, &table, target));
        }

        Ok(dedup_keys(keys))
    }

    /// A method depends on its own calls, the bases of its class, and the
    /// setup and teardown hooks pytest runs around it. `self.x()` and `cls.x()`
    /// resolve to sibling methods.
    fn method_dependency_keys(
        &mut self,
        module: &ParsedModule,
        table: &ImportTable,
        class_name: &str,
        method_name: &str,
        is_test: bool,
    ) -> Result<Vec<NodeKey>, AnalysisError> {
        let Some(class) = module.declaration(class_name) else {
            return Ok(Vec::new());
        };
        let Some(method) = class.method(method_name) else {
            return Ok(Vec::new());
        };
        let sibling = |name: &str| NodeKey::new(&module.path, format!("{class_name}.{name}"));

        let mut keys = Vec::new();
        if is_test || self.fixture_marker.is_fixture_method(method) {
            keys.extend(self.fixture_keys(&fixture_parameters(&method.parameters))?);
        }

        for base in &class.bases {
            keys.extend(resolve_reference(module, table, base));
        }
        if is_test {
            for &hook in CLASS_HOOKS {
                if hook != method_name && class.method(hook).is_some() {
                    keys.push(sibling(hook));
                }
            }
        }
        for target in &method.call_targets {
            let receiver_call = target
                .strip_prefix("self.")
                .or_else(|| target.strip_prefix("cls."));
            match receiver_call {
                Some(attribute) => {
                    let name = attribute.split('.').next().unwrap_or(attribute);
                    if class.method(name).is_some() {
                        keys.push(sibling(name));
                    }
                }
                None => keys.extend(resolve_reference(module, table, target)),
            }
        }

        Ok(dedup_keys(keys))
    }

    fn fixture_keys(&mut self, requested: &[String]) -> Result<Vec<NodeKey>, AnalysisError> {
        let fixtures = self.fixtures()?;
        Ok(requested
            .iter()
            .filter_map(|name| fixtures.get(name))
            .flatten()
            .cloned()
            .collect())
    }

    pub fn import_table(&mut self, path: &Path) -> Result<Arc<ImportTable>, AnalysisError> {
        if let Some(table) = self.import_tables.get(path) {
            return Ok(Arc::clone(table));
        }

        let module = self.module(path)?;
        let resolver = ImportResolver::new(&self.index, &self.project);
        let modules = &mut self.modules;
        let mut exports = |file: &Path| -> Result<BTreeSet<String>, AnalysisError> {
            Ok(modules.get(file)?.exported_names())
        };
        let table = Arc::new(resolver.import_table(
            &module,
            self.unresolved_imports,
            &mut exports,
            &mut self.warnings,
        )?);

        self.import_tables
            .insert(path.to_path_buf(), Arc::clone(&table));
        Ok(table)
    }

    /// Project-wide fixtures by name, discovered on first use.
    pub fn fixtures(&mut self) -> Result<&BTreeMap<String, Vec<NodeKey>>, AnalysisError> {
        if self.fixtures.is_none() {
            let found = discover_fixtures(
                &self.index,
                &mut self.modules,
                self.fixture_marker.as_ref(),
            )?;
            self.fixtures = Some(found);
        }
        Ok(self.fixtures.get_or_insert_default())
    }

    fn member_changed(&mut self, key: &NodeKey) -> Result<bool, AnalysisError> {
        let Some(ranges) = self
            .changes
            .get(&key.module)
            .and_then(|record| record.changed_line_ranges())
            .map(<[_]>::to_vec)
        else {
            return Ok(false);
        };

        if self.changed_members.get(&key.module).is_none() {
            let module = self.module(&key.module)?;
            let members = self.changed_members.record(&module, &ranges);
            if !members.is_empty() {
                tracing::info!(
                    path = %self.index.display(&key.module),
                    members = ?members,
                    "changed members"
                );
            }
        }

        Ok(self.changed_members.contains(&key.module, &key.symbol))
    }

    pub(crate) fn reset_colors(&mut self) {
        for node in self.graph.node_weights_mut() {
            node.color = VisitColor::Unvisited;
        }
    }
}

/// Methods pytest calls around every test of a class.
const CLASS_HOOKS: &[&str] = &[
    "setup_class",
    "teardown_class",
    "setup_method",
    "teardown_method",
    "setup",
    "teardown",
];

fn dedup_keys(mut keys: Vec<NodeKey>) -> Vec<NodeKey> {
    let mut seen = BTreeSet::new();
    keys.retain(|key| seen.insert(key.clone()));
    keys
}

/// A local declaration wins over imports; dotted references resolve through
/// their leading binding.
fn resolve_reference(module: &ParsedModule, table: &ImportTable, reference: &str) -> Vec<NodeKey> {
    let head = reference.split('.').next().unwrap_or(reference);
    if module.declares(head) {
        return vec![NodeKey::new(&module.path, head)];
    }

    table
        .resolve(reference)
        .into_iter()
        .filter_map(NodeKey::from_target)
        .collect()
}
