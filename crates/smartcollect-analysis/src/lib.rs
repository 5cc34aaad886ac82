mod changes;
mod collect;
mod environment;
mod error;
mod fixtures;
mod graph;
mod index;
mod locator;
mod modules;
mod preflight;
mod propagate;
mod report;
mod resolver;
mod selection;
mod stdlib;

pub use changes::{ChangeExtractor, hunk_ranges};
pub use collect::{TestCollector, TestItem};
pub use environment::installed_package_roots;
pub use error::{AnalysisError, AnalysisWarning};
pub use fixtures::{DecoratorFixtureMarker, FixtureMarker};
pub use graph::{AnalysisContext, ChangeState, DependencyNode, NodeKey, VisitColor};
pub use index::{ProjectIndex, SourceFilter};
pub use locator::{ChangedMemberSet, changed_declarations};
pub use modules::ModuleCache;
pub use petgraph::graph::NodeIndex;
pub use preflight::DanglingReference;
pub use propagate::Impact;
pub use report::{Decision, DiagnosticLog, DiagnosticRecord};
pub use resolver::{ImportResolver, ImportTable, ImportTarget, ModuleResolution, ProjectModule};
pub use selection::{PriorFailures, TestDecision, TestOutcome, select_test, select_tests};
pub use stdlib::is_stdlib_module;
