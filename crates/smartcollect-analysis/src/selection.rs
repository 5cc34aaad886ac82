use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use crate::AnalysisError;
use crate::collect::TestItem;
use crate::graph::AnalysisContext;
use crate::propagate::Impact;
use crate::report::{Decision, DiagnosticLog};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
    RunNewTest,
    RunPreviouslyFailed,
    RunDependencyChanged { chain: Vec<String> },
    SkipUnchanged,
    SkipMarked,
}

impl TestOutcome {
    pub fn decision(&self) -> Decision {
        match self {
            Self::RunNewTest | Self::RunPreviouslyFailed | Self::RunDependencyChanged { .. } => {
                Decision::Run
            }
            Self::SkipUnchanged | Self::SkipMarked => Decision::Skip,
        }
    }

    pub fn should_run(&self) -> bool {
        self.decision() == Decision::Run
    }

    pub fn reason(&self) -> String {
        match self {
            Self::RunNewTest => "new test".to_owned(),
            Self::RunPreviouslyFailed => "failed on the last run".to_owned(),
            Self::RunDependencyChanged { chain } => {
                format!("dependency changed: {}", chain.join(" -> "))
            }
            Self::SkipUnchanged => "this test doesn't touch new or modified code".to_owned(),
            Self::SkipMarked => "already marked skip".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestDecision {
    pub test_id: String,
    #[serde(flatten)]
    pub outcome: TestOutcome,
}

/// Node ids that failed on the previous run, from pytest's `lastfailed` cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorFailures {
    node_ids: BTreeSet<String>,
}

impl PriorFailures {
    /// A missing cache file means nothing failed.
    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };

        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)?;
        let node_ids = entries
            .into_iter()
            .filter(|(_, failed)| failed.as_bool().unwrap_or(true))
            .map(|(node_id, _)| node_id)
            .collect();
        Ok(Self { node_ids })
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_ids.contains(node_id)
    }

    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for PriorFailures {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            node_ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Decides run or skip for one test.
///
/// Prior failures always run, skip markers always skip, tests in added files
/// always run; everything else runs only when a dependency changed.
pub fn select_test(
    context: &mut AnalysisContext,
    test: &TestItem,
    prior_failures: &PriorFailures,
) -> Result<TestOutcome, AnalysisError> {
    if prior_failures.contains(&test.node_id) {
        tracing::warn!(test = %test.node_id, "test failed on the last run, running regardless of changes");
        return Ok(TestOutcome::RunPreviouslyFailed);
    }

    if test.skip_marked {
        return Ok(TestOutcome::SkipMarked);
    }

    if context.changes().is_added(&test.file) {
        return Ok(TestOutcome::RunNewTest);
    }

    if context.changes().is_empty() {
        return Ok(TestOutcome::SkipUnchanged);
    }

    let root = context.node_for(test.root_key(), true)?;
    match context.propagate(root)? {
        Impact::Affected { chain } => Ok(TestOutcome::RunDependencyChanged {
            chain: context.render_chain(&chain),
        }),
        Impact::Unaffected => Ok(TestOutcome::SkipUnchanged),
    }
}

/// Runs [`select_test`] over every test in order, logging each decision.
pub fn select_tests(
    context: &mut AnalysisContext,
    tests: &[TestItem],
    prior_failures: &PriorFailures,
    log: &mut DiagnosticLog,
) -> Result<Vec<TestDecision>, AnalysisError> {
    let mut decisions = Vec::with_capacity(tests.len());

    for test in tests {
        let outcome = select_test(context, test, prior_failures)?;
        let reason = outcome.reason();
        tracing::info!(
            test = %test.node_id,
            decision = outcome.decision().as_str(),
            reason = %reason,
            "selected test"
        );
        log.push(outcome.decision(), &test.node_id, reason);
        decisions.push(TestDecision {
            test_id: test.node_id.clone(),
            outcome,
        });
    }

    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn prior_failures_read_the_lastfailed_cache() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("lastfailed");
        fs::write(
            &path,
            r#"{"tests/test_a.py::test_a": true, "tests/test_b.py::test_b": false}"#,
        )
        .expect("write");

        let failures = PriorFailures::load(&path).expect("load");
        assert!(failures.contains("tests/test_a.py::test_a"));
        assert!(!failures.contains("tests/test_b.py::test_b"));
        assert_eq!(failures.len(), 1);

        let missing = PriorFailures::load(&temp.path().join("absent")).expect("missing is empty");
        assert!(missing.is_empty());
    }

    #[test]
    fn malformed_cache_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("lastfailed");
        fs::write(&path, "not json").expect("write");
        assert!(matches!(PriorFailures::load(&path), Err(AnalysisError::Json(_))));
    }

    #[test]
    fn outcomes_map_to_decisions_and_reasons() {
        let changed = TestOutcome::RunDependencyChanged {
            chain: vec!["test_x.py::test_x".to_owned(), "x.py::x".to_owned()],
        };
        assert!(changed.should_run());
        assert_eq!(changed.reason(), "dependency changed: test_x.py::test_x -> x.py::x");
        assert!(!TestOutcome::SkipMarked.should_run());

        let json = serde_json::to_value(TestDecision {
            test_id: "test_x.py::test_x".to_owned(),
            outcome: changed,
        })
        .expect("json");
        assert_eq!(json["outcome"], "run_dependency_changed");
        assert_eq!(json["chain"][1], "x.py::x");
    }
}
