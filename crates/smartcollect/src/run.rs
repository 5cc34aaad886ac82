use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use smartcollect_analysis::{
    AnalysisContext, AnalysisWarning, ChangeExtractor, DiagnosticLog, PriorFailures,
    ProjectIndex, SourceFilter, TestCollector, TestDecision, select_tests,
};
use smartcollect_config::{
    FailurePolicy, SmartCollectConfig, config_path, load_workspace_config, validate_config,
};
use smartcollect_core::{ChangeSet, DiffBase, GitContext};

use crate::cli::{Cli, OutputFormat};

/// Everything one selection pass produced.
#[derive(Debug, Serialize)]
pub struct Selection {
    pub decisions: Vec<TestDecision>,
    pub warnings: Vec<AnalysisWarning>,
    #[serde(skip)]
    pub log: DiagnosticLog,
}

impl Selection {
    pub fn selected(&self) -> impl Iterator<Item = &TestDecision> {
        self.decisions
            .iter()
            .filter(|decision| decision.outcome.should_run())
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = resolve_config(&cli, &workspace)?;
    let selection = select(&workspace, &config, cli.all_files)?;

    if let Some(report) = &cli.report {
        write_report(report, &selection.log, config.report.delimiter)?;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.output {
        OutputFormat::Table => write_table(&mut out, &selection)?,
        OutputFormat::Json => write_json(&mut out, &selection)?,
    }
    out.flush().context("failed to flush output")?;

    Ok(())
}

/// Workspace config with command-line overrides applied on top.
pub fn resolve_config(cli: &Cli, workspace: &Path) -> Result<SmartCollectConfig> {
    let mut config = load_workspace_config(workspace).with_context(|| {
        format!(
            "failed to load workspace config at {}",
            config_path(workspace).display()
        )
    })?;

    if let Some(commit_range) = cli.commit_range {
        config.git.commit_range = commit_range;
        config.git.branch = None;
    }
    if let Some(branch) = &cli.branch {
        config.git.branch = Some(branch.clone());
    }
    config
        .project
        .ignore_sources
        .extend(cli.ignore_sources.iter().cloned());
    if cli.warn_unresolved_imports {
        config.policy.unresolved_imports = FailurePolicy::Warn;
    }
    if cli.warn_dangling_references {
        config.policy.dangling_references = FailurePolicy::Warn;
    }

    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "config warning: {}", warning.message);
    }

    Ok(config)
}

/// Computes the change set for `workspace` and decides every collected test.
pub fn select(workspace: &Path, config: &SmartCollectConfig, all_files: bool) -> Result<Selection> {
    let changes = detect_changes(workspace, config, all_files)?;
    tracing::info!(changed_files = changes.len(), "detected changes");

    let mut context = AnalysisContext::new(workspace, config, changes)
        .context("failed to index workspace")?;
    context.preflight().context("pre-flight check failed")?;

    let collector = TestCollector::new(&config.tests).context("invalid test file patterns")?;
    let tests = collector
        .collect(&mut context)
        .context("failed to collect tests")?;

    let cache = workspace.join(&config.tests.last_failed_cache);
    let prior_failures = PriorFailures::load(&cache)
        .with_context(|| format!("failed to read last-failed cache {}", cache.display()))?;

    let mut log = DiagnosticLog::new();
    let decisions = select_tests(&mut context, &tests, &prior_failures, &mut log)
        .context("test selection failed")?;

    Ok(Selection {
        decisions,
        warnings: context.warnings().to_vec(),
        log,
    })
}

fn detect_changes(
    workspace: &Path,
    config: &SmartCollectConfig,
    all_files: bool,
) -> Result<ChangeSet> {
    let git = GitContext::open(workspace)
        .ok_or_else(|| anyhow!("{} is not inside a git repository", workspace.display()))?;
    let workdir = git
        .workdir()
        .ok_or_else(|| anyhow!("repository at {} has no working tree", workspace.display()))?
        .canonicalize()
        .context("failed to resolve repository root")?;
    let extractor = ChangeExtractor::new(&workdir, &config.project.source_extension);

    let commits = git.commit_count();
    let mut changes = if all_files || commits < 2 {
        tracing::info!(commits, all_files, "treating every project file as added");
        let index = ProjectIndex::build(workspace, &config.project);
        extractor.all_files(index.files().iter().map(PathBuf::as_path))
    } else {
        let base = match &config.git.branch {
            Some(branch) => DiffBase::Branch(branch.clone()),
            None => DiffBase::Commits(config.git.commit_range),
        };
        tracing::debug!(?base, "diffing against base revision");
        let entries = git
            .diff_entries(&base)
            .context("failed to read git diff")?;
        extractor
            .extract(&entries)
            .context("failed to extract changes")?
    };

    changes.retain(|record| record.current_path().starts_with(workspace));
    SourceFilter::new(workspace, &config.project.ignore_sources)
        .context("invalid ignore pattern")?
        .apply(&mut changes);

    Ok(changes)
}

fn write_report(path: &Path, log: &DiagnosticLog, delimiter: char) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create report {}", path.display()))?;
    log.write_delimited(BufWriter::new(file), delimiter)
        .with_context(|| format!("failed to write report {}", path.display()))
}

pub fn write_table(out: &mut dyn Write, selection: &Selection) -> Result<()> {
    for decision in &selection.decisions {
        let label = if decision.outcome.should_run() {
            "RUN"
        } else {
            "SKIP"
        };
        writeln!(
            out,
            "{label:<4} {} ({})",
            decision.test_id,
            decision.outcome.reason()
        )?;
    }
    for warning in &selection.warnings {
        writeln!(out, "WARN [{}] {}", warning.code, warning.message)?;
    }
    writeln!(
        out,
        "{} of {} tests selected",
        selection.selected().count(),
        selection.decisions.len()
    )?;
    Ok(())
}

pub fn write_json(out: &mut dyn Write, selection: &Selection) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, selection).context("failed to encode selection")?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartcollect_analysis::TestOutcome;

    fn sample() -> Selection {
        Selection {
            decisions: vec![
                TestDecision {
                    test_id: "test_a.py::test_a".to_owned(),
                    outcome: TestOutcome::RunNewTest,
                },
                TestDecision {
                    test_id: "test_b.py::test_b".to_owned(),
                    outcome: TestOutcome::SkipUnchanged,
                },
            ],
            warnings: vec![AnalysisWarning::new("unresolved_import", "a.py:1 imports 'gone'")],
            log: DiagnosticLog::new(),
        }
    }

    #[test]
    fn table_lists_every_decision_and_warning() {
        let mut out = Vec::new();
        write_table(&mut out, &sample()).expect("table");
        let text = String::from_utf8(out).expect("utf8");

        assert_eq!(
            text,
            "RUN  test_a.py::test_a (new test)\n\
             SKIP test_b.py::test_b (this test doesn't touch new or modified code)\n\
             WARN [unresolved_import] a.py:1 imports 'gone'\n\
             1 of 2 tests selected\n"
        );
    }

    #[test]
    fn json_carries_decisions_and_warnings() {
        let mut out = Vec::new();
        write_json(&mut out, &sample()).expect("json");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("valid json");

        assert_eq!(value["decisions"][0]["test_id"], "test_a.py::test_a");
        assert_eq!(value["decisions"][0]["outcome"], "run_new_test");
        assert_eq!(value["decisions"][1]["outcome"], "skip_unchanged");
        assert_eq!(value["warnings"][0]["code"], "unresolved_import");
        assert!(value.get("log").is_none());
    }
}
