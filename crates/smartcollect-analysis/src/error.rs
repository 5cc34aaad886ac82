use serde::Serialize;
use smartcollect_config::ConfigError;
use smartcollect_core::GitError;
use smartcollect_parse::ParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown change type '{status}' for {path}")]
    UnknownChangeType { status: String, path: String },
    #[error("cannot resolve import '{module}' in {path}:{line}")]
    UnresolvedImport {
        path: String,
        line: usize,
        module: String,
    },
    #[error("{importer}:{line} imports '{module}', but {removed} no longer exists")]
    DanglingReference {
        removed: String,
        importer: String,
        line: usize,
        module: String,
    },
    #[error("dependency cycle detected: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },
    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

/// A non-fatal finding that the run keeps going past.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisWarning {
    pub code: &'static str,
    pub message: String,
}

impl AnalysisWarning {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
