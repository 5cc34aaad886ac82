use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SMARTCOLLECT_DIR_NAME: &str = ".smartcollect";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_SOURCE_EXTENSION: &str = "py";
pub const DEFAULT_PACKAGE_MARKER: &str = "__init__.py";
pub const DEFAULT_COMMIT_RANGE: u32 = 1;
pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_LAST_FAILED_CACHE: &str = ".pytest_cache/v/cache/lastfailed";

/// What to do when the analysis hits a situation that may or may not be fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Error,
    Warn,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
        }
    }

    pub fn is_fatal(self) -> bool {
        self == Self::Error
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "invalid policy '{other}', expected one of: error, warn"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SmartCollectConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_source_extension")]
    pub source_extension: String,
    #[serde(default = "default_package_marker")]
    pub package_marker: String,
    /// Path prefixes or globs, relative to the workspace root.
    #[serde(default)]
    pub ignore_sources: Vec<String>,
    /// Installed-package roots (e.g. a virtualenv's site-packages).
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    /// Top-level module names known to be installed outside the project.
    #[serde(default = "default_external_modules")]
    pub external_modules: Vec<String>,
    /// Add the active environment's package roots to `search_paths`.
    #[serde(default = "default_discover_installed")]
    pub discover_installed: bool,
    /// Interpreter asked for `sys.path` during discovery.
    #[serde(default = "default_python")]
    pub python: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            source_extension: default_source_extension(),
            package_marker: default_package_marker(),
            ignore_sources: Vec::new(),
            search_paths: Vec::new(),
            external_modules: default_external_modules(),
            discover_installed: default_discover_installed(),
            python: default_python(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_commit_range")]
    pub commit_range: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            commit_range: DEFAULT_COMMIT_RANGE,
            branch: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub unresolved_imports: FailurePolicy,
    #[serde(default)]
    pub dangling_references: FailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsConfig {
    #[serde(default = "default_test_file_patterns")]
    pub file_patterns: Vec<String>,
    #[serde(default = "default_function_prefix")]
    pub function_prefix: String,
    #[serde(default = "default_class_prefix")]
    pub class_prefix: String,
    #[serde(default = "default_fixture_decorators")]
    pub fixture_decorators: Vec<String>,
    #[serde(default = "default_skip_markers")]
    pub skip_markers: Vec<String>,
    #[serde(default = "default_last_failed_cache")]
    pub last_failed_cache: PathBuf,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            file_patterns: default_test_file_patterns(),
            function_prefix: default_function_prefix(),
            class_prefix: default_class_prefix(),
            fixture_decorators: default_fixture_decorators(),
            skip_markers: default_skip_markers(),
            last_failed_cache: default_last_failed_cache(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn smartcollect_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(SMARTCOLLECT_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    smartcollect_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<SmartCollectConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(SmartCollectConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: SmartCollectConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<SmartCollectConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(smartcollect_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = SmartCollectConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &SmartCollectConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.git.commit_range == 0 {
        warnings.push(ConfigWarning {
            code: "git.commit_range",
            message: "commit_range must be at least 1; using 1".to_owned(),
        });
    }
    if config.git.branch.is_some() && config.git.commit_range != DEFAULT_COMMIT_RANGE {
        warnings.push(ConfigWarning {
            code: "git.branch",
            message: "branch takes precedence over commit_range".to_owned(),
        });
    }
    if config.tests.fixture_decorators.is_empty() {
        warnings.push(ConfigWarning {
            code: "tests.fixture_decorators",
            message: "no fixture decorators configured; fixture dependencies will be ignored"
                .to_owned(),
        });
    }
    if config.tests.file_patterns.is_empty() {
        warnings.push(ConfigWarning {
            code: "tests.file_patterns",
            message: "no test file patterns configured; no tests will be collected".to_owned(),
        });
    }
    for path in &config.project.search_paths {
        if !path.exists() {
            warnings.push(ConfigWarning {
                code: "project.search_paths",
                message: format!("search path {} does not exist", path.display()),
            });
        }
    }

    warnings
}

fn default_source_extension() -> String {
    DEFAULT_SOURCE_EXTENSION.to_owned()
}

fn default_package_marker() -> String {
    DEFAULT_PACKAGE_MARKER.to_owned()
}

fn default_external_modules() -> Vec<String> {
    vec!["pytest".to_owned(), "_pytest".to_owned()]
}

fn default_discover_installed() -> bool {
    true
}

fn default_python() -> String {
    DEFAULT_PYTHON.to_owned()
}

fn default_commit_range() -> u32 {
    DEFAULT_COMMIT_RANGE
}

fn default_test_file_patterns() -> Vec<String> {
    vec!["test_*.py".to_owned(), "*_test.py".to_owned()]
}

fn default_function_prefix() -> String {
    "test".to_owned()
}

fn default_class_prefix() -> String {
    "Test".to_owned()
}

fn default_fixture_decorators() -> Vec<String> {
    vec!["pytest.fixture".to_owned(), "fixture".to_owned()]
}

fn default_skip_markers() -> Vec<String> {
    vec![
        "pytest.mark.skip".to_owned(),
        "unittest.skip".to_owned(),
    ]
}

fn default_last_failed_cache() -> PathBuf {
    PathBuf::from(DEFAULT_LAST_FAILED_CACHE)
}

fn default_delimiter() -> char {
    ','
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .collect()
}

fn normalize_config(mut config: SmartCollectConfig) -> SmartCollectConfig {
    let extension = config
        .project
        .source_extension
        .trim()
        .trim_start_matches('.')
        .to_ascii_lowercase();
    config.project.source_extension = if extension.is_empty() {
        default_source_extension()
    } else {
        extension
    };

    let python = config.project.python.trim();
    config.project.python = if python.is_empty() {
        default_python()
    } else {
        python.to_owned()
    };

    let marker = config.project.package_marker.trim();
    config.project.package_marker = if marker.is_empty() {
        default_package_marker()
    } else {
        marker.to_owned()
    };

    config.project.ignore_sources = normalize_list(config.project.ignore_sources);
    config.project.external_modules = normalize_list(config.project.external_modules);
    config.git.branch = config
        .git
        .branch
        .take()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty());
    config.tests.file_patterns = normalize_list(config.tests.file_patterns);
    config.tests.fixture_decorators = normalize_list(config.tests.fixture_decorators);
    config.tests.skip_markers = normalize_list(config.tests.skip_markers);

    config
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn ensure_workspace_config_creates_default_file() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();

        let config = ensure_workspace_config(workspace).expect("ensure config");

        assert_eq!(config.project.source_extension, "py");
        assert_eq!(config.policy.unresolved_imports, FailurePolicy::Error);
        assert!(config_path(workspace).exists());

        let content = fs::read_to_string(config_path(workspace)).expect("read config file");
        assert!(content.contains("[project]"));
        assert!(content.contains("unresolved_imports = \"error\""));
    }

    #[test]
    fn load_workspace_config_parses_and_normalizes_values() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();
        fs::create_dir_all(smartcollect_dir(workspace)).expect("create .smartcollect");

        let raw = r#"
[project]
source_extension = ".PY"
ignore_sources = ["vendor/", "  ", "build/*.py"]

[git]
commit_range = 3
branch = "  "

[policy]
unresolved_imports = "warn"

[tests]
fixture_decorators = ["pytest.fixture", "pytest_asyncio.fixture"]
"#;
        fs::write(config_path(workspace), raw).expect("write config");

        let config = load_workspace_config(workspace).expect("load config");

        assert_eq!(config.project.source_extension, "py");
        assert_eq!(config.project.package_marker, DEFAULT_PACKAGE_MARKER);
        assert_eq!(config.project.ignore_sources, vec!["vendor/", "build/*.py"]);
        assert_eq!(config.git.commit_range, 3);
        assert_eq!(config.git.branch, None);
        assert_eq!(config.policy.unresolved_imports, FailurePolicy::Warn);
        assert_eq!(config.policy.dangling_references, FailurePolicy::Error);
        assert_eq!(
            config.tests.fixture_decorators,
            vec!["pytest.fixture", "pytest_asyncio.fixture"]
        );
        assert_eq!(config.tests.function_prefix, "test");
        assert!(config.project.discover_installed);
        assert_eq!(config.project.python, DEFAULT_PYTHON);
    }

    #[test]
    fn installed_package_discovery_can_be_turned_off() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();
        fs::create_dir_all(smartcollect_dir(workspace)).expect("create .smartcollect");
        fs::write(
            config_path(workspace),
            "[project]\ndiscover_installed = false\npython = \" /opt/py/bin/python3 \"\n",
        )
        .expect("write config");

        let config = load_workspace_config(workspace).expect("load config");
        assert!(!config.project.discover_installed);
        assert_eq!(config.project.python, "/opt/py/bin/python3");
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let temp = tempdir().expect("tempdir");
        let config = load_workspace_config(temp.path()).expect("load config");
        assert_eq!(config, SmartCollectConfig::default());
    }

    #[test]
    fn validate_config_flags_suspicious_values() {
        let mut config = SmartCollectConfig::default();
        config.git.commit_range = 0;
        config.tests.fixture_decorators.clear();

        let codes = validate_config(&config)
            .into_iter()
            .map(|warning| warning.code)
            .collect::<Vec<_>>();
        assert!(codes.contains(&"git.commit_range"));
        assert!(codes.contains(&"tests.fixture_decorators"));
    }

    #[test]
    fn failure_policy_parses_from_cli_values() {
        assert_eq!("warn".parse::<FailurePolicy>(), Ok(FailurePolicy::Warn));
        assert_eq!(" error ".parse::<FailurePolicy>(), Ok(FailurePolicy::Error));
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }
}
