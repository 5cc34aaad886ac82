use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use smartcollect_config::TestsConfig;
use smartcollect_parse::{DeclarationKind, ParsedModule};

use crate::AnalysisError;
use crate::graph::{AnalysisContext, NodeKey};
use crate::index::ProjectIndex;

/// One collected test, addressed the way pytest prints it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestItem {
    /// `path/to/test_file.py::test_fn` or `path/to/test_file.py::TestClass::test_fn`
    pub node_id: String,
    pub file: PathBuf,
    /// Function for plain tests, `Class.method` for methods.
    pub root_symbol: String,
    pub function: String,
    pub class: Option<String>,
    pub skip_marked: bool,
}

impl TestItem {
    pub fn root_key(&self) -> NodeKey {
        NodeKey::new(&self.file, &self.root_symbol)
    }
}

/// Static pytest-style discovery over the indexed project files.
#[derive(Debug, Clone)]
pub struct TestCollector {
    file_patterns: GlobSet,
    function_prefix: String,
    class_prefix: String,
    skip_markers: Vec<String>,
}

impl TestCollector {
    pub fn new(config: &TestsConfig) -> Result<Self, AnalysisError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.file_patterns {
            let glob = Glob::new(pattern).map_err(|err| AnalysisError::Pattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
            builder.add(glob);
        }
        let file_patterns = builder.build().map_err(|err| AnalysisError::Pattern {
            pattern: config.file_patterns.join(", "),
            message: err.to_string(),
        })?;

        Ok(Self {
            file_patterns,
            function_prefix: config.function_prefix.clone(),
            class_prefix: config.class_prefix.clone(),
            skip_markers: config.skip_markers.clone(),
        })
    }

    /// Patterns match the file name only, as pytest's `python_files` does.
    pub fn is_test_file(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.file_patterns.is_match(Path::new(name)))
    }

    pub fn collect(&self, context: &mut AnalysisContext) -> Result<Vec<TestItem>, AnalysisError> {
        let files = context
            .index()
            .files()
            .iter()
            .filter(|path| self.is_test_file(path))
            .cloned()
            .collect::<Vec<_>>();

        let mut items = Vec::new();
        for file in files {
            let module = context.module(&file)?;
            items.extend(self.collect_module(context.index(), &module));
        }

        tracing::debug!(tests = items.len(), "collected tests");
        Ok(items)
    }

    fn collect_module(&self, index: &ProjectIndex, module: &ParsedModule) -> Vec<TestItem> {
        let relative = index.display(&module.path);
        let mut items = Vec::new();

        for declaration in &module.declarations {
            let name = declaration.name();
            match declaration.kind {
                DeclarationKind::Function if name.starts_with(&self.function_prefix) => {
                    items.push(TestItem {
                        node_id: format!("{relative}::{name}"),
                        file: module.path.clone(),
                        root_symbol: name.to_owned(),
                        function: name.to_owned(),
                        class: None,
                        skip_marked: self.is_skip(&declaration.decorators),
                    });
                }
                DeclarationKind::Class if name.starts_with(&self.class_prefix) => {
                    // pytest refuses to collect classes with a constructor.
                    if declaration.methods.iter().any(|method| method.name == "__init__") {
                        tracing::debug!(class = %name, path = %relative, "skipping test class with __init__");
                        continue;
                    }
                    let class_skipped = self.is_skip(&declaration.decorators);
                    for method in &declaration.methods {
                        if !method.name.starts_with(&self.function_prefix) {
                            continue;
                        }
                        items.push(TestItem {
                            node_id: format!("{relative}::{name}::{}", method.name),
                            file: module.path.clone(),
                            root_symbol: format!("{name}.{}", method.name),
                            function: method.name.clone(),
                            class: Some(name.to_owned()),
                            skip_marked: class_skipped || self.is_skip(&method.decorators),
                        });
                    }
                }
                _ => {}
            }
        }

        items
    }

    fn is_skip(&self, decorators: &[String]) -> bool {
        decorators
            .iter()
            .any(|decorator| self.skip_markers.iter().any(|marker| marker == decorator))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use smartcollect_config::SmartCollectConfig;
    use smartcollect_core::ChangeSet;
    use tempfile::tempdir;

    #[test]
    fn collects_functions_and_class_methods_with_pytest_ids() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("root");
        fs::create_dir_all(root.join("tests")).expect("mkdir");
        fs::write(
            root.join("tests/test_math.py"),
            "import pytest\n\n\
             def test_add():\n    pass\n\n\
             @pytest.mark.skip(reason='slow')\ndef test_slow():\n    pass\n\n\
             def helper():\n    pass\n\n\
             class TestOps:\n    def test_mul(self):\n        pass\n\n    def setup_method(self):\n        pass\n\n\
             class TestBroken:\n    def __init__(self):\n        pass\n\n    def test_never(self):\n        pass\n",
        )
        .expect("write");
        fs::write(root.join("tests/conftest.py"), "def test_not_collected():\n    pass\n")
            .expect("write");
        fs::write(root.join("math_test.py"), "def test_suffix():\n    pass\n").expect("write");

        let config = SmartCollectConfig::default();
        let mut context =
            AnalysisContext::new(&root, &config, ChangeSet::new()).expect("context");
        let collector = TestCollector::new(&config.tests).expect("collector");
        let items = collector.collect(&mut context).expect("collect");

        let ids = items
            .iter()
            .map(|item| item.node_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "math_test.py::test_suffix",
                "tests/test_math.py::test_add",
                "tests/test_math.py::test_slow",
                "tests/test_math.py::TestOps::test_mul",
            ]
        );

        let slow = &items[2];
        assert!(slow.skip_marked);
        let method = &items[3];
        assert_eq!(method.root_symbol, "TestOps.test_mul");
        assert_eq!(method.class.as_deref(), Some("TestOps"));
        assert_eq!(
            method.root_key(),
            NodeKey::new(root.join("tests/test_math.py"), "TestOps.test_mul")
        );
        assert_eq!(context.render_key(&method.root_key()), method.node_id);
    }
}
