use std::collections::BTreeMap;
use std::fs;

use smartcollect_parse::{ClassMethod, Declaration, DeclarationKind};

use crate::AnalysisError;
use crate::graph::NodeKey;
use crate::index::ProjectIndex;
use crate::modules::ModuleCache;

/// Decides whether a declaration is a fixture that tests may request by
/// parameter name.
pub trait FixtureMarker: Send {
    fn is_fixture(&self, declaration: &Declaration) -> bool;

    /// Fixtures declared inside a test class.
    fn is_fixture_method(&self, _method: &ClassMethod) -> bool {
        false
    }

    /// Cheap text check run before a file is parsed for fixtures. Returning
    /// `false` skips the file.
    fn may_declare_fixtures(&self, _source: &str) -> bool {
        true
    }
}

/// Matches decorator expressions, call arguments stripped, against a fixed set
/// of names such as `pytest.fixture`.
#[derive(Debug, Clone)]
pub struct DecoratorFixtureMarker {
    decorators: Vec<String>,
}

impl DecoratorFixtureMarker {
    pub fn new<I, S>(decorators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            decorators: decorators.into_iter().map(Into::into).collect(),
        }
    }
}

impl FixtureMarker for DecoratorFixtureMarker {
    fn is_fixture(&self, declaration: &Declaration) -> bool {
        declaration.kind == DeclarationKind::Function && declaration.has_decorator(&self.decorators)
    }

    fn is_fixture_method(&self, method: &ClassMethod) -> bool {
        method.has_decorator(&self.decorators)
    }

    fn may_declare_fixtures(&self, source: &str) -> bool {
        self.decorators.iter().any(|decorator| {
            let last = decorator.rsplit('.').next().unwrap_or(decorator);
            source.contains(last)
        })
    }
}

/// Every fixture in the project, by the name tests request it with: the
/// decorator's `name=` keyword when given, else the function name. Fixture
/// methods are keyed as `Class.method`.
pub(crate) fn discover_fixtures(
    index: &ProjectIndex,
    modules: &mut ModuleCache,
    marker: &dyn FixtureMarker,
) -> Result<BTreeMap<String, Vec<NodeKey>>, AnalysisError> {
    let mut fixtures: BTreeMap<String, Vec<NodeKey>> = BTreeMap::new();

    for path in index.files() {
        let Ok(source) = fs::read_to_string(path) else {
            continue;
        };
        if !marker.may_declare_fixtures(&source) {
            continue;
        }

        let module = modules.get(path)?;
        for declaration in &module.declarations {
            if marker.is_fixture(declaration) {
                let name = declaration.declared_name.as_deref().unwrap_or(declaration.name());
                fixtures
                    .entry(name.to_owned())
                    .or_default()
                    .push(NodeKey::new(path, declaration.name()));
            }
            if declaration.kind != DeclarationKind::Class {
                continue;
            }
            for method in &declaration.methods {
                if marker.is_fixture_method(method) {
                    let name = method.declared_name.as_deref().unwrap_or(&method.name);
                    fixtures
                        .entry(name.to_owned())
                        .or_default()
                        .push(NodeKey::new(path, format!("{}.{}", declaration.name(), method.name)));
                }
            }
        }
    }

    tracing::debug!(fixtures = fixtures.len(), "discovered project fixtures");
    Ok(fixtures)
}

/// Parameter names that may request fixtures. For classes these are the
/// parameters of every method.
pub(crate) fn requested_fixtures(declaration: &Declaration) -> Vec<String> {
    match declaration.kind {
        DeclarationKind::Class => fixture_parameters(
            declaration
                .methods
                .iter()
                .flat_map(|method| method.parameters.iter()),
        ),
        _ => fixture_parameters(&declaration.parameters),
    }
}

/// `parameters` deduplicated, minus the `self` and `cls` receivers.
pub(crate) fn fixture_parameters<'a>(parameters: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in parameters {
        if name != "self" && name != "cls" && !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use smartcollect_parse::ModuleParser;

    fn declarations(source: &str) -> Vec<Declaration> {
        let mut parser = ModuleParser::new().expect("parser");
        parser
            .parse_source(Path::new("conftest.py"), source)
            .expect("parse")
            .declarations
    }

    #[test]
    fn decorator_marker_matches_configured_names() {
        let marker = DecoratorFixtureMarker::new(["pytest.fixture", "fixture"]);
        let found = declarations(
            "import pytest\n\n@pytest.fixture(scope='session')\ndef db():\n    pass\n\n@fixture\ndef client():\n    pass\n\n@other\ndef plain():\n    pass\n",
        );

        let fixtures = found
            .iter()
            .filter(|declaration| marker.is_fixture(declaration))
            .map(Declaration::name)
            .collect::<Vec<_>>();
        assert_eq!(fixtures, vec!["db", "client"]);
        assert!(marker.may_declare_fixtures("@pytest.fixture\n"));
        assert!(!marker.may_declare_fixtures("def helper():\n    pass\n"));
    }

    #[test]
    fn class_requests_come_from_methods_without_receivers() {
        let found = declarations(
            "class TestThing:\n    def test_a(self, db):\n        pass\n\n    @classmethod\n    def test_b(cls, db, client):\n        pass\n",
        );
        assert_eq!(requested_fixtures(&found[0]), vec!["db", "client"]);
        assert_eq!(
            fixture_parameters(&found[0].methods[1].parameters),
            vec!["db", "client"]
        );
    }

    #[test]
    fn named_and_method_fixtures_are_registered() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("root");
        let conftest = root.join("conftest.py");
        fs::write(
            &conftest,
            "import pytest\n\n@pytest.fixture(name='db')\ndef make_db():\n    return {}\n\nclass TestShop:\n    @pytest.fixture\n    def basket(self):\n        return []\n\n    @pytest.fixture(name='till')\n    def make_till(self):\n        return 0\n\n    def test_buy(self, basket, till):\n        pass\n",
        )
        .expect("write");

        let index = ProjectIndex::build(&root, &smartcollect_config::ProjectConfig::default());
        let mut modules = ModuleCache::new().expect("modules");
        let marker = DecoratorFixtureMarker::new(["pytest.fixture"]);
        let fixtures = discover_fixtures(&index, &mut modules, &marker).expect("discover");

        assert_eq!(
            fixtures.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["basket", "db", "till"]
        );
        assert_eq!(fixtures["db"], vec![NodeKey::new(&conftest, "make_db")]);
        assert_eq!(fixtures["basket"], vec![NodeKey::new(&conftest, "TestShop.basket")]);
        assert_eq!(fixtures["till"], vec![NodeKey::new(&conftest, "TestShop.make_till")]);
    }
}
