use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tree_sitter::{Parser, Query};

use crate::python;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load python tree-sitter grammar: {0}")]
    Grammar(String),
    #[error("invalid call query: {0}")]
    Query(String),
    #[error("tree-sitter produced no syntax tree for {path}")]
    NoTree { path: String },
    #[error("syntax error in {path} at line {line}, column {column}")]
    Syntax {
        path: String,
        line: usize,
        column: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Function,
    Class,
    Variable,
}

impl DeclarationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Variable => "variable",
        }
    }
}

/// A top-level function, class or variable binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclarationKind,
    /// Every name bound by the declaration; tuple assignments bind several.
    pub names: Vec<String>,
    /// 1-based, decorators included.
    pub start_line: usize,
    pub end_line: usize,
    /// Decorator expressions with call arguments stripped, e.g. `pytest.fixture`.
    pub decorators: Vec<String>,
    pub parameters: Vec<String>,
    pub bases: Vec<String>,
    /// Bare (`helper`) or dotted (`mod.helper`) call targets in source order, decorators first.
    pub call_targets: Vec<String>,
    pub methods: Vec<ClassMethod>,
    /// String `name=` keyword of a decorator call, as in `@pytest.fixture(name="db")`.
    pub declared_name: Option<String>,
}

impl Declaration {
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    pub fn method(&self, name: &str) -> Option<&ClassMethod> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn binds(&self, name: &str) -> bool {
        self.names.iter().any(|bound| bound == name)
    }

    pub fn has_decorator(&self, names: &[String]) -> bool {
        self.decorators
            .iter()
            .any(|decorator| names.iter().any(|name| name == decorator))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMethod {
    pub name: String,
    /// First line, decorators included.
    pub line: usize,
    pub end_line: usize,
    pub decorators: Vec<String>,
    pub parameters: Vec<String>,
    pub call_targets: Vec<String>,
    pub declared_name: Option<String>,
}

impl ClassMethod {
    pub fn has_decorator(&self, names: &[String]) -> bool {
        self.decorators
            .iter()
            .any(|decorator| names.iter().any(|name| name == decorator))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStyle {
    /// `import a.b [as c]`
    Plain,
    /// `from [.]a import b [as c]`
    From,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedName {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportedName {
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    pub style: ImportStyle,
    pub line: usize,
    /// `None` only for `from . import x`.
    pub module: Option<String>,
    /// Number of leading dots of a relative import; zero for absolute imports.
    pub level: usize,
    pub members: Vec<ImportedName>,
    pub wildcard: bool,
    /// Alias of a plain import (`import a.b as c`).
    pub alias: Option<String>,
    /// Inside a `try` block, i.e. guarded against `ImportError`.
    pub optional: bool,
}

impl ImportStatement {
    /// The local name a plain import binds: the alias, or the full dotted path.
    pub fn plain_binding(&self) -> Option<&str> {
        if self.style != ImportStyle::Plain {
            return None;
        }
        self.alias.as_deref().or(self.module.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModule {
    pub path: PathBuf,
    pub line_count: usize,
    pub declarations: Vec<Declaration>,
    pub imports: Vec<ImportStatement>,
}

impl ParsedModule {
    /// The declaration binding `name`; a later rebinding wins, as at runtime.
    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations
            .iter()
            .rev()
            .find(|declaration| declaration.binds(name))
    }

    pub fn declares(&self, name: &str) -> bool {
        self.declaration(name).is_some()
    }

    /// Names a wildcard import of this module would bind.
    pub fn exported_names(&self) -> BTreeSet<String> {
        let declared = self
            .declarations
            .iter()
            .flat_map(|declaration| declaration.names.iter().cloned());
        let imported = self.imports.iter().flat_map(|import| match import.style {
            ImportStyle::From => import
                .members
                .iter()
                .map(|member| member.binding().to_owned())
                .collect::<Vec<_>>(),
            ImportStyle::Plain => import
                .plain_binding()
                .filter(|binding| !binding.contains('.'))
                .map(ToOwned::to_owned)
                .into_iter()
                .collect(),
        });

        declared
            .chain(imported)
            .filter(|name| !name.starts_with('_'))
            .collect()
    }
}

pub struct ModuleParser {
    parser: Parser,
    call_query: Query,
}

impl ModuleParser {
    pub fn new() -> Result<Self, ParseError> {
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|err| ParseError::Grammar(err.to_string()))?;
        let call_query = Query::new(&language, include_str!("../queries/python_calls.scm"))
            .map_err(|err| ParseError::Query(err.to_string()))?;

        Ok(Self { parser, call_query })
    }

    pub fn parse_path(&mut self, path: &Path) -> Result<ParsedModule, ParseError> {
        let source = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.parse_source(path, &source)
    }

    pub fn parse_source(&mut self, path: &Path, source: &str) -> Result<ParsedModule, ParseError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ParseError::NoTree {
                path: path.display().to_string(),
            })?;
        let root = tree.root_node();

        if let Some((line, column)) = python::first_syntax_error(root) {
            return Err(ParseError::Syntax {
                path: path.display().to_string(),
                line,
                column,
            });
        }

        let source_bytes = source.as_bytes();
        let declarations = python::top_level_declarations(root, source_bytes, &self.call_query);
        let imports = python::import_statements(root, source_bytes);

        Ok(ParsedModule {
            path: path.to_path_buf(),
            line_count: source.lines().count(),
            declarations,
            imports,
        })
    }
}

/// Strips call arguments and whitespace from a decorator expression:
/// `@pytest.fixture(scope="module")` becomes `pytest.fixture`.
pub fn decorator_name(expression: &str) -> String {
    let expression = expression.trim().trim_start_matches('@').trim();
    let head = expression
        .split_once('(')
        .map_or(expression, |(head, _)| head);
    head.chars().filter(|ch| !ch.is_whitespace()).collect()
}
