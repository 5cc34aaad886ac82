use std::collections::HashSet;

use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Query, QueryCursor};

use crate::parser::{
    ClassMethod, Declaration, DeclarationKind, ImportStatement, ImportStyle, ImportedName,
    decorator_name,
};

/// 1-based line and column of the first error or missing node, if any.
pub(crate) fn first_syntax_error(root: Node<'_>) -> Option<(usize, usize)> {
    if !root.has_error() {
        return None;
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let position = node.start_position();
            return Some((position.row + 1, position.column + 1));
        }

        let mut cursor = node.walk();
        let mut children = node
            .children(&mut cursor)
            .filter(|child| child.has_error() || child.is_missing())
            .collect::<Vec<_>>();
        children.reverse();
        stack.extend(children);
    }

    let position = root.start_position();
    Some((position.row + 1, position.column + 1))
}

pub(crate) fn top_level_declarations(
    root: Node<'_>,
    source: &[u8],
    call_query: &Query,
) -> Vec<Declaration> {
    let mut cursor = root.walk();
    root.named_children(&mut cursor)
        .filter_map(|node| declaration_for(node, source, call_query))
        .collect()
}

fn declaration_for(node: Node<'_>, source: &[u8], call_query: &Query) -> Option<Declaration> {
    match node.kind() {
        "function_definition" | "class_definition" => {
            definition_declaration(node, node, Vec::new(), source, call_query)
        }
        "decorated_definition" => {
            let inner = node
                .child_by_field_name("definition")
                .or_else(|| find_inner_definition(node))?;
            let decorators = decorators_of(node, source);
            let mut declaration =
                definition_declaration(node, inner, decorators, source, call_query)?;
            declaration.declared_name = declared_name(node, source);
            Some(declaration)
        }
        "expression_statement" => {
            let statement = node.named_child(0)?;
            if !matches!(statement.kind(), "assignment" | "augmented_assignment") {
                return None;
            }
            let mut names = Vec::new();
            collect_assignment_names(statement, source, &mut names);
            if names.is_empty() {
                return None;
            }
            Some(Declaration {
                kind: DeclarationKind::Variable,
                names,
                start_line: start_line(node),
                end_line: end_line(node),
                decorators: Vec::new(),
                parameters: Vec::new(),
                bases: Vec::new(),
                call_targets: call_targets(node, source, call_query),
                methods: Vec::new(),
                declared_name: None,
            })
        }
        _ => None,
    }
}

/// `outer` carries the full span (decorators included), `inner` is the bare definition.
fn definition_declaration(
    outer: Node<'_>,
    inner: Node<'_>,
    decorators: Vec<String>,
    source: &[u8],
    call_query: &Query,
) -> Option<Declaration> {
    let name = named_child_text(inner, "name", source)?;
    let kind = match inner.kind() {
        "function_definition" => DeclarationKind::Function,
        "class_definition" => DeclarationKind::Class,
        _ => return None,
    };

    let targets = merge_targets(&decorators, call_targets(outer, source, call_query));

    let (parameters, bases, methods) = match kind {
        DeclarationKind::Function => (parameter_names(inner, source), Vec::new(), Vec::new()),
        _ => (
            Vec::new(),
            base_names(inner, source),
            class_methods(inner, source, call_query),
        ),
    };

    Some(Declaration {
        kind,
        names: vec![name],
        start_line: start_line(outer),
        end_line: end_line(outer),
        decorators,
        parameters,
        bases,
        call_targets: targets,
        methods,
        declared_name: None,
    })
}

/// Decorators first, then the body's call targets, without repeats.
fn merge_targets(decorators: &[String], calls: Vec<String>) -> Vec<String> {
    let mut targets = decorators.to_vec();
    for target in calls {
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

fn class_methods(class_node: Node<'_>, source: &[u8], call_query: &Query) -> Vec<ClassMethod> {
    let Some(body) = class_node.child_by_field_name("body") else {
        return Vec::new();
    };

    let mut cursor = body.walk();
    body.named_children(&mut cursor)
        .filter_map(|child| {
            let (function, decorators) = match child.kind() {
                "function_definition" => (child, Vec::new()),
                "decorated_definition" => {
                    let inner = child
                        .child_by_field_name("definition")
                        .or_else(|| find_inner_definition(child))?;
                    (inner, decorators_of(child, source))
                }
                _ => return None,
            };
            if function.kind() != "function_definition" {
                return None;
            }
            let calls = call_targets(child, source, call_query);
            Some(ClassMethod {
                name: named_child_text(function, "name", source)?,
                line: start_line(child),
                end_line: end_line(child),
                call_targets: merge_targets(&decorators, calls),
                declared_name: (child.kind() == "decorated_definition")
                    .then(|| declared_name(child, source))
                    .flatten(),
                decorators,
                parameters: parameter_names(function, source),
            })
        })
        .collect()
}

fn decorators_of(decorated: Node<'_>, source: &[u8]) -> Vec<String> {
    let mut cursor = decorated.walk();
    decorated
        .named_children(&mut cursor)
        .filter(|child| child.kind() == "decorator")
        .map(|decorator| decorator_name(&node_text(decorator, source)))
        .filter(|name| !name.is_empty())
        .collect()
}

fn declared_name(decorated: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = decorated.walk();
    let decorators = decorated
        .named_children(&mut cursor)
        .filter(|child| child.kind() == "decorator")
        .collect::<Vec<_>>();

    decorators.into_iter().find_map(|decorator| {
        let call = decorator.named_child(0).filter(|node| node.kind() == "call")?;
        let arguments = call.child_by_field_name("arguments")?;
        let mut inner = arguments.walk();
        let keywords = arguments
            .named_children(&mut inner)
            .filter(|argument| argument.kind() == "keyword_argument")
            .collect::<Vec<_>>();
        keywords.into_iter().find_map(|keyword| {
            if named_child_text(keyword, "name", source).as_deref() != Some("name") {
                return None;
            }
            let value = keyword
                .child_by_field_name("value")
                .filter(|value| value.kind() == "string")?;
            let text = node_text(value, source);
            let unquoted = text.trim_matches(|c| c == '"' || c == '\'');
            (!unquoted.is_empty()).then(|| unquoted.to_owned())
        })
    })
}

fn parameter_names(function: Node<'_>, source: &[u8]) -> Vec<String> {
    let Some(parameters) = function.child_by_field_name("parameters") else {
        return Vec::new();
    };

    let mut cursor = parameters.walk();
    parameters
        .named_children(&mut cursor)
        .filter_map(|parameter| match parameter.kind() {
            "identifier" => Some(node_text(parameter, source)),
            "default_parameter" | "typed_default_parameter" => {
                named_child_text(parameter, "name", source)
            }
            "typed_parameter" => {
                let mut inner = parameter.walk();
                parameter
                    .named_children(&mut inner)
                    .find(|child| child.kind() == "identifier")
                    .map(|child| node_text(child, source))
            }
            _ => None,
        })
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .collect()
}

fn base_names(class_node: Node<'_>, source: &[u8]) -> Vec<String> {
    let Some(superclasses) = class_node.child_by_field_name("superclasses") else {
        return Vec::new();
    };

    let mut cursor = superclasses.walk();
    superclasses
        .named_children(&mut cursor)
        .filter(|child| matches!(child.kind(), "identifier" | "attribute"))
        .filter_map(|child| dotted_name(child, source))
        .collect()
}

fn collect_assignment_names(node: Node<'_>, source: &[u8], names: &mut Vec<String>) {
    if let Some(left) = node.child_by_field_name("left") {
        collect_target_names(left, source, names);
    }
    // `a = b = 1` nests the second assignment on the right-hand side.
    if let Some(right) = node.child_by_field_name("right")
        && right.kind() == "assignment"
    {
        collect_assignment_names(right, source, names);
    }
}

fn collect_target_names(node: Node<'_>, source: &[u8], names: &mut Vec<String>) {
    match node.kind() {
        "identifier" => {
            let name = node_text(node, source);
            if !names.contains(&name) {
                names.push(name);
            }
        }
        "pattern_list" | "tuple_pattern" | "list_pattern" | "parenthesized_expression"
        | "list_splat_pattern" | "expression_list" | "tuple" | "list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_target_names(child, source, names);
            }
        }
        _ => {}
    }
}

fn call_targets(node: Node<'_>, source: &[u8], call_query: &Query) -> Vec<String> {
    let mut cursor = QueryCursor::new();
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    let mut query_matches = cursor.matches(call_query, node, source);
    while let Some(matched) = {
        query_matches.advance();
        query_matches.get()
    } {
        for capture in matched.captures {
            if let Some(target) = dotted_name(capture.node, source)
                && seen.insert(target.clone())
            {
                targets.push(target);
            }
        }
    }

    targets
}

/// `a`, `a.b`, `a.b.c` for identifier/attribute chains; `None` when any link is
/// something else (a call, a subscript, a literal).
fn dotted_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source)),
        "attribute" => {
            let object = node.child_by_field_name("object")?;
            let attribute = node.child_by_field_name("attribute")?;
            let head = dotted_name(object, source)?;
            Some(format!("{head}.{}", node_text(attribute, source)))
        }
        _ => None,
    }
}

pub(crate) fn import_statements(root: Node<'_>, source: &[u8]) -> Vec<ImportStatement> {
    let mut imports = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_statement" => imports.extend(plain_imports(node, source)),
            "import_from_statement" => imports.extend(from_import(node, source)),
            _ => {
                let mut cursor = node.walk();
                let mut children = node.named_children(&mut cursor).collect::<Vec<_>>();
                children.reverse();
                stack.extend(children);
            }
        }
    }

    imports
}

fn plain_imports(node: Node<'_>, source: &[u8]) -> Vec<ImportStatement> {
    let optional = inside_try(node);
    let line = start_line(node);

    let mut cursor = node.walk();
    node.children_by_field_name("name", &mut cursor)
        .filter_map(|name| {
            let (module, alias) = match name.kind() {
                "dotted_name" => (node_text(name, source), None),
                "aliased_import" => (
                    named_child_text(name, "name", source)?,
                    named_child_text(name, "alias", source),
                ),
                _ => return None,
            };
            Some(ImportStatement {
                style: ImportStyle::Plain,
                line,
                module: Some(module),
                level: 0,
                members: Vec::new(),
                wildcard: false,
                alias,
                optional,
            })
        })
        .collect()
}

fn from_import(node: Node<'_>, source: &[u8]) -> Option<ImportStatement> {
    let module_node = node.child_by_field_name("module_name")?;
    let (module, level) = match module_node.kind() {
        "relative_import" => {
            let mut cursor = module_node.walk();
            let mut level = 0;
            let mut module = None;
            for child in module_node.named_children(&mut cursor) {
                match child.kind() {
                    "import_prefix" => {
                        level = node_text(child, source)
                            .chars()
                            .filter(|ch| *ch == '.')
                            .count();
                    }
                    "dotted_name" => module = Some(node_text(child, source)),
                    _ => {}
                }
            }
            (module, level)
        }
        _ => (Some(node_text(module_node, source)), 0),
    };

    let mut cursor = node.walk();
    let members = node
        .children_by_field_name("name", &mut cursor)
        .filter_map(|name| match name.kind() {
            "dotted_name" => Some(ImportedName {
                name: node_text(name, source),
                alias: None,
            }),
            "aliased_import" => Some(ImportedName {
                name: named_child_text(name, "name", source)?,
                alias: named_child_text(name, "alias", source),
            }),
            _ => None,
        })
        .collect::<Vec<_>>();

    let mut cursor = node.walk();
    let wildcard = node
        .named_children(&mut cursor)
        .any(|child| child.kind() == "wildcard_import");

    Some(ImportStatement {
        style: ImportStyle::From,
        line: start_line(node),
        module,
        level,
        members,
        wildcard,
        alias: None,
        optional: inside_try(node),
    })
}

fn inside_try(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "try_statement" => return true,
            "function_definition" | "class_definition" | "module" => return false,
            _ => current = parent.parent(),
        }
    }
    false
}

fn find_inner_definition(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .find(|child| child.kind() == "function_definition" || child.kind() == "class_definition")
}

fn start_line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

fn end_line(node: Node<'_>) -> usize {
    let end = node.end_position();
    if end.column == 0 && end.row > node.start_position().row {
        end.row
    } else {
        end.row + 1
    }
}

fn named_child_text(node: Node<'_>, field_name: &str, source: &[u8]) -> Option<String> {
    let child = node.child_by_field_name(field_name)?;
    let text = node_text(child, source);
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn node_text(node: Node<'_>, source: &[u8]) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    if start >= end || end > source.len() {
        return String::new();
    }
    String::from_utf8_lossy(&source[start..end]).into_owned()
}
