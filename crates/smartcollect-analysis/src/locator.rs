use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use smartcollect_core::LineRange;
use smartcollect_parse::{Declaration, DeclarationKind, ParsedModule};

/// Names of the top-level declarations whose span intersects any of `ranges`.
///
/// A declaration spans from its first line up to the line before the next
/// top-level declaration, so trailing blank lines and comments belong to it.
/// The last declaration also absorbs ranges past the end of the file, as left
/// behind by deletions at the tail.
///
/// Methods of a changed class are reported as `Class.method`. A change above
/// the first method (decorators, bases, class attributes) reports every method.
pub fn changed_declarations(module: &ParsedModule, ranges: &[LineRange]) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();

    for (position, declaration) in module.declarations.iter().enumerate() {
        let span_end = module
            .declarations
            .get(position + 1)
            .map_or(usize::MAX, |next| next.start_line)
            .max(declaration.end_line + 1);
        let span = LineRange::new(declaration.start_line, span_end);

        if ranges.iter().any(|range| range.intersects(&span)) {
            changed.extend(declaration.names.iter().cloned());
            if declaration.kind == DeclarationKind::Class {
                changed.extend(changed_methods(declaration, span, ranges));
            }
        }
    }

    changed
}

fn changed_methods(class: &Declaration, span: LineRange, ranges: &[LineRange]) -> Vec<String> {
    let Some(first) = class.methods.first() else {
        return Vec::new();
    };
    let header = LineRange::new(span.start, first.line);
    let whole_class = ranges.iter().any(|range| range.intersects(&header));

    class
        .methods
        .iter()
        .enumerate()
        .filter(|(position, method)| {
            if whole_class {
                return true;
            }
            let end = class
                .methods
                .get(position + 1)
                .map_or(span.end, |next| next.line)
                .max(method.end_line + 1);
            let method_span = LineRange::new(method.line, end);
            ranges.iter().any(|range| range.intersects(&method_span))
        })
        .map(|(_, method)| format!("{}.{}", class.name(), method.name))
        .collect()
}

/// Per-file changed declaration names, computed once per file for the run.
#[derive(Debug, Default)]
pub struct ChangedMemberSet {
    by_file: HashMap<PathBuf, BTreeSet<String>>,
}

impl ChangedMemberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&BTreeSet<String>> {
        self.by_file.get(path)
    }

    pub fn record(
        &mut self,
        module: &ParsedModule,
        ranges: &[LineRange],
    ) -> &BTreeSet<String> {
        self.by_file
            .entry(module.path.clone())
            .or_insert_with(|| changed_declarations(module, ranges))
    }

    pub fn contains(&self, path: &Path, name: &str) -> bool {
        self.by_file
            .get(path)
            .is_some_and(|members| members.contains(name))
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.by_file.keys().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartcollect_parse::ModuleParser;

    fn parse(source: &str) -> ParsedModule {
        let mut parser = ModuleParser::new().expect("parser");
        parser
            .parse_source(Path::new("/project/module.py"), source)
            .expect("parse")
    }

    const SOURCE: &str = "\
import os

LIMIT = 3


def first():
    return LIMIT


def second():
    return first()

a, b = 1, 2
";

    #[test]
    fn ranges_map_to_enclosing_declarations() {
        let module = parse(SOURCE);

        let changed = changed_declarations(&module, &[LineRange::new(7, 8)]);
        assert_eq!(changed, BTreeSet::from(["first".to_owned()]));

        // Blank lines after a body still belong to that declaration.
        let changed = changed_declarations(&module, &[LineRange::new(9, 10)]);
        assert_eq!(changed, BTreeSet::from(["first".to_owned()]));
    }

    #[test]
    fn tuple_assignments_report_every_bound_name() {
        let module = parse(SOURCE);
        let changed = changed_declarations(&module, &[LineRange::new(13, 14)]);
        assert_eq!(changed, BTreeSet::from(["a".to_owned(), "b".to_owned()]));
    }

    #[test]
    fn empty_ranges_and_import_lines_change_nothing() {
        let module = parse(SOURCE);
        assert!(changed_declarations(&module, &[LineRange::new(7, 7)]).is_empty());
        assert!(changed_declarations(&module, &[LineRange::new(1, 2)]).is_empty());
    }

    #[test]
    fn ranges_past_the_end_belong_to_the_last_declaration() {
        let module = parse("def hello():\n    print('a')\n");
        assert_eq!(module.line_count, 2);

        let changed = changed_declarations(&module, &[LineRange::new(3, 4), LineRange::new(2, 4)]);
        assert_eq!(changed, BTreeSet::from(["hello".to_owned()]));

        let changed = changed_declarations(&module, &[LineRange::new(7, 9)]);
        assert_eq!(changed, BTreeSet::from(["hello".to_owned()]));
    }

    const CLASS_SOURCE: &str = "\
class TestLib:
    prefix = 'x'

    def test_a(self):
        return a()

    def test_b(self):
        return b()


def after():
    pass
";

    #[test]
    fn method_changes_are_reported_per_method() {
        let module = parse(CLASS_SOURCE);

        let changed = changed_declarations(&module, &[LineRange::new(5, 6)]);
        assert_eq!(
            changed,
            BTreeSet::from(["TestLib".to_owned(), "TestLib.test_a".to_owned()])
        );

        // Trailing blank lines of the last method stay with it.
        let changed = changed_declarations(&module, &[LineRange::new(9, 10)]);
        assert_eq!(
            changed,
            BTreeSet::from(["TestLib".to_owned(), "TestLib.test_b".to_owned()])
        );
    }

    #[test]
    fn class_level_changes_reach_every_method() {
        let module = parse(CLASS_SOURCE);
        let changed = changed_declarations(&module, &[LineRange::new(2, 3)]);
        assert_eq!(
            changed,
            BTreeSet::from([
                "TestLib".to_owned(),
                "TestLib.test_a".to_owned(),
                "TestLib.test_b".to_owned(),
            ])
        );
    }

    #[test]
    fn member_set_memoizes_per_file() {
        let module = parse(SOURCE);
        let mut members = ChangedMemberSet::new();

        members.record(&module, &[LineRange::new(11, 12)]);
        // A second call for the same file keeps the first answer.
        members.record(&module, &[LineRange::new(1, 100)]);

        assert!(members.contains(Path::new("/project/module.py"), "second"));
        assert!(!members.contains(Path::new("/project/module.py"), "first"));
        assert_eq!(members.files().count(), 1);
    }
}
