//! Local syntax oracle backed by tree-sitter-python.

use tree_sitter::{Node, Parser};

use crate::check::{Checker, CheckerKind};
use crate::errors::{SuitegenError, SuitegenResult};
use crate::models::{Diagnostic, Position};

pub const SYNTAX_ERROR: &str = "SyntaxError";

const SNIPPET_LIMIT: usize = 40;

pub struct SyntacticChecker {
    parser: Parser,
}

impl SyntacticChecker {
    pub fn new() -> SuitegenResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| SuitegenError::Config(format!("failed to load python grammar: {e}")))?;
        Ok(Self { parser })
    }
}

/// Pre-order search for the first ERROR or MISSING node. Subtrees without
/// errors are skipped.
fn first_error_node(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error_node)
}

fn describe(node: Node<'_>, source: &str) -> String {
    if node.is_missing() {
        return format!("expected `{}`", node.kind());
    }
    let text = source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or_default()
        .lines()
        .next()
        .unwrap_or_default()
        .trim();
    if text.is_empty() {
        "invalid syntax".to_string()
    } else {
        let snippet: String = text.chars().take(SNIPPET_LIMIT).collect();
        format!("invalid syntax near `{snippet}`")
    }
}

impl Checker for SyntacticChecker {
    fn kind(&self) -> CheckerKind {
        CheckerKind::Syntax
    }

    fn check(&mut self, artifact: &str) -> SuitegenResult<Option<Diagnostic>> {
        let tree = self
            .parser
            .parse(artifact.as_bytes(), None)
            .ok_or_else(|| SuitegenError::Validation("python parser produced no tree".into()))?;
        let Some(node) = first_error_node(tree.root_node()) else {
            return Ok(None);
        };
        let point = node.start_position();
        let position = Position {
            line: point.row as u32 + 1,
            column: point.column as u32 + 1,
        };
        Ok(Some(
            Diagnostic::new(SYNTAX_ERROR, describe(node, artifact)).at(position),
        ))
    }

    fn clear_resources(&mut self) -> SuitegenResult<()> {
        self.parser.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_module_has_no_diagnostic() {
        let mut checker = SyntacticChecker::new().unwrap();
        let code = "import pytest\n\n\ndef test_foo():\n    assert foo(1) == 2\n";
        assert_eq!(checker.check(code).unwrap(), None);
    }

    #[test]
    fn test_broken_signature_is_reported() {
        let mut checker = SyntacticChecker::new().unwrap();
        let diagnostic = checker
            .check("def test_foo(:\n    assert True\n")
            .unwrap()
            .unwrap();
        assert_eq!(diagnostic.name, SYNTAX_ERROR);
        assert_eq!(diagnostic.position.unwrap().line, 1);
        assert!(!diagnostic.message.is_empty());
    }

    #[test]
    fn test_reports_first_error_in_document_order() {
        let mut checker = SyntacticChecker::new().unwrap();
        let code = "x = 1\n\ndef ok():\n    return x\n\ndef bad(:\n    pass\n\ndef worse(((:\n";
        let diagnostic = checker.check(code).unwrap().unwrap();
        assert_eq!(diagnostic.position.unwrap().line, 6);
    }

    #[test]
    fn test_checker_is_reusable_after_clear() {
        let mut checker = SyntacticChecker::new().unwrap();
        assert!(checker.check("def (").unwrap().is_some());
        checker.clear_resources().unwrap();
        assert!(checker.check("pass\n").unwrap().is_none());
        assert_eq!(checker.kind(), CheckerKind::Syntax);
    }
}
