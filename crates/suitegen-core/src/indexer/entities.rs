//! Entity extraction from Python source with tree-sitter.
//!
//! Module-level functions and methods of module-level classes are
//! extracted, decorators included. Nested functions and nested classes are
//! not entities of their own.

use std::path::Path;

use rayon::prelude::*;
use tree_sitter::{Node, Parser};

use crate::errors::{SuitegenError, SuitegenResult};
use crate::indexer::modules::{discover_modules, FocalModule};
use crate::models::{Entity, EntityKind};

pub fn python_parser() -> SuitegenResult<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| SuitegenError::Config(format!("failed to load python grammar: {e}")))?;
    Ok(parser)
}

/// Names starting with `_` are private.
pub fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or_default()
}

fn name_of<'s>(node: Node<'_>, source: &'s str) -> Option<&'s str> {
    node.child_by_field_name("name").map(|n| node_text(n, source))
}

/// The definition a top-level or class-body statement introduces, paired
/// with the node whose span is the entity's source (decorators included).
fn unwrap_definition(node: Node<'_>) -> Option<(Node<'_>, Node<'_>)> {
    match node.kind() {
        "function_definition" | "class_definition" => Some((node, node)),
        "decorated_definition" => node.child_by_field_name("definition").map(|def| (def, node)),
        _ => None,
    }
}

fn entity(
    module: &str,
    name: &str,
    class_name: Option<&str>,
    span: Node<'_>,
    source: &str,
) -> Entity {
    Entity {
        module: module.to_string(),
        name: name.to_string(),
        class_name: class_name.map(str::to_string),
        kind: if class_name.is_some() {
            EntityKind::Method
        } else {
            EntityKind::Function
        },
        source: node_text(span, source).to_string(),
        start_line: span.start_position().row as u32 + 1,
        end_line: span.end_position().row as u32 + 1,
    }
}

fn extract_methods(
    class: Node<'_>,
    class_name: &str,
    module: &str,
    source: &str,
    skip_private: bool,
    out: &mut Vec<Entity>,
) {
    let Some(body) = class.child_by_field_name("body") else {
        return;
    };
    let mut cursor = body.walk();
    for stmt in body.named_children(&mut cursor) {
        let Some((def, span)) = unwrap_definition(stmt) else {
            continue;
        };
        if def.kind() != "function_definition" {
            continue;
        }
        let Some(name) = name_of(def, source) else {
            continue;
        };
        if skip_private && is_private(name) {
            continue;
        }
        out.push(entity(module, name, Some(class_name), span, source));
    }
}

/// Extract entities from already-parsed source, in document order.
pub fn extract_with_parser(
    parser: &mut Parser,
    source: &str,
    module: &str,
    skip_private: bool,
) -> SuitegenResult<Vec<Entity>> {
    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| SuitegenError::Validation(format!("failed to parse module {module}")))?;
    let root = tree.root_node();
    let mut out = Vec::new();
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        let Some((def, span)) = unwrap_definition(stmt) else {
            continue;
        };
        let Some(name) = name_of(def, source) else {
            continue;
        };
        if skip_private && is_private(name) {
            continue;
        }
        match def.kind() {
            "function_definition" => out.push(entity(module, name, None, span, source)),
            "class_definition" => extract_methods(def, name, module, source, skip_private, &mut out),
            _ => {}
        }
    }
    Ok(out)
}

pub fn extract_entities(source: &str, module: &str, skip_private: bool) -> SuitegenResult<Vec<Entity>> {
    let mut parser = python_parser()?;
    extract_with_parser(&mut parser, source, module, skip_private)
}

pub fn extract_module(
    parser: &mut Parser,
    focal: &FocalModule,
    skip_private: bool,
) -> SuitegenResult<Vec<Entity>> {
    let source = std::fs::read_to_string(&focal.path)?;
    extract_with_parser(parser, &source, &focal.module, skip_private)
}

/// Discover and extract every entity of the project at `root`. Modules are
/// parsed in parallel; the result is ordered by module path, then by
/// position in the file.
pub fn index_project(root: &Path, skip_private: bool) -> SuitegenResult<Vec<Entity>> {
    let modules = discover_modules(root)?;
    let per_module: Vec<SuitegenResult<Vec<Entity>>> = modules
        .par_iter()
        .map_init(python_parser, |parser, focal| match parser {
            Ok(parser) => extract_module(parser, focal, skip_private),
            Err(e) => Err(SuitegenError::Config(e.to_string())),
        })
        .collect();
    let mut entities = Vec::new();
    for result in per_module {
        entities.extend(result?);
    }
    Ok(entities)
}
