//! Dependency parser for the home language (Go) using a full grammar.
//!
//! For each file, produces graph nodes for every top-level declaration
//! and method, plus call / import / embed / use edges. Call targets are
//! resolved as `Ident` → `package.Ident` and `pkg.Name` → `pkg.Name`
//! (chained selectors reduce to the last selector); targets need not
//! exist in the graph at insertion time.

use tree_sitter::{Node as TsNode, Parser};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Edge, EdgeKind, Node, SymbolKind};

/// Parse result for one file.
#[derive(Debug, Default)]
pub struct FileDag {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub package: String,
    pub imports: Vec<String>,
}

/// True when a path should go through the DAG parser at all.
pub fn is_dag_source(rel_path: &str) -> bool {
    rel_path.ends_with(".go")
}

/// Go's predeclared type names, filtered out of `uses` edges.
fn is_builtin_type(name: &str) -> bool {
    matches!(
        name,
        "bool"
            | "string"
            | "int"
            | "int8"
            | "int16"
            | "int32"
            | "int64"
            | "uint"
            | "uint8"
            | "uint16"
            | "uint32"
            | "uint64"
            | "uintptr"
            | "byte"
            | "rune"
            | "float32"
            | "float64"
            | "complex64"
            | "complex128"
            | "error"
            | "any"
    )
}

/// Parse one Go file into nodes and edges.
///
/// A failed parse returns `Error::ParseError`; callers running batches
/// log and skip, per the indexing error policy.
pub fn parse_file(rel_path: &str, source: &str) -> Result<FileDag> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| Error::ParseError(format!("grammar: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| Error::ParseError(format!("unparsable source: {rel_path}")))?;

    let root = tree.root_node();
    let bytes = source.as_bytes();

    let mut dag = FileDag::default();
    dag.package = find_package(&root, bytes).unwrap_or_else(|| "main".to_string());

    let file_stem = rel_path
        .rsplit('/')
        .next()
        .and_then(|b| b.rsplit_once('.').map(|(s, _)| s.to_string()))
        .unwrap_or_else(|| rel_path.to_string());
    let file_node_id = format!("{}.{file_stem}", dag.package);

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "import_declaration" => collect_imports(&child, bytes, &mut dag, &file_node_id, rel_path),
            "function_declaration" => collect_function(&child, bytes, &mut dag, rel_path),
            "method_declaration" => collect_method(&child, bytes, &mut dag, rel_path),
            "type_declaration" => collect_types(&child, bytes, &mut dag, rel_path),
            "const_declaration" => collect_values(&child, bytes, &mut dag, rel_path, SymbolKind::Const),
            "var_declaration" => collect_values(&child, bytes, &mut dag, rel_path, SymbolKind::Var),
            _ => {}
        }
    }

    debug!(
        file = rel_path,
        nodes = dag.nodes.len(),
        edges = dag.edges.len(),
        package = dag.package.as_str(),
        "parsed dag file"
    );

    Ok(dag)
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

fn find_package(root: &TsNode, source: &[u8]) -> Option<String> {
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() == "package_clause" {
            let mut inner = child.walk();
            for c in child.children(&mut inner) {
                if c.kind() == "package_identifier" {
                    return c.utf8_text(source).ok().map(|s| s.to_string());
                }
            }
        }
    }
    None
}

fn node_text(node: &TsNode, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").to_string()
}

/// First line of a declaration, brace stripped, used as the display signature.
fn signature_of(node: &TsNode, source: &[u8]) -> String {
    let text = node_text(node, source);
    text.lines().next().unwrap_or("").trim_end_matches('{').trim().to_string()
}

/// Contiguous `//` comment block directly above a declaration.
fn doc_of(node: &TsNode, source: &[u8]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut prev = node.prev_sibling();
    let mut expected_row = node.start_position().row;

    while let Some(p) = prev {
        if p.kind() != "comment" || p.end_position().row + 1 != expected_row {
            break;
        }
        let text = node_text(&p, source);
        parts.push(
            text.trim_start_matches("//").trim_start_matches("/*").trim_end_matches("*/").trim().to_string(),
        );
        expected_row = p.start_position().row;
        prev = p.prev_sibling();
    }

    parts.reverse();
    parts.join("\n")
}

fn push_node(
    dag: &mut FileDag,
    id: String,
    name: String,
    kind: SymbolKind,
    rel_path: &str,
    decl: &TsNode,
    signature: String,
    doc: String,
) {
    dag.nodes.push(Node {
        id,
        name,
        kind,
        file_path: rel_path.to_string(),
        package: dag.package.clone(),
        start_line: decl.start_position().row + 1,
        end_line: decl.end_position().row + 1,
        signature,
        doc,
    });
}

fn collect_function(decl: &TsNode, source: &[u8], dag: &mut FileDag, rel_path: &str) {
    let name = match decl.child_by_field_name("name") {
        Some(n) => node_text(&n, source),
        None => return,
    };
    let id = format!("{}.{name}", dag.package);
    push_node(
        dag,
        id.clone(),
        name,
        SymbolKind::Function,
        rel_path,
        decl,
        signature_of(decl, source),
        doc_of(decl, source),
    );

    if let Some(body) = decl.child_by_field_name("body") {
        collect_call_edges(&body, source, dag, &id, rel_path);
    }
}

fn collect_method(decl: &TsNode, source: &[u8], dag: &mut FileDag, rel_path: &str) {
    let name = match decl.child_by_field_name("name") {
        Some(n) => node_text(&n, source),
        None => return,
    };
    let receiver = decl
        .child_by_field_name("receiver")
        .and_then(|r| receiver_type_name(&r, source))
        .unwrap_or_else(|| "_".to_string());

    let id = format!("{}.{receiver}.{name}", dag.package);
    push_node(
        dag,
        id.clone(),
        name,
        SymbolKind::Method,
        rel_path,
        decl,
        signature_of(decl, source),
        doc_of(decl, source),
    );

    if let Some(body) = decl.child_by_field_name("body") {
        collect_call_edges(&body, source, dag, &id, rel_path);
    }
}

/// Dig the named receiver type out of `(r *Recv)` / `(r Recv)` /
/// `(r *Recv[T])` parameter lists.
fn receiver_type_name(receiver: &TsNode, source: &[u8]) -> Option<String> {
    fn first_type_identifier(node: &TsNode, source: &[u8]) -> Option<String> {
        if node.kind() == "type_identifier" {
            return Some(node_text(node, source));
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if let Some(found) = first_type_identifier(&child, source) {
                return Some(found);
            }
        }
        None
    }
    first_type_identifier(receiver, source)
}

fn collect_types(decl: &TsNode, source: &[u8], dag: &mut FileDag, rel_path: &str) {
    let mut cursor = decl.walk();
    for spec in decl.children(&mut cursor) {
        if spec.kind() != "type_spec" && spec.kind() != "type_alias" {
            continue;
        }
        let name = match spec.child_by_field_name("name") {
            Some(n) => node_text(&n, source),
            None => continue,
        };
        let type_node = spec.child_by_field_name("type");
        let kind = match type_node.as_ref().map(|t| t.kind()) {
            Some("struct_type") => SymbolKind::Struct,
            Some("interface_type") => SymbolKind::Interface,
            _ => SymbolKind::Type,
        };

        // Doc comments sit on the enclosing type_declaration, not the
        // inner spec.
        let mut doc = doc_of(&spec, source);
        if doc.is_empty() {
            doc = doc_of(decl, source);
        }
        let id = format!("{}.{name}", dag.package);
        push_node(
            dag,
            id.clone(),
            name,
            kind,
            rel_path,
            &spec,
            format!("type {}", signature_of(&spec, source)),
            doc,
        );

        match kind {
            SymbolKind::Struct => {
                if let Some(t) = type_node {
                    collect_struct_field_edges(&t, source, dag, &id, rel_path);
                }
            }
            SymbolKind::Interface => {
                if let Some(t) = type_node {
                    collect_interface_embed_edges(&t, source, dag, &id, rel_path);
                }
            }
            _ => {}
        }
    }
}

fn collect_values(
    decl: &TsNode,
    source: &[u8],
    dag: &mut FileDag,
    rel_path: &str,
    kind: SymbolKind,
) {
    let mut cursor = decl.walk();
    for spec in decl.children(&mut cursor) {
        if spec.kind() != "const_spec" && spec.kind() != "var_spec" {
            continue;
        }
        let mut doc = doc_of(&spec, source);
        if doc.is_empty() {
            doc = doc_of(decl, source);
        }
        let keyword = if kind == SymbolKind::Const { "const" } else { "var" };
        let mut names = spec.walk();
        for name_node in spec.children_by_field_name("name", &mut names) {
            let name = node_text(&name_node, source);
            let id = format!("{}.{name}", dag.package);
            push_node(
                dag,
                id,
                name,
                kind,
                rel_path,
                &spec,
                format!("{keyword} {}", signature_of(&spec, source)),
                doc.clone(),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

fn collect_imports(
    decl: &TsNode,
    source: &[u8],
    dag: &mut FileDag,
    file_node_id: &str,
    rel_path: &str,
) {
    fn visit(node: &TsNode, source: &[u8], dag: &mut FileDag, file_node_id: &str, rel_path: &str) {
        if node.kind() == "import_spec" {
            if let Some(path_node) = node.child_by_field_name("path") {
                let path = node_text(&path_node, source).trim_matches('"').to_string();
                if !path.is_empty() {
                    dag.edges.push(Edge {
                        source: file_node_id.to_string(),
                        target: path.clone(),
                        kind: EdgeKind::Imports,
                        file_path: rel_path.to_string(),
                        line: node.start_position().row + 1,
                    });
                    dag.imports.push(path);
                }
            }
            return;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            visit(&child, source, dag, file_node_id, rel_path);
        }
    }
    visit(decl, source, dag, file_node_id, rel_path);
}

// ---------------------------------------------------------------------------
// Call edges
// ---------------------------------------------------------------------------

fn collect_call_edges(
    body: &TsNode,
    source: &[u8],
    dag: &mut FileDag,
    source_id: &str,
    rel_path: &str,
) {
    if body.kind() == "call_expression" {
        if let Some(func) = body.child_by_field_name("function") {
            if let Some(target) = call_target(&func, source, &dag.package) {
                dag.edges.push(Edge {
                    source: source_id.to_string(),
                    target,
                    kind: EdgeKind::Calls,
                    file_path: rel_path.to_string(),
                    line: body.start_position().row + 1,
                });
            }
        }
    }

    let mut cursor = body.walk();
    for child in body.children(&mut cursor) {
        collect_call_edges(&child, source, dag, source_id, rel_path);
    }
}

/// Resolve a call target id. Bare identifiers resolve into the current
/// package; selector chains reduce to `last_qualifier.Name`.
fn call_target(func: &TsNode, source: &[u8], package: &str) -> Option<String> {
    match func.kind() {
        "identifier" => {
            let name = node_text(func, source);
            if name.is_empty() {
                None
            } else {
                Some(format!("{package}.{name}"))
            }
        }
        "selector_expression" => {
            let field = func.child_by_field_name("field").map(|f| node_text(&f, source))?;
            let operand = func.child_by_field_name("operand")?;
            let qualifier = match operand.kind() {
                "identifier" | "package_identifier" => node_text(&operand, source),
                // Chained selectors: a.b.c() reduces to b.c
                "selector_expression" => {
                    operand.child_by_field_name("field").map(|f| node_text(&f, source))?
                }
                "call_expression" => return None,
                _ => return None,
            };
            if qualifier.is_empty() || field.is_empty() {
                None
            } else {
                Some(format!("{qualifier}.{field}"))
            }
        }
        // Parenthesized or generic instantiations: unwrap and retry.
        "parenthesized_expression" | "generic_function" => {
            let mut cursor = func.walk();
            for child in func.children(&mut cursor) {
                if let Some(t) = call_target(&child, source, package) {
                    return Some(t);
                }
            }
            None
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Struct / interface edges
// ---------------------------------------------------------------------------

/// Resolve the named type a field refers to, skipping builtins.
/// Unqualified names resolve into the current package.
fn type_target(type_node: &TsNode, source: &[u8], package: &str) -> Option<String> {
    match type_node.kind() {
        "type_identifier" => {
            let name = node_text(type_node, source);
            if name.is_empty() || is_builtin_type(&name) {
                None
            } else {
                Some(format!("{package}.{name}"))
            }
        }
        "qualified_type" => {
            let pkg = type_node.child_by_field_name("package").map(|p| node_text(&p, source))?;
            let name = type_node.child_by_field_name("name").map(|n| node_text(&n, source))?;
            Some(format!("{pkg}.{name}"))
        }
        "pointer_type" | "generic_type" => {
            let mut cursor = type_node.walk();
            for child in type_node.children(&mut cursor) {
                if let Some(t) = type_target(&child, source, package) {
                    return Some(t);
                }
            }
            None
        }
        "slice_type" | "array_type" => type_node
            .child_by_field_name("element")
            .and_then(|e| type_target(&e, source, package)),
        _ => None,
    }
}

/// Named fields produce `uses` edges; anonymous fields produce `embeds`.
fn collect_struct_field_edges(
    struct_type: &TsNode,
    source: &[u8],
    dag: &mut FileDag,
    owner_id: &str,
    rel_path: &str,
) {
    let body = match struct_type.child_by_field_name("body") {
        Some(b) => b,
        None => return,
    };
    let mut cursor = body.walk();
    for field in body.children(&mut cursor) {
        if field.kind() != "field_declaration" {
            continue;
        }
        let mut names = field.walk();
        let has_name = field.children_by_field_name("name", &mut names).next().is_some();
        let type_node = match field.child_by_field_name("type") {
            Some(t) => t,
            None => continue,
        };
        let target = match type_target(&type_node, source, &dag.package) {
            Some(t) => t,
            None => continue,
        };
        dag.edges.push(Edge {
            source: owner_id.to_string(),
            target,
            kind: if has_name { EdgeKind::Uses } else { EdgeKind::Embeds },
            file_path: rel_path.to_string(),
            line: field.start_position().row + 1,
        });
    }
}

/// Embedded interface members (`io.Reader` inside an interface body).
fn collect_interface_embed_edges(
    interface_type: &TsNode,
    source: &[u8],
    dag: &mut FileDag,
    owner_id: &str,
    rel_path: &str,
) {
    fn visit(node: &TsNode, source: &[u8], dag: &mut FileDag, owner_id: &str, rel_path: &str) {
        match node.kind() {
            // Method members declare the interface's own surface, not edges.
            "method_elem" | "method_spec" => {}
            "type_identifier" | "qualified_type" => {
                if let Some(target) = type_target(node, source, &dag.package) {
                    dag.edges.push(Edge {
                        source: owner_id.to_string(),
                        target,
                        kind: EdgeKind::Embeds,
                        file_path: rel_path.to_string(),
                        line: node.start_position().row + 1,
                    });
                }
            }
            _ => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    visit(&child, source, dag, owner_id, rel_path);
                }
            }
        }
    }
    visit(interface_type, source, dag, owner_id, rel_path);
}
