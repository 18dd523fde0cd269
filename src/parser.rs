//! Java source parsing using tree-sitter.
//!
//! Extracts the declaration-level shape of one compilation unit: package,
//! primary type, member signatures and nested type names. No type resolution
//! is attempted.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tree_sitter::{Node, Parser};

use crate::archive::AllowList;
use crate::error::{Error, Result};
use crate::model::MethodRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Record,
    Annotation,
}

impl TypeKind {
    fn from_node_kind(kind: &str) -> Option<Self> {
        match kind {
            "class_declaration" => Some(TypeKind::Class),
            "interface_declaration" => Some(TypeKind::Interface),
            "enum_declaration" => Some(TypeKind::Enum),
            "record_declaration" => Some(TypeKind::Record),
            "annotation_type_declaration" => Some(TypeKind::Annotation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Interface => "interface",
            TypeKind::Enum => "enum",
            TypeKind::Record => "record",
            TypeKind::Annotation => "annotation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassDeclaration {
    pub package: String,
    pub name: String,
    pub kind: TypeKind,
    pub declaration: String,
    pub methods: Vec<MethodRecord>,
    pub nested: Vec<String>,
    pub source_hash: String,
}

impl ClassDeclaration {
    pub fn qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }
}

/// Parses `source` into its primary type declaration.
///
/// Returns `Ok(None)` when the declared package falls outside `allow`.
pub fn parse_for(source: &str, allow: &AllowList) -> Result<Option<ClassDeclaration>> {
    let declaration = parse_class(source)?;
    if allow.matches_package(&declaration.package) {
        Ok(Some(declaration))
    } else {
        Ok(None)
    }
}

pub fn parse_class(source: &str) -> Result<ClassDeclaration> {
    if source.trim().is_empty() {
        return Err(Error::parse("<source>", "empty compilation unit"));
    }

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .map_err(|e| Error::parse("<source>", e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| Error::parse("<source>", "parser produced no tree"))?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(Error::parse("<source>", syntax_error_location(&root)));
    }
    let bytes = source.as_bytes();

    let mut package = String::new();
    let mut types = Vec::new();

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() == "package_declaration" {
            package = extract_package(&child, bytes);
        } else if TypeKind::from_node_kind(child.kind()).is_some() {
            types.push(child);
        }
    }

    let primary = types
        .iter()
        .find(|node| is_public(node, bytes))
        .or_else(|| types.first())
        .ok_or_else(|| Error::parse("<source>", "no type declaration"))?;
    let kind = TypeKind::from_node_kind(primary.kind())
        .ok_or_else(|| Error::parse("<source>", "no type declaration"))?;
    let name = primary
        .child_by_field_name("name")
        .map(|n| node_text(&n, bytes).to_string())
        .ok_or_else(|| Error::parse("<source>", "type declaration without a name"))?;

    let mut methods = Vec::new();
    let mut nested = Vec::new();
    extract_members(primary, bytes, &mut methods, &mut nested);

    Ok(ClassDeclaration {
        package,
        name,
        kind,
        declaration: extract_class_declaration(primary, bytes),
        methods,
        nested,
        source_hash: hash_content(source),
    })
}

/// `java.util.Map` -> `java.util`.
pub fn package_of(qualified_name: &str) -> &str {
    qualified_name
        .rsplit_once('.')
        .map(|(pkg, _)| pkg)
        .unwrap_or("")
}

/// `java.util.Map` -> `Map`.
pub fn simple_name_of(qualified_name: &str) -> &str {
    qualified_name
        .rsplit_once('.')
        .map(|(_, name)| name)
        .unwrap_or(qualified_name)
}

pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn syntax_error_location(root: &Node) -> String {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return format!("syntax error at line {}, column {}", pos.row + 1, pos.column + 1);
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    "syntax error".to_string()
}

fn extract_package(node: &Node, source: &[u8]) -> String {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "scoped_identifier" || child.kind() == "identifier" {
            return node_text(&child, source).to_string();
        }
    }
    String::new()
}

fn is_public(node: &Node, source: &[u8]) -> bool {
    let mut cursor = node.walk();
    let modifiers = node
        .children(&mut cursor)
        .find(|child| child.kind() == "modifiers");
    modifiers.is_some_and(|m| {
        node_text(&m, source)
            .split_whitespace()
            .any(|token| token == "public")
    })
}

fn extract_class_declaration(node: &Node, source: &[u8]) -> String {
    let mut result = String::new();

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "class_body" | "interface_body" | "enum_body" | "annotation_type_body" => break,
            _ => {
                let text = normalize_whitespace(node_text(&child, source));
                if !result.is_empty() && !needs_no_leading_space(child.kind()) {
                    result.push(' ');
                }
                result.push_str(&text);
            }
        }
    }

    result.trim().to_string()
}

fn extract_members(
    node: &Node,
    source: &[u8],
    methods: &mut Vec<MethodRecord>,
    nested: &mut Vec<String>,
) {
    let Some(body) = find_body(node) else {
        return;
    };

    let mut cursor = body.walk();
    for child in body.children(&mut cursor) {
        match child.kind() {
            "method_declaration" | "constructor_declaration" | "compact_constructor_declaration" => {
                if let Some(method) = extract_method(&child, source) {
                    methods.push(method);
                }
            }
            "annotation_type_element_declaration" => {
                if let Some(method) = extract_annotation_element(&child, source) {
                    methods.push(method);
                }
            }
            "enum_body_declarations" => {
                let mut inner_cursor = child.walk();
                for inner in child.children(&mut inner_cursor) {
                    match inner.kind() {
                        "method_declaration" | "constructor_declaration" => {
                            if let Some(method) = extract_method(&inner, source) {
                                methods.push(method);
                            }
                        }
                        kind if TypeKind::from_node_kind(kind).is_some() => {
                            push_nested(&inner, source, nested);
                        }
                        _ => {}
                    }
                }
            }
            kind if TypeKind::from_node_kind(kind).is_some() => {
                push_nested(&child, source, nested);
            }
            _ => {}
        }
    }
}

fn push_nested(node: &Node, source: &[u8], nested: &mut Vec<String>) {
    if let Some(name) = node.child_by_field_name("name") {
        nested.push(node_text(&name, source).to_string());
    }
}

fn find_body<'a>(node: &Node<'a>) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "class_body" | "interface_body" | "enum_body" | "annotation_type_body" => {
                return Some(child);
            }
            _ => {}
        }
    }
    None
}

fn extract_method(node: &Node, source: &[u8]) -> Option<MethodRecord> {
    let name = node_text(&node.child_by_field_name("name")?, source).to_string();
    let constructor = node.kind() != "method_declaration";
    let return_type = node
        .child_by_field_name("type")
        .map(|t| normalize_whitespace(node_text(&t, source)));
    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| extract_parameter_types(&p, source))
        .unwrap_or_default();

    let mut signature = String::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "block" | "constructor_body" => break,
            ";" => continue,
            _ => {
                let text = normalize_whitespace(node_text(&child, source));
                if !signature.is_empty() && !needs_no_leading_space(child.kind()) {
                    signature.push(' ');
                }
                signature.push_str(&text);
            }
        }
    }

    Some(MethodRecord {
        name,
        signature: signature.trim().to_string(),
        parameters,
        return_type,
        constructor,
    })
}

fn extract_annotation_element(node: &Node, source: &[u8]) -> Option<MethodRecord> {
    let name = node_text(&node.child_by_field_name("name")?, source).to_string();
    let return_type = node
        .child_by_field_name("type")
        .map(|t| normalize_whitespace(node_text(&t, source)));
    let signature = normalize_whitespace(node_text(node, source))
        .trim_end_matches(';')
        .to_string();
    Some(MethodRecord {
        name,
        signature,
        parameters: Vec::new(),
        return_type,
        constructor: false,
    })
}

fn extract_parameter_types(node: &Node, source: &[u8]) -> Vec<String> {
    let mut types = Vec::new();
    let mut cursor = node.walk();
    for param in node.named_children(&mut cursor) {
        match param.kind() {
            "formal_parameter" => {
                if let Some(ty) = param.child_by_field_name("type") {
                    let mut text = normalize_whitespace(node_text(&ty, source));
                    if let Some(dims) = param.child_by_field_name("dimensions") {
                        text.push_str(&normalize_whitespace(node_text(&dims, source)));
                    }
                    types.push(text);
                }
            }
            "spread_parameter" => {
                let mut inner = param.walk();
                let ty = param
                    .named_children(&mut inner)
                    .find(|c| c.kind() != "modifiers" && c.kind() != "variable_declarator");
                if let Some(ty) = ty {
                    types.push(format!("{}...", normalize_whitespace(node_text(&ty, source))));
                }
            }
            _ => {}
        }
    }
    types
}

fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn needs_no_leading_space(kind: &str) -> bool {
    matches!(
        kind,
        "type_parameters" | "formal_parameters" | "type_arguments"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_class() {
        let source = r#"
package org.example;

import java.util.List;

public class Foo extends Bar implements Baz {
    private String name;

    public Foo(String name) {
        this.name = name;
    }

    public String getName() {
        return name;
    }

    public void setNames(List<String> names, int... counts) {
    }
}
"#;
        let result = parse_class(source).unwrap();
        assert_eq!(result.package, "org.example");
        assert_eq!(result.name, "Foo");
        assert_eq!(result.kind, TypeKind::Class);
        assert_eq!(result.qualified_name(), "org.example.Foo");
        assert!(
            result
                .declaration
                .contains("public class Foo extends Bar implements Baz")
        );
        assert_eq!(result.methods.len(), 3);

        let ctor = &result.methods[0];
        assert!(ctor.constructor);
        assert_eq!(ctor.parameters, vec!["String"]);
        assert!(ctor.signature.contains("public Foo(String name)"));

        let getter = &result.methods[1];
        assert_eq!(getter.name, "getName");
        assert_eq!(getter.return_type.as_deref(), Some("String"));
        assert!(getter.parameters.is_empty());

        let setter = &result.methods[2];
        assert_eq!(setter.parameters, vec!["List<String>", "int..."]);
    }

    #[test]
    fn parse_interface_methods() {
        let source = r#"
package org.example;

public interface Service<T> {
    T find(String id);
    void save(T entity);
}
"#;
        let result = parse_class(source).unwrap();
        assert_eq!(result.kind, TypeKind::Interface);
        assert!(result.declaration.contains("public interface Service<T>"));
        let names: Vec<_> = result.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["find", "save"]);
    }

    #[test]
    fn parse_enum_and_nested_types() {
        let source = r#"
package org.example;

public enum Color {
    RED, GREEN;

    public int value() { return 0; }

    static class Helper {}
}
"#;
        let result = parse_class(source).unwrap();
        assert_eq!(result.kind, TypeKind::Enum);
        assert_eq!(result.methods.len(), 1);
        assert_eq!(result.nested, vec!["Helper"]);
    }

    #[test]
    fn parse_annotation_elements() {
        let source = r#"
package org.example;

public @interface Component {
    String value() default "";
}
"#;
        let result = parse_class(source).unwrap();
        assert_eq!(result.kind, TypeKind::Annotation);
        assert_eq!(result.methods[0].name, "value");
    }

    #[test]
    fn public_type_wins_over_earlier_package_private_type() {
        let source = r#"
package org.example;

class Helper {}

public class Main {
    public static void main(String[] args) {}
}
"#;
        let result = parse_class(source).unwrap();
        assert_eq!(result.name, "Main");
        assert_eq!(result.methods[0].parameters, vec!["String[]"]);
    }

    #[test]
    fn malformed_source_is_a_parse_error() {
        let err = parse_class("package a.b;\npublic class Broken { void x( { }\n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(matches!(parse_class("   "), Err(Error::Parse { .. })));
        assert!(matches!(
            parse_class("package only.a.pkg;\n"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn parse_for_applies_package_allow_list() {
        let allow = AllowList::new(["java"]);
        let inside = "package java.lang;\npublic final class Integer {}\n";
        let outside = "package sun.misc;\npublic final class Unsafe {}\n";
        assert!(parse_for(inside, &allow).unwrap().is_some());
        assert!(parse_for(outside, &allow).unwrap().is_none());
    }

    #[test]
    fn qualified_name_helpers() {
        assert_eq!(package_of("java.util.Map"), "java.util");
        assert_eq!(simple_name_of("java.util.Map"), "Map");
        assert_eq!(package_of("Default"), "");
        assert_eq!(simple_name_of("Default"), "Default");
    }
}
