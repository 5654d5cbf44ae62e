//! Signature-only variants of declarations.
//!
//! A corralled declaration keeps its name, parameter and return types, thrown
//! types, field types and member signatures, but every method body becomes a
//! throw of the `Unresolved` stub exception carrying the snippet id. Field
//! initializers are dropped.

use crate::collab::{MemberShape, MethodShape, TypeShape, VarShape};
use crate::snippet::SnippetId;
use crate::wrap::{ENTRY_METHOD, Wrap, WrapBuilder};
use std::ops::Range;

/// Class thrown by corralled bodies. Executors report it as an unresolved reference.
pub const UNRESOLVED_CLASS: &str = "Unresolved";

pub fn stub_body(id: SnippetId) -> String {
    format!("{{ throw new {UNRESOLVED_CLASS}({id}); }}")
}

/// Signature text with whitespace normalized, used for change detection.
pub fn normalized_signature(source: &str, shape: &MethodShape) -> String {
    source
        .get(shape.signature.clone())
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn method_corral(id: SnippetId, source: &str, shape: &MethodShape) -> Wrap {
    Wrap::builder(source)
        .literal("public static ")
        .source(shape.signature.clone())
        .literal(" ")
        .literal(&stub_body(id))
        .build()
}

pub(crate) fn var_corral(id: SnippetId, source: &str, shape: &VarShape) -> Wrap {
    Wrap::builder(source)
        .literal("public static ")
        .source(shape.type_span.clone())
        .literal(" ")
        .source(shape.name_span.clone())
        .literal(";\n")
        .literal(&format!("public static Object {ENTRY_METHOD}() throws Throwable "))
        .literal(&stub_body(id))
        .build()
}

pub(crate) fn type_corral(id: SnippetId, source: &str, shape: &TypeShape, stripped: &[Range<usize>]) -> Wrap {
    let mut builder = Wrap::builder(source);
    builder
        .literal("public static ")
        .source_without(shape.span.start..shape.header.end, stripped);
    corral_members(&mut builder, id, &shape.members);
    builder.literal("\n").source(shape.close.clone()).build()
}

fn corral_members(builder: &mut WrapBuilder<'_>, id: SnippetId, members: &[MemberShape]) {
    for member in members {
        builder.literal("\n");
        match member {
            MemberShape::Method(method) => match &method.body {
                Some(_) => {
                    builder
                        .source(method.span.start..method.signature.end)
                        .literal(" ")
                        .literal(&stub_body(id));
                }
                None => {
                    builder.source(method.span.clone());
                }
            },
            MemberShape::Field(field) => {
                builder.source(field.span.start..field.name_span.end).literal(";");
            }
            MemberShape::Type(nested) => {
                builder.source(nested.span.start..nested.header.end);
                corral_members(builder, id, &nested.members);
                builder.literal("\n").source(nested.close.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::References;

    fn method(source: &str, name: &str) -> MethodShape {
        let signature_start = source.find("int").expect("return type");
        let body_start = source.find('{').expect("body");
        MethodShape {
            name: name.into(),
            modifiers: Vec::new(),
            span: 0..source.len(),
            signature: signature_start..source[..body_start].trim_end().len(),
            body: Some(body_start..source.len()),
            parameter_types: vec!["int".into()],
            erased_parameter_types: vec!["int".into()],
            return_type: "int".into(),
            references: References::default(),
        }
    }

    #[test]
    fn method_body_becomes_stub() {
        let source = "int f(int a) { return g(a); }";
        let corral = method_corral(SnippetId(4), source, &method(source, "f"));
        assert_eq!(corral.text(), "public static int f(int a) { throw new Unresolved(4); }");
        assert_eq!(normalized_signature(source, &method(source, "f")), "int f(int a)");
    }

    #[test]
    fn type_members_keep_signatures() {
        let source = "class X { int y = g(); int m(int a) { return h(); } }";
        let header_end = source.find('{').expect("header") + 1;
        let field_start = source.find("int y").expect("field");
        let method_start = source.find("int m").expect("method");
        let method_body = source[method_start..].find('{').expect("body") + method_start;
        let shape = TypeShape {
            name: "X".into(),
            modifiers: Vec::new(),
            span: 0..source.len(),
            header: 0..header_end,
            members: vec![
                MemberShape::Field(VarShape {
                    name: "y".into(),
                    modifiers: Vec::new(),
                    span: field_start..field_start + 14,
                    type_span: field_start..field_start + 3,
                    name_span: field_start + 4..field_start + 5,
                    type_name: "int".into(),
                    initializer: Some(field_start + 8..field_start + 11),
                    references: References::default(),
                }),
                MemberShape::Method(MethodShape {
                    name: "m".into(),
                    modifiers: Vec::new(),
                    span: method_start..source.len() - 2,
                    signature: method_start..method_body - 1,
                    body: Some(method_body..source.len() - 2),
                    parameter_types: vec!["int".into()],
                    erased_parameter_types: vec!["int".into()],
                    return_type: "int".into(),
                    references: References::default(),
                }),
            ],
            close: source.len() - 1..source.len(),
            references: References::default(),
        };
        let corral = type_corral(SnippetId(2), source, &shape, &[]);
        assert_eq!(
            corral.text(),
            "public static class X {\nint y;\nint m(int a) { throw new Unresolved(2); }\n}"
        );
    }
}
