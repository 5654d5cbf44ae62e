//! Classification of parsed fragments and their wrapped, compilable forms.
//!
//! A [`Wrap`] is generated text interleaving literal scaffolding with slices
//! of the snippet source. It keeps a sorted list of [`Segment`]s so positions
//! reported against the wrapped text can be mapped back to the snippet.

use crate::collab::{ExpressionForm, Fragment, MethodShape, Modifier, TypeShape, VarShape};
use crate::config::EngineConfig;
use crate::corral;
use crate::diag::Diag;
use crate::snippet::{KeyIdentity, KindData, References, SnippetId, SubKind};
use smallvec::SmallVec;
use std::ops::Range;

/// Name of the synthetic entry method of executable wrappers.
pub const ENTRY_METHOD: &str = "do_it$";

const ENTRY_HEADER: &str = "public static Object do_it$() throws Throwable {\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    wrapped: usize,
    source: usize,
    len: usize,
}

impl Segment {
    fn wrapped_end(&self) -> usize {
        self.wrapped + self.len
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wrap {
    text: String,
    segments: SmallVec<[Segment; 4]>,
}

impl Wrap {
    pub fn builder(source: &str) -> WrapBuilder<'_> {
        WrapBuilder {
            source,
            text: String::new(),
            segments: SmallVec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Maps one wrapped offset to the snippet source, if it lies in a source segment.
    pub fn source_position(&self, wrapped: usize) -> Option<usize> {
        self.segments
            .iter()
            .find(|segment| segment.wrapped <= wrapped && wrapped < segment.wrapped_end())
            .map(|segment| segment.source + (wrapped - segment.wrapped))
    }

    /// Maps a wrapped span to snippet coordinates. Spans lying entirely in
    /// scaffolding collapse to the start of the snippet's first segment.
    pub fn translate_span(&self, span: Range<usize>) -> Range<usize> {
        let fallback = self.segments.first().map_or(0, |segment| segment.source);
        if span.start >= span.end {
            // Point spans, typically "unexpected end of input".
            let point = self
                .segments
                .iter()
                .find(|segment| segment.wrapped <= span.start && span.start <= segment.wrapped_end())
                .map(|segment| segment.source + (span.start - segment.wrapped));
            let point = point.unwrap_or(fallback);
            return point..point;
        }
        let mut overlapping = self
            .segments
            .iter()
            .filter(|segment| segment.wrapped < span.end && span.start < segment.wrapped_end());
        let Some(first) = overlapping.next() else {
            return fallback..fallback;
        };
        let last = overlapping.last().unwrap_or(first);
        let start = first.source + (span.start.max(first.wrapped) - first.wrapped);
        let end = last.source + (span.end.min(last.wrapped_end()) - last.wrapped);
        start..end.max(start)
    }

    /// The wrapped range holding a source range, used to point the front end
    /// at an expression inside a wrapped unit.
    pub fn wrapped_range(&self, source: Range<usize>) -> Option<Range<usize>> {
        let segment = self
            .segments
            .iter()
            .find(|segment| segment.source <= source.start && source.end <= segment.source + segment.len)?;
        let start = segment.wrapped + (source.start - segment.source);
        Some(start..start + source.len())
    }
}

pub struct WrapBuilder<'a> {
    source: &'a str,
    text: String,
    segments: SmallVec<[Segment; 4]>,
}

impl WrapBuilder<'_> {
    pub fn literal(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    pub fn source(&mut self, range: Range<usize>) -> &mut Self {
        let Some(slice) = self.source.get(range.clone()) else {
            return self;
        };
        if !slice.is_empty() {
            self.segments.push(Segment {
                wrapped: self.text.len(),
                source: range.start,
                len: slice.len(),
            });
            self.text.push_str(slice);
        }
        self
    }

    /// Source slice with some sub-ranges (stripped modifiers) left out.
    pub fn source_without(&mut self, range: Range<usize>, skipped: &[Range<usize>]) -> &mut Self {
        let mut skipped: Vec<&Range<usize>> = skipped
            .iter()
            .filter(|skip| range.start <= skip.start && skip.end <= range.end)
            .collect();
        skipped.sort_by_key(|skip| skip.start);
        let mut cursor = range.start;
        for skip in skipped {
            if skip.start > cursor {
                self.source(cursor..skip.start);
            }
            cursor = cursor.max(skip.end);
        }
        self.source(cursor..range.end)
    }

    pub fn embed(&mut self, wrap: &Wrap) -> &mut Self {
        let offset = self.text.len();
        self.segments.extend(wrap.segments.iter().map(|segment| Segment {
            wrapped: segment.wrapped + offset,
            ..*segment
        }));
        self.text.push_str(&wrap.text);
        self
    }

    pub fn build(&mut self) -> Wrap {
        Wrap {
            text: std::mem::take(&mut self.text),
            segments: std::mem::take(&mut self.segments),
        }
    }
}

/// Where a snippet's guts go inside its wrapper compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Header,
    Body,
}

impl Placement {
    pub fn of(data: &KindData) -> Self {
        match data {
            KindData::Import { .. } => Self::Header,
            _ => Self::Body,
        }
    }
}

/// A complete compilation unit: package, generated imports and the wrapper class.
#[derive(Debug, Clone)]
pub struct OuterWrap {
    pub class_name: String,
    pub full_name: String,
    pub wrap: Wrap,
}

impl OuterWrap {
    pub fn new(config: &EngineConfig, class_name: String, imports: &[String], guts: &Wrap, placement: Placement) -> Self {
        let mut builder = Wrap::builder("");
        builder.literal(&format!("package {};\n", config.package));
        for import in imports {
            builder.literal(import).literal("\n");
        }
        if placement == Placement::Header {
            builder.embed(guts).literal("\n");
        }
        builder.literal(&format!("class {class_name} {{\n"));
        if placement == Placement::Body {
            builder.embed(guts).literal("\n");
        }
        builder.literal("}\n");
        Self {
            full_name: format!("{}.{class_name}", config.package),
            class_name,
            wrap: builder.build(),
        }
    }
}

/// Result of classifying one parsed fragment.
#[derive(Debug)]
pub(crate) struct Classified {
    pub sub_kind: SubKind,
    pub data: KindData,
    pub identity: KeyIdentity,
    pub guts: Wrap,
    pub corral: Option<Wrap>,
    pub generated: Vec<Diag>,
    /// A disallowed modifier makes the snippet unusable.
    pub fatal: bool,
}

const FATAL_MODIFIERS: &[&str] = &["abstract", "native", "synchronized"];
const STRIPPED_MEMBER_MODIFIERS: &[&str] = &["public", "protected", "private", "static", "final"];
const STRIPPED_TYPE_MODIFIERS: &[&str] = &["public", "protected", "private", "static"];

struct ModifierCheck {
    stripped: Vec<Range<usize>>,
    diags: Vec<Diag>,
    fatal: bool,
}

fn check_modifiers(modifiers: &[Modifier], stripped_words: &[&str], fatal_words: &[&str]) -> ModifierCheck {
    let mut check = ModifierCheck {
        stripped: Vec::new(),
        diags: Vec::new(),
        fatal: false,
    };
    for modifier in modifiers {
        if fatal_words.contains(&modifier.word.as_str()) {
            check.fatal = true;
            check.diags.push(Diag::semantic(
                "modifier.fatal",
                format!("Modifier '{}' not permitted in top-level declarations", modifier.word),
                modifier.span.clone(),
            ));
        } else if stripped_words.contains(&modifier.word.as_str()) {
            check.stripped.push(modifier.span.clone());
            check.diags.push(Diag::warning(
                "modifier.ignored",
                format!("Modifier '{}' not permitted in top-level declarations, ignored", modifier.word),
                modifier.span.clone(),
            ));
        }
    }
    check
}

/// Generated name of the variable holding an expression snippet's value.
pub fn temp_var_name(id: SnippetId) -> String {
    format!("${id}")
}

/// Classifies a fragment. `expression_type` is the front end's answer to
/// `type_of` for expressions that are neither bare names nor assignments.
pub(crate) fn classify(id: SnippetId, source: &str, fragment: &Fragment, expression_type: Option<&str>) -> Classified {
    match fragment {
        Fragment::Import(import) => {
            let sub_kind = match (import.is_static, import.on_demand) {
                (false, false) => SubKind::SingleTypeImport,
                (false, true) => SubKind::TypeImportOnDemand,
                (true, false) => SubKind::SingleStaticImport,
                (true, true) => SubKind::StaticImportOnDemand,
            };
            let guts = Wrap::builder(source).source(import.span.clone()).build();
            let data = KindData::Import {
                name: import.name.clone(),
                is_static: import.is_static,
                on_demand: import.on_demand,
            };
            let identity = KeyIdentity::Import {
                text: guts.text().split_whitespace().collect::<Vec<_>>().join(" "),
            };
            Classified {
                sub_kind,
                data,
                identity,
                guts,
                corral: None,
                generated: Vec::new(),
                fatal: false,
            }
        }
        Fragment::Type(shape) => classify_type(id, source, shape),
        Fragment::Method(shape) => classify_method(id, source, shape),
        Fragment::Var(shape) => classify_var(id, source, shape),
        Fragment::Expression(shape) => {
            let mut builder = Wrap::builder(source);
            let (sub_kind, name) = match (&shape.form, expression_type) {
                (ExpressionForm::Name(name), _) => {
                    builder.literal(ENTRY_HEADER).literal("return ").source(shape.span.clone()).literal(";\n}");
                    (SubKind::VarValue, Some(name.clone()))
                }
                (ExpressionForm::Assignment { target }, _) => {
                    builder.literal(ENTRY_HEADER).literal("return ").source(shape.span.clone()).literal(";\n}");
                    (SubKind::Assignment, Some(target.clone()))
                }
                (ExpressionForm::Other, Some(type_name)) if type_name != "void" => {
                    let holder = temp_var_name(id);
                    builder
                        .literal(&format!("public static {type_name} {holder};\n"))
                        .literal(ENTRY_HEADER)
                        .literal(&format!("{holder} = "))
                        .source(shape.span.clone())
                        .literal(&format!(";\nreturn {holder};\n}}"));
                    let references = References::new(Default::default(), shape.references.clone());
                    return Classified {
                        sub_kind: SubKind::TempVarExpression,
                        data: KindData::Var {
                            name: holder,
                            type_name: type_name.to_string(),
                            references,
                        },
                        identity: KeyIdentity::Unique(id),
                        guts: builder.build(),
                        corral: None,
                        generated: Vec::new(),
                        fatal: false,
                    };
                }
                (ExpressionForm::Other, Some(_)) => {
                    builder.literal(ENTRY_HEADER).source(shape.span.clone()).literal(";\nreturn null;\n}");
                    (SubKind::ExpressionStatement, None)
                }
                // Untyped: the expression does not check, keep it in value position.
                (ExpressionForm::Other, None) => {
                    builder.literal(ENTRY_HEADER).literal("return ").source(shape.span.clone()).literal(";\n}");
                    (SubKind::ExpressionStatement, None)
                }
            };
            let references = References::new(Default::default(), shape.references.clone());
            let data = match sub_kind {
                SubKind::ExpressionStatement => KindData::Statement { references },
                _ => KindData::Expression { name, references },
            };
            Classified {
                sub_kind,
                data,
                identity: KeyIdentity::Unique(id),
                guts: builder.build(),
                corral: None,
                generated: Vec::new(),
                fatal: false,
            }
        }
        Fragment::Statement(shape) => {
            let guts = Wrap::builder(source)
                .literal(ENTRY_HEADER)
                .source(shape.span.clone())
                .literal("\nreturn null;\n}")
                .build();
            Classified {
                sub_kind: SubKind::Statement,
                data: KindData::Statement {
                    references: References::new(Default::default(), shape.references.clone()),
                },
                identity: KeyIdentity::Unique(id),
                guts,
                corral: None,
                generated: Vec::new(),
                fatal: false,
            }
        }
    }
}

fn classify_type(id: SnippetId, source: &str, shape: &TypeShape) -> Classified {
    let check = check_modifiers(&shape.modifiers, STRIPPED_TYPE_MODIFIERS, &[]);
    let guts = Wrap::builder(source)
        .literal("public static ")
        .source_without(shape.span.clone(), &check.stripped)
        .build();
    let corral = corral::type_corral(id, source, shape, &check.stripped);
    Classified {
        sub_kind: SubKind::Class,
        data: KindData::TypeDecl {
            name: shape.name.clone(),
            references: shape.references.clone(),
        },
        identity: KeyIdentity::TypeDecl { name: shape.name.clone() },
        guts,
        corral: Some(corral),
        generated: check.diags,
        fatal: check.fatal,
    }
}

fn classify_method(id: SnippetId, source: &str, shape: &MethodShape) -> Classified {
    let mut check = check_modifiers(&shape.modifiers, STRIPPED_MEMBER_MODIFIERS, FATAL_MODIFIERS);
    if shape.body.is_none() {
        check.fatal = true;
        check
            .diags
            .push(Diag::semantic("missing.body", "missing method body", shape.span.clone()));
    }
    let guts = Wrap::builder(source)
        .literal("public static ")
        .source_without(shape.span.clone(), &check.stripped)
        .build();
    let corral = corral::method_corral(id, source, shape);
    let signature = corral::normalized_signature(source, shape);
    Classified {
        sub_kind: SubKind::Method,
        data: KindData::Method {
            name: shape.name.clone(),
            signature,
            parameter_types: shape.parameter_types.clone(),
            erased_parameter_types: shape.erased_parameter_types.clone(),
            references: shape.references.clone(),
        },
        identity: KeyIdentity::Method {
            name: shape.name.clone(),
            parameter_types: shape.parameter_types.join(","),
        },
        guts,
        corral: Some(corral),
        generated: check.diags,
        fatal: check.fatal,
    }
}

fn classify_var(id: SnippetId, source: &str, shape: &VarShape) -> Classified {
    let mut check = check_modifiers(&shape.modifiers, STRIPPED_MEMBER_MODIFIERS, FATAL_MODIFIERS);
    let mut builder = Wrap::builder(source);
    builder
        .literal("public static ")
        .source(shape.type_span.clone())
        .literal(" ")
        .source(shape.name_span.clone())
        .literal(";\n")
        .literal(ENTRY_HEADER);
    if let Some(initializer) = &shape.initializer {
        builder
            .source(shape.name_span.clone())
            .literal(" = ")
            .source(initializer.clone())
            .literal(";\n");
    }
    builder.literal("return ").source(shape.name_span.clone()).literal(";\n}");
    let sub_kind = if shape.initializer.is_some() {
        SubKind::VarDeclarationWithInitializer
    } else {
        SubKind::VarDeclaration
    };
    Classified {
        sub_kind,
        data: KindData::Var {
            name: shape.name.clone(),
            type_name: shape.type_name.clone(),
            references: shape.references.clone(),
        },
        identity: KeyIdentity::Var { name: shape.name.clone() },
        guts: builder.build(),
        corral: Some(corral::var_corral(id, source, shape)),
        generated: std::mem::take(&mut check.diags),
        fatal: check.fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{ExpressionShape, VarShape};
    use std::collections::BTreeSet;

    fn var_shape(source: &str) -> VarShape {
        // "int x = 5;"
        assert_eq!(source, "int x = 5;");
        VarShape {
            name: "x".into(),
            modifiers: Vec::new(),
            span: 0..10,
            type_span: 0..3,
            name_span: 4..5,
            type_name: "int".into(),
            initializer: Some(8..9),
            references: References::default(),
        }
    }

    #[test]
    fn position_map_round_trips_through_scaffolding() {
        let source = "int x = 5;";
        let classified = classify(SnippetId(1), source, &Fragment::Var(var_shape(source)), None);
        let text = classified.guts.text().to_string();
        assert!(text.starts_with("public static int x;"));
        let initializer = text.find("x = 5").expect("initializer is wrapped");
        let value = initializer + 4;
        assert_eq!(classified.guts.source_position(value), Some(8));
        assert_eq!(classified.guts.translate_span(value..value + 1), 8..9);
        assert_eq!(classified.guts.source_position(0), None);
        assert_eq!(classified.guts.translate_span(0..6), 0..0);
    }

    #[test]
    fn outer_wrap_shifts_segments() {
        let source = "int x = 5;";
        let classified = classify(SnippetId(1), source, &Fragment::Var(var_shape(source)), None);
        let config = EngineConfig::default();
        let imports = vec!["import static REPL.$Rivet$2.f;".to_string()];
        let outer = OuterWrap::new(&config, "$Rivet$1".into(), &imports, &classified.guts, Placement::Body);
        assert_eq!(outer.full_name, "REPL.$Rivet$1");
        let text = outer.wrap.text();
        let at = text.find("= 5").expect("initializer present") + 2;
        assert_eq!(outer.wrap.source_position(at), Some(8));
        assert_eq!(outer.wrap.wrapped_range(8..9), Some(at..at + 1));
    }

    #[test]
    fn stripped_modifiers_warn_and_fatal_ones_reject() {
        let modifiers = vec![
            Modifier { word: "public".into(), span: 0..6 },
            Modifier { word: "synchronized".into(), span: 7..19 },
        ];
        let check = check_modifiers(&modifiers, STRIPPED_MEMBER_MODIFIERS, FATAL_MODIFIERS);
        assert!(check.fatal);
        assert_eq!(check.stripped, vec![0..6]);
        assert!(!check.diags[0].is_error());
        assert!(check.diags[1].is_error());
    }

    #[test]
    fn void_expression_becomes_statement() {
        let source = "foo()";
        let shape = ExpressionShape {
            span: 0..5,
            form: ExpressionForm::Other,
            references: BTreeSet::from(["foo".to_string()]),
        };
        let classified = classify(SnippetId(3), source, &Fragment::Expression(shape.clone()), Some("void"));
        assert_eq!(classified.sub_kind, SubKind::ExpressionStatement);
        let classified = classify(SnippetId(3), source, &Fragment::Expression(shape), Some("int"));
        assert_eq!(classified.sub_kind, SubKind::TempVarExpression);
        assert!(classified.guts.text().contains("public static int $3;"));
    }

    #[test]
    fn untyped_expression_stays_in_value_position() {
        let source = "foo + 1";
        let shape = ExpressionShape {
            span: 0..7,
            form: ExpressionForm::Other,
            references: BTreeSet::from(["foo".to_string()]),
        };
        let classified = classify(SnippetId(4), source, &Fragment::Expression(shape), None);
        assert_eq!(classified.sub_kind, SubKind::ExpressionStatement);
        assert!(classified.guts.text().contains("return foo + 1;"));
        assert!(!classified.guts.text().contains("return null;"));
    }

    #[test]
    fn source_without_skips_ranges() {
        let source = "public static int f() { return 1; }";
        let wrap = Wrap::builder(source).source_without(0..source.len(), &[0..6, 7..13]).build();
        assert_eq!(wrap.text(), "  int f() { return 1; }");
    }
}
