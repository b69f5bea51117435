//! Structural facts about a candidate code string.
//!
//! [`CodeAnalyzer`] parses the source once. Each fact is read off the syntax
//! tree when the parse succeeded and falls back to the patterns in
//! [`super::fallback`] when it did not, so every accessor is infallible.

use serde::Serialize;

use super::ast::{Constant, Expr, StmtKind};
use super::fallback::{self, COMPLEX_TYPE_NAMES};
use super::lexer::QuoteStyle;
use super::parser::{parse_module, ParseError, ParsedSource};
use super::walk::{walk_module, walk_stmt, NodeRef};

/// Builtins that mark a functional iteration style.
pub const FUNCTIONAL_BUILTINS: [&str; 7] = ["map", "filter", "reduce", "zip", "enumerate", "any", "all"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComprehensionCounts {
    pub list: usize,
    pub set: usize,
    pub dict: usize,
    pub generator: usize,
}

impl ComprehensionCounts {
    pub fn total(&self) -> usize {
        self.list + self.set + self.dict + self.generator
    }
}

/// Annotation counts over plain (non-async) function definitions and
/// annotated assignments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeHintCounts {
    /// Annotated positional parameters.
    pub params: usize,
    /// Annotated keyword-only, `*args` and `**kwargs` parameters.
    pub extra_params: usize,
    /// Annotated assignments (`x: int = 0`).
    pub variables: usize,
    /// Functions with a `->` return annotation.
    pub returns: usize,
}

impl TypeHintCounts {
    pub fn any(&self) -> bool {
        self.params + self.extra_params + self.variables + self.returns > 0
    }

    /// Parameter and variable annotations, return annotations excluded.
    pub fn annotations(&self) -> usize {
        self.params + self.extra_params + self.variables
    }
}

#[derive(Debug)]
pub struct CodeAnalyzer<'s> {
    source: &'s str,
    parsed: Option<ParsedSource>,
    parse_error: Option<ParseError>,
}

impl<'s> CodeAnalyzer<'s> {
    pub fn new(source: &'s str) -> Self {
        match parse_module(source) {
            Ok(parsed) => Self {
                source,
                parsed: Some(parsed),
                parse_error: None,
            },
            Err(err) => {
                tracing::trace!(error = %err, "source does not parse, using pattern fallback");
                Self {
                    source,
                    parsed: None,
                    parse_error: Some(err),
                }
            }
        }
    }

    pub fn source(&self) -> &'s str {
        self.source
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed.is_some()
    }

    pub fn parse_error(&self) -> Option<&ParseError> {
        self.parse_error.as_ref()
    }

    fn nodes(&self) -> Option<Vec<NodeRef<'_>>> {
        self.parsed.as_ref().map(|p| walk_module(&p.module))
    }

    fn count_nodes(&self, pred: impl Fn(&NodeRef<'_>) -> bool) -> Option<usize> {
        self.nodes().map(|nodes| nodes.iter().filter(|n| pred(n)).count())
    }

    // ------------------------------------------------------------------
    // Size and structure
    // ------------------------------------------------------------------

    /// Non-blank lines that are not pure comments.
    pub fn code_lines(&self) -> usize {
        fallback::code_lines(self.source)
    }

    /// Function definitions, async included.
    pub fn function_count(&self) -> usize {
        self.count_nodes(|n| matches!(stmt_kind(n), Some(StmtKind::FunctionDef(_))))
            .unwrap_or_else(|| fallback::function_count(self.source))
    }

    pub fn class_count(&self) -> usize {
        self.count_nodes(|n| matches!(stmt_kind(n), Some(StmtKind::ClassDef(_))))
            .unwrap_or_else(|| fallback::class_count(self.source))
    }

    /// `for` and `while` statements. Comprehensions are not loops.
    pub fn loop_count(&self) -> usize {
        self.count_nodes(|n| {
            matches!(
                stmt_kind(n),
                Some(StmtKind::For { .. } | StmtKind::While { .. })
            )
        })
        .unwrap_or_else(|| fallback::loop_count(self.source))
    }

    pub fn comprehension_counts(&self) -> ComprehensionCounts {
        match self.nodes() {
            Some(nodes) => {
                let mut counts = ComprehensionCounts::default();
                for node in &nodes {
                    match expr(node) {
                        Some(Expr::ListComp { .. }) => counts.list += 1,
                        Some(Expr::SetComp { .. }) => counts.set += 1,
                        Some(Expr::DictComp { .. }) => counts.dict += 1,
                        Some(Expr::GeneratorExp { .. }) => counts.generator += 1,
                        _ => {}
                    }
                }
                counts
            }
            None => {
                let (list, dict, set, generator) = fallback::comprehension_counts(self.source);
                ComprehensionCounts {
                    list,
                    set,
                    dict,
                    generator,
                }
            }
        }
    }

    pub fn comprehension_count(&self) -> usize {
        self.comprehension_counts().total()
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    pub fn type_hint_counts(&self) -> TypeHintCounts {
        let Some(nodes) = self.nodes() else {
            let approx = fallback::annotation_counts(self.source);
            return TypeHintCounts {
                params: approx.param_annotations,
                extra_params: 0,
                variables: approx.variable_annotations,
                returns: approx.return_annotations,
            };
        };

        let mut counts = TypeHintCounts::default();
        for node in &nodes {
            match stmt_kind(node) {
                Some(StmtKind::FunctionDef(func)) if !func.is_async => {
                    let params = &func.params;
                    counts.params += params
                        .args
                        .iter()
                        .filter(|p| p.annotation.is_some())
                        .count();
                    counts.extra_params += params
                        .kwonly
                        .iter()
                        .chain(params.vararg.iter())
                        .chain(params.kwarg.iter())
                        .filter(|p| p.annotation.is_some())
                        .count();
                    if func.returns.is_some() {
                        counts.returns += 1;
                    }
                }
                Some(StmtKind::AnnAssign { .. }) => counts.variables += 1,
                _ => {}
            }
        }
        counts
    }

    pub fn has_type_hints(&self) -> bool {
        self.type_hint_counts().any()
    }

    /// `import typing` or `from typing import ...`.
    pub fn has_typing_import(&self) -> bool {
        match self.nodes() {
            Some(nodes) => nodes.iter().any(|n| match stmt_kind(n) {
                Some(StmtKind::ImportFrom {
                    module: Some(module),
                    ..
                }) => module == "typing",
                Some(StmtKind::Import(names)) => names.iter().any(|a| a.name == "typing"),
                _ => false,
            }),
            None => fallback::has_typing_import(self.source),
        }
    }

    /// Uses of typing constructs such as `List`, `Optional` or `Callable`.
    /// A subscripted use (`List[int]`) counts the name and the subscript.
    pub fn complex_type_count(&self) -> usize {
        let is_complex = |e: &Expr| matches!(e, Expr::Name(name) if COMPLEX_TYPE_NAMES.contains(&name.as_str()));
        self.count_nodes(|n| match expr(n) {
            Some(e @ Expr::Name(_)) => is_complex(e),
            Some(Expr::Subscript { value, .. }) => is_complex(value),
            _ => false,
        })
        .unwrap_or_else(|| fallback::complex_type_count(self.source))
    }

    /// A typing import anywhere in the text, not only at line start.
    pub fn mentions_typing_import(&self) -> bool {
        fallback::typing_import_anywhere(self.source)
    }

    pub fn isinstance_count(&self) -> usize {
        fallback::isinstance_count(self.source)
    }

    // ------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------

    /// Function names, referenced names and parameter names, in tree order.
    pub fn identifiers(&self) -> Vec<String> {
        let Some(nodes) = self.nodes() else {
            return fallback::identifiers(self.source);
        };
        nodes
            .iter()
            .filter_map(|node| match node {
                NodeRef::Stmt(stmt) => match &stmt.kind {
                    StmtKind::FunctionDef(func) if !func.is_async => Some(func.name.clone()),
                    _ => None,
                },
                NodeRef::Expr(Expr::Name(name)) => Some(name.clone()),
                NodeRef::Param(param) => Some(param.name.clone()),
                NodeRef::Expr(_) => None,
            })
            .collect()
    }

    pub fn snake_case_count(&self) -> usize {
        self.identifiers().iter().filter(|n| is_snake_case(n)).count()
    }

    pub fn camel_case_count(&self) -> usize {
        self.identifiers().iter().filter(|n| is_camel_case(n)).count()
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// `(single, double)` quoted string pieces; triple-quoted pieces excluded.
    pub fn quote_counts(&self) -> (usize, usize) {
        let Some(nodes) = self.nodes() else {
            return fallback::quote_counts(self.source);
        };
        let mut single = 0;
        let mut double = 0;
        for node in &nodes {
            if let Some(Expr::Str(lit)) = expr(node) {
                for part in lit.parts.iter().filter(|p| !p.triple) {
                    match part.quote {
                        QuoteStyle::Single => single += 1,
                        QuoteStyle::Double => double += 1,
                    }
                }
            }
        }
        (single, double)
    }

    pub fn fstring_count(&self) -> usize {
        self.count_nodes(|n| matches!(expr(n), Some(Expr::Str(lit)) if lit.is_fstring()))
            .unwrap_or_else(|| fallback::fstring_count(self.source))
    }

    /// `<expr>.format(...)` calls.
    pub fn format_call_count(&self) -> usize {
        self.count_nodes(|n| match expr(n) {
            Some(Expr::Call { func, .. }) => {
                matches!(func.as_ref(), Expr::Attribute { attr, .. } if attr == "format")
            }
            _ => false,
        })
        .unwrap_or_else(|| fallback::format_call_count(self.source))
    }

    pub fn percent_format_count(&self) -> usize {
        fallback::percent_format_count(self.source)
    }

    // ------------------------------------------------------------------
    // Functions, control flow, errors
    // ------------------------------------------------------------------

    /// `(documented, undocumented)` function counts.
    pub fn docstring_counts(&self) -> (usize, usize) {
        let Some(nodes) = self.nodes() else {
            return fallback::docstring_counts(self.source);
        };
        nodes
            .iter()
            .filter_map(|n| match stmt_kind(n) {
                Some(StmtKind::FunctionDef(func)) => Some(func.has_docstring()),
                _ => None,
            })
            .fold((0, 0), |(with, without), documented| {
                if documented {
                    (with + 1, without)
                } else {
                    (with, without + 1)
                }
            })
    }

    /// Return statements of each function, nested functions included in
    /// their parent's count as well as their own.
    pub fn returns_per_function(&self) -> Vec<usize> {
        let Some(nodes) = self.nodes() else {
            return fallback::returns_per_function(self.source);
        };
        nodes
            .iter()
            .filter_map(|node| match node {
                NodeRef::Stmt(stmt) if matches!(stmt.kind, StmtKind::FunctionDef(_)) => Some(
                    walk_stmt(stmt)
                        .iter()
                        .filter(|n| matches!(stmt_kind(n), Some(StmtKind::Return(_))))
                        .count(),
                ),
                _ => None,
            })
            .collect()
    }

    pub fn ternary_count(&self) -> usize {
        self.count_nodes(|n| matches!(expr(n), Some(Expr::IfExp { .. })))
            .unwrap_or_else(|| fallback::ternary_count(self.source))
    }

    /// `if` statements; every `elif` is a nested `if`.
    pub fn if_count(&self) -> usize {
        self.count_nodes(|n| matches!(stmt_kind(n), Some(StmtKind::If { .. })))
            .unwrap_or_else(|| fallback::if_count(self.source))
    }

    pub fn raise_count(&self) -> usize {
        self.count_nodes(|n| matches!(stmt_kind(n), Some(StmtKind::Raise { .. })))
            .unwrap_or_else(|| fallback::raise_count(self.source))
    }

    /// Bare `return` and `return None`.
    pub fn return_none_count(&self) -> usize {
        self.count_nodes(|n| match stmt_kind(n) {
            Some(StmtKind::Return(None)) => true,
            Some(StmtKind::Return(Some(value))) => value.is_none_constant(),
            _ => false,
        })
        .unwrap_or_else(|| fallback::return_none_count(self.source))
    }

    // ------------------------------------------------------------------
    // Literals and layout
    // ------------------------------------------------------------------

    pub fn trailing_comma_count(&self) -> usize {
        fallback::trailing_comma_count(self.source)
    }

    pub fn missing_trailing_comma_count(&self) -> usize {
        fallback::missing_trailing_comma_count(self.source)
    }

    /// Module-level `UPPER_CASE = ...` lines.
    pub fn constant_definition_count(&self) -> usize {
        fallback::constant_definition_count(self.source)
    }

    /// Numeric literals other than 0, 1 and 2 (booleans are not numbers
    /// here, and `-1` is a negated `1`).
    pub fn magic_number_count(&self) -> usize {
        self.count_nodes(|n| match expr(n) {
            Some(Expr::Constant(Constant::Int(v))) => !(0..=2).contains(v),
            Some(Expr::Constant(Constant::Float(v))) => ![0.0, 1.0, 2.0].contains(v),
            Some(Expr::Constant(Constant::OtherNumber(text))) => {
                !text.to_ascii_lowercase().ends_with('j')
            }
            _ => false,
        })
        .unwrap_or_else(|| fallback::magic_number_count(self.source))
    }

    /// `(is None / is not None, == None / != None)`.
    pub fn none_comparison_counts(&self) -> (usize, usize) {
        fallback::none_comparison_counts(self.source)
    }

    /// `(absolute, relative)` import lines.
    pub fn import_counts(&self) -> (usize, usize) {
        fallback::import_counts(self.source)
    }

    pub fn comment_count(&self) -> usize {
        fallback::comment_count(self.source)
    }

    pub fn comment_and_docstring_lines(&self) -> usize {
        fallback::comment_and_docstring_lines(self.source)
    }

    /// Comments per code line.
    pub fn comment_density(&self) -> f64 {
        self.comment_count() as f64 / self.code_lines().max(1) as f64
    }

    // ------------------------------------------------------------------
    // Iteration style (line and pattern oriented)
    // ------------------------------------------------------------------

    pub fn map_filter_count(&self) -> usize {
        fallback::map_filter_count(self.source)
    }

    /// Lines that open a `for x ...:` or `while ...:` block.
    pub fn explicit_loop_lines(&self) -> usize {
        fallback::explicit_loop_lines(self.source)
    }

    /// `(list, dict, generator)` bracketed `for` expressions.
    pub fn inline_comprehension_counts(&self) -> (usize, usize, usize) {
        fallback::loose_comprehension_counts(self.source)
    }

    /// Which of [`FUNCTIONAL_BUILTINS`] are called somewhere in the source.
    pub fn functional_builtins_used(&self) -> Vec<&'static str> {
        FUNCTIONAL_BUILTINS
            .iter()
            .copied()
            .filter(|name| fallback::calls_builtin(self.source, name))
            .collect()
    }

    /// Whether some name is assigned on more than one line.
    pub fn has_reassignment(&self) -> bool {
        let names = fallback::assigned_names(self.source);
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        unique.len() < names.len()
    }

    /// Snapshot of every fact.
    pub fn features(&self) -> CodeFeatures {
        let (single_quotes, double_quotes) = self.quote_counts();
        let (documented_functions, undocumented_functions) = self.docstring_counts();
        let (is_none_comparisons, eq_none_comparisons) = self.none_comparison_counts();
        let (absolute_imports, relative_imports) = self.import_counts();
        CodeFeatures {
            parsed: self.is_parsed(),
            parse_error: self.parse_error.as_ref().map(ToString::to_string),
            code_lines: self.code_lines(),
            function_count: self.function_count(),
            class_count: self.class_count(),
            loop_count: self.loop_count(),
            comprehensions: self.comprehension_counts(),
            type_hints: self.type_hint_counts(),
            has_typing_import: self.has_typing_import(),
            complex_type_count: self.complex_type_count(),
            isinstance_count: self.isinstance_count(),
            comment_and_docstring_lines: self.comment_and_docstring_lines(),
            snake_case_identifiers: self.snake_case_count(),
            camel_case_identifiers: self.camel_case_count(),
            single_quotes,
            double_quotes,
            documented_functions,
            undocumented_functions,
            returns_per_function: self.returns_per_function(),
            fstring_count: self.fstring_count(),
            format_call_count: self.format_call_count(),
            percent_format_count: self.percent_format_count(),
            ternary_count: self.ternary_count(),
            if_count: self.if_count(),
            trailing_commas: self.trailing_comma_count(),
            missing_trailing_commas: self.missing_trailing_comma_count(),
            raise_count: self.raise_count(),
            return_none_count: self.return_none_count(),
            constant_definitions: self.constant_definition_count(),
            magic_numbers: self.magic_number_count(),
            is_none_comparisons,
            eq_none_comparisons,
            absolute_imports,
            relative_imports,
            comment_count: self.comment_count(),
            comment_density: self.comment_density(),
            map_filter_count: self.map_filter_count(),
            explicit_loop_lines: self.explicit_loop_lines(),
            functional_builtins: self.functional_builtins_used(),
            has_reassignment: self.has_reassignment(),
        }
    }
}

/// Every analyzer fact for one source string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeFeatures {
    pub parsed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub code_lines: usize,
    pub function_count: usize,
    pub class_count: usize,
    pub loop_count: usize,
    pub comprehensions: ComprehensionCounts,
    pub type_hints: TypeHintCounts,
    pub has_typing_import: bool,
    pub complex_type_count: usize,
    pub isinstance_count: usize,
    pub comment_and_docstring_lines: usize,
    pub snake_case_identifiers: usize,
    pub camel_case_identifiers: usize,
    pub single_quotes: usize,
    pub double_quotes: usize,
    pub documented_functions: usize,
    pub undocumented_functions: usize,
    pub returns_per_function: Vec<usize>,
    pub fstring_count: usize,
    pub format_call_count: usize,
    pub percent_format_count: usize,
    pub ternary_count: usize,
    pub if_count: usize,
    pub trailing_commas: usize,
    pub missing_trailing_commas: usize,
    pub raise_count: usize,
    pub return_none_count: usize,
    pub constant_definitions: usize,
    pub magic_numbers: usize,
    pub is_none_comparisons: usize,
    pub eq_none_comparisons: usize,
    pub absolute_imports: usize,
    pub relative_imports: usize,
    pub comment_count: usize,
    pub comment_density: f64,
    pub map_filter_count: usize,
    pub explicit_loop_lines: usize,
    pub functional_builtins: Vec<&'static str>,
    pub has_reassignment: bool,
}

fn stmt_kind<'a>(node: &NodeRef<'a>) -> Option<&'a StmtKind> {
    match node {
        NodeRef::Stmt(stmt) => Some(&stmt.kind),
        _ => None,
    }
}

fn expr<'a>(node: &NodeRef<'a>) -> Option<&'a Expr> {
    match node {
        NodeRef::Expr(expr) => Some(*expr),
        _ => None,
    }
}

/// Names that carry no casing signal: private, constant-like or one letter.
fn is_style_neutral(name: &str) -> bool {
    let has_cased = name.chars().any(char::is_alphabetic);
    let is_upper = has_cased && !name.chars().any(char::is_lowercase);
    name.starts_with('_') || is_upper || name.chars().count() <= 1
}

pub fn is_snake_case(name: &str) -> bool {
    !is_style_neutral(name) && name.contains('_') && name == name.to_lowercase()
}

pub fn is_camel_case(name: &str) -> bool {
    if is_style_neutral(name) {
        return false;
    }
    let chars: Vec<char> = name.chars().collect();
    chars
        .windows(2)
        .any(|pair| pair[0].is_ascii_lowercase() && pair[1].is_ascii_uppercase())
}
