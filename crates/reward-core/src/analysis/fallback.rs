//! Pattern-based approximations used when the source does not parse.
//!
//! Every function here works on raw text, never fails and only ever returns
//! counts, so a broken completion still yields a usable signal. Some facts
//! are textual by definition (trailing commas, `is None` comparisons, import
//! lines); those patterns live here too and are shared by both paths.

use once_cell::sync::Lazy;
use regex::Regex;

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static pattern compiles")
}

/// Names treated as "complex" typing constructs.
pub const COMPLEX_TYPE_NAMES: [&str; 22] = [
    "List", "Dict", "Tuple", "Optional", "Union", "Set", "FrozenSet", "Callable", "Generic",
    "Protocol", "TypeVar", "ClassVar", "Final", "Literal", "Any", "NoReturn", "Type", "Sequence",
    "Mapping", "Iterable", "Iterator", "Collection",
];

static FUNCTION_DEF: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?m)^\s*(?:async\s+)?def\s+[a-zA-Z_]\w*\s*\("));
static CLASS_DEF: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?m)^\s*class\s+[a-zA-Z_]\w*\s*(?:\([^)]*\))?\s*:"));
static INLINE_COMPREHENSION: Lazy<Regex> = Lazy::new(|| pattern(r"[\[\{].*\bfor\b.*\bin\b.*[\]\}]"));
static INLINE_GENERATOR: Lazy<Regex> = Lazy::new(|| pattern(r"\([^()]*\bfor\b.*\bin\b[^()]*\)"));
static LOOP_HEAD: Lazy<Regex> = Lazy::new(|| pattern(r"^\s*(for|while)\s+"));
static LIST_COMP: Lazy<Regex> = Lazy::new(|| pattern(r"\[[^\[\]]*\bfor\b[^\[\]]*\bin\b[^\[\]]*\]"));
static DICT_COMP: Lazy<Regex> = Lazy::new(|| pattern(r"\{[^\{\}]*\bfor\b[^\{\}]*\bin\b[^\{\}]*\}"));
static SET_COMP: Lazy<Regex> = Lazy::new(|| pattern(r"\{[^\{\}:]*\bfor\b[^\{\}:]*\bin\b[^\{\}:]*\}"));
static GENERATOR_EXP: Lazy<Regex> = Lazy::new(|| pattern(r"\([^\(\)]*\bfor\b[^\(\)]*\bin\b[^\(\)]*\)"));
static TYPING_IMPORT_LINE: Lazy<Regex> =
    Lazy::new(|| pattern(r"^\s*(?:from\s+typing\s+import|import\s+typing)"));
static TYPING_IMPORT_ANYWHERE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?:from\s+typing\s+import|import\s+typing)"));
static COMPLEX_TYPE: Lazy<Regex> = Lazy::new(|| {
    pattern(&format!(
        r"\b(?:{})\b\s*(?:\[|[,)\n]|$)",
        COMPLEX_TYPE_NAMES.join("|")
    ))
});
static DEF_SIGNATURE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?m)^\s*(?:async\s+)?def\s+([a-zA-Z_]\w*)\s*\(([^)]*)\)\s*(->)?"));
static VARIABLE_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?m)^\s*([a-zA-Z_]\w*)\s*:\s*[a-zA-Z_][\w\[\], .|]*(?:=.*)?$"));
static ASSIGNED_NAME: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*([a-zA-Z_]\w*)\s*="));
static DOCUMENTED_DEF: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"(?m)^\s*(?:async\s+)?def\s+[a-zA-Z_]\w*\s*\(.*\).*:\s*\n\s*[rRuU]?(?:"""|''')"#)
});
static RETURN_LINE: Lazy<Regex> = Lazy::new(|| pattern(r"^\s*return\b"));
static FSTRING_OPEN: Lazy<Regex> = Lazy::new(|| pattern(r#"(?i)\b(?:f|fr|rf)["']"#));
static FORMAT_CALL: Lazy<Regex> = Lazy::new(|| pattern(r"\.format\s*\("));
static TERNARY: Lazy<Regex> = Lazy::new(|| pattern(r"\S.*\bif\b.+\belse\b"));
static IF_HEAD: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*(?:el)?if\b"));
static RAISE_LINE: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*raise\b"));
static RETURN_NONE_LINE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?m)^\s*return\s*(?:None)?\s*(?:#.*)?$"));
static NUMBER: Lazy<Regex> = Lazy::new(|| pattern(r"\b\d+(?:\.\d+)?\b"));
static TRIPLE_DOUBLE: Lazy<Regex> = Lazy::new(|| pattern(r#"(?s)""".*?""""#));
static TRIPLE_SINGLE: Lazy<Regex> = Lazy::new(|| pattern(r"(?s)'''.*?'''"));
static SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| pattern(r"'[^'\n]*'"));
static DOUBLE_QUOTED: Lazy<Regex> = Lazy::new(|| pattern(r#""[^"\n]*""#));
static STRING_OR_COMMENT: Lazy<Regex> =
    Lazy::new(|| pattern(r#"(?s)""".*?"""|'''.*?'''|"[^"\n]*"|'[^'\n]*'|#[^\n]*"#));

// Textual on both paths.
static COMMENT: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)#.*$"));
static PERCENT_FORMAT: Lazy<Regex> = Lazy::new(|| pattern(r#"["'].*?%[sdifr].*?["']\s*%"#));
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| pattern(r",\s*[\]\}\)]"));
static MISSING_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| pattern(r"[^,\s]\s*\n\s*[\]\}\)]"));
static IS_NONE: Lazy<Regex> = Lazy::new(|| pattern(r"\bis\s+None\b"));
static IS_NOT_NONE: Lazy<Regex> = Lazy::new(|| pattern(r"\bis\s+not\s+None\b"));
static EQ_NONE: Lazy<Regex> = Lazy::new(|| pattern(r"==\s*None\b"));
static NEQ_NONE: Lazy<Regex> = Lazy::new(|| pattern(r"!=\s*None\b"));
static CONSTANT_DEF: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^[A-Z][A-Z0-9_]*\s*="));
static ABSOLUTE_IMPORT: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?m)^(?:from\s+[a-zA-Z_][a-zA-Z0-9_.]*\s+)?import\s+[a-zA-Z_]"));
static RELATIVE_IMPORT: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^from\s+\."));
static MAP_FILTER: Lazy<Regex> = Lazy::new(|| pattern(r"\b(map|filter)\s*\("));
static ISINSTANCE: Lazy<Regex> = Lazy::new(|| pattern(r"\bisinstance\s*\("));
static EXPLICIT_LOOP: Lazy<Regex> = Lazy::new(|| pattern(r"^\s*(for\s+\w+.*?:|while\s+.*?:)"));
static LOOSE_LIST_COMP: Lazy<Regex> = Lazy::new(|| pattern(r"\[[^\[\]]*\bfor\b[^\[\]]*\]"));
static LOOSE_DICT_COMP: Lazy<Regex> = Lazy::new(|| pattern(r"\{[^{}]*\bfor\b[^{}]*\}"));
static LOOSE_GENERATOR: Lazy<Regex> = Lazy::new(|| pattern(r"\([^()]*\bfor\b[^()]*\)"));
static DOCSTRING_BLOCK: Lazy<Regex> = Lazy::new(|| pattern(r#"(?s)""".*?""""#));

// ----------------------------------------------------------------------
// Structural approximations (used only when parsing fails)
// ----------------------------------------------------------------------

pub fn function_count(code: &str) -> usize {
    FUNCTION_DEF.find_iter(code).count()
}

pub fn class_count(code: &str) -> usize {
    CLASS_DEF.find_iter(code).count()
}

pub fn loop_count(code: &str) -> usize {
    code.lines()
        .filter(|line| {
            !INLINE_COMPREHENSION.is_match(line)
                && !INLINE_GENERATOR.is_match(line)
                && LOOP_HEAD.is_match(line.trim())
        })
        .count()
}

/// `(list, dict, set, generator)` comprehension counts.
///
/// The dict and set patterns overlap on brace comprehensions without a
/// colon, so a set comprehension is counted under both.
pub fn comprehension_counts(code: &str) -> (usize, usize, usize, usize) {
    (
        LIST_COMP.find_iter(code).count(),
        DICT_COMP.find_iter(code).count(),
        SET_COMP.find_iter(code).count(),
        GENERATOR_EXP.find_iter(code).count(),
    )
}

pub fn has_typing_import(code: &str) -> bool {
    code.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .any(|line| TYPING_IMPORT_LINE.is_match(line))
}

pub fn complex_type_count(code: &str) -> usize {
    if !TYPING_IMPORT_ANYWHERE.is_match(code) {
        return 0;
    }
    COMPLEX_TYPE.find_iter(code).count()
}

/// Annotation counts read from `def` signatures and annotated assignments.
pub struct AnnotationCounts {
    pub param_annotations: usize,
    pub variable_annotations: usize,
    pub return_annotations: usize,
}

pub fn annotation_counts(code: &str) -> AnnotationCounts {
    let mut counts = AnnotationCounts {
        param_annotations: 0,
        variable_annotations: 0,
        return_annotations: 0,
    };
    for caps in DEF_SIGNATURE.captures_iter(code) {
        counts.param_annotations += caps[2]
            .split(',')
            .filter(|param| param.contains(':'))
            .count();
        if caps.get(3).is_some() {
            counts.return_annotations += 1;
        }
    }
    counts.variable_annotations = VARIABLE_ANNOTATION
        .captures_iter(code)
        .filter(|caps| !is_block_keyword(&caps[1]))
        .count();
    counts
}

fn is_block_keyword(word: &str) -> bool {
    matches!(
        word,
        "else" | "try" | "finally" | "except" | "lambda" | "class" | "def" | "if" | "elif"
            | "while" | "for" | "with" | "match" | "case"
    )
}

/// Function names, parameter names and assignment targets.
pub fn identifiers(code: &str) -> Vec<String> {
    let mut names = Vec::new();
    for caps in DEF_SIGNATURE.captures_iter(code) {
        names.push(caps[1].to_string());
        for param in caps[2].split(',') {
            let name = param
                .trim()
                .trim_start_matches('*')
                .split([':', '='])
                .next()
                .unwrap_or("")
                .trim();
            if !name.is_empty() && name != "/" {
                names.push(name.to_string());
            }
        }
    }
    names.extend(
        ASSIGNED_NAME
            .captures_iter(code)
            .map(|caps| caps[1].to_string()),
    );
    names
}

/// Assignment targets at the start of a line, in order of appearance.
pub fn assigned_names(code: &str) -> Vec<String> {
    ASSIGNED_NAME
        .captures_iter(code)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// `(documented, undocumented)` function counts.
pub fn docstring_counts(code: &str) -> (usize, usize) {
    let documented = DOCUMENTED_DEF.find_iter(code).count();
    let total = function_count(code);
    (documented.min(total), total.saturating_sub(documented))
}

/// Return statements between consecutive `def` headers.
pub fn returns_per_function(code: &str) -> Vec<usize> {
    let mut counts = Vec::new();
    for line in code.lines() {
        if FUNCTION_DEF.is_match(line) {
            counts.push(0);
        } else if RETURN_LINE.is_match(line) {
            if let Some(current) = counts.last_mut() {
                *current += 1;
            }
        }
    }
    counts
}

pub fn fstring_count(code: &str) -> usize {
    FSTRING_OPEN.find_iter(code).count()
}

pub fn format_call_count(code: &str) -> usize {
    FORMAT_CALL.find_iter(code).count()
}

pub fn ternary_count(code: &str) -> usize {
    code.lines()
        .map(str::trim)
        .filter(|line| !line.ends_with(':'))
        .filter(|line| TERNARY.is_match(line))
        .count()
}

pub fn if_count(code: &str) -> usize {
    IF_HEAD.find_iter(code).count()
}

pub fn raise_count(code: &str) -> usize {
    RAISE_LINE.find_iter(code).count()
}

pub fn return_none_count(code: &str) -> usize {
    RETURN_NONE_LINE.find_iter(code).count()
}

pub fn magic_number_count(code: &str) -> usize {
    let scrubbed = scrub_strings_and_comments(code);
    NUMBER
        .find_iter(&scrubbed)
        .filter(|m| {
            !matches!(
                m.as_str().parse::<f64>(),
                Ok(v) if v == 0.0 || v == 1.0 || v == 2.0
            )
        })
        .count()
}

/// `(single, double)` quoted string counts, triple-quoted literals removed.
pub fn quote_counts(code: &str) -> (usize, usize) {
    let stripped = TRIPLE_DOUBLE.replace_all(code, "");
    let stripped = TRIPLE_SINGLE.replace_all(&stripped, "");
    (
        SINGLE_QUOTED.find_iter(&stripped).count(),
        DOUBLE_QUOTED.find_iter(&stripped).count(),
    )
}

/// Blanks out string literals and comments so numbers inside them are not
/// mistaken for code.
pub fn scrub_strings_and_comments(code: &str) -> String {
    STRING_OR_COMMENT
        .replace_all(code, |caps: &regex::Captures<'_>| {
            caps[0]
                .chars()
                .map(|c| if c == '\n' { '\n' } else { ' ' })
                .collect::<String>()
        })
        .into_owned()
}

// ----------------------------------------------------------------------
// Textual facts (identical on both paths)
// ----------------------------------------------------------------------

pub fn code_lines(code: &str) -> usize {
    code.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count()
}

pub fn comment_count(code: &str) -> usize {
    COMMENT.find_iter(code).count()
}

pub fn comment_and_docstring_lines(code: &str) -> usize {
    let docstring_lines: usize = DOCSTRING_BLOCK
        .find_iter(code)
        .map(|m| m.as_str().matches('\n').count() + 1)
        .sum();
    comment_count(code) + docstring_lines
}

pub fn percent_format_count(code: &str) -> usize {
    PERCENT_FORMAT.find_iter(code).count()
}

pub fn trailing_comma_count(code: &str) -> usize {
    TRAILING_COMMA.find_iter(code).count()
}

pub fn missing_trailing_comma_count(code: &str) -> usize {
    MISSING_TRAILING_COMMA.find_iter(code).count()
}

/// `(is None + is not None, == None + != None)`.
pub fn none_comparison_counts(code: &str) -> (usize, usize) {
    (
        IS_NONE.find_iter(code).count() + IS_NOT_NONE.find_iter(code).count(),
        EQ_NONE.find_iter(code).count() + NEQ_NONE.find_iter(code).count(),
    )
}

pub fn constant_definition_count(code: &str) -> usize {
    CONSTANT_DEF.find_iter(code).count()
}

/// `(absolute, relative)` import line counts.
pub fn import_counts(code: &str) -> (usize, usize) {
    (
        ABSOLUTE_IMPORT.find_iter(code).count(),
        RELATIVE_IMPORT.find_iter(code).count(),
    )
}

pub fn map_filter_count(code: &str) -> usize {
    MAP_FILTER.find_iter(code).count()
}

pub fn isinstance_count(code: &str) -> usize {
    ISINSTANCE.find_iter(code).count()
}

pub fn explicit_loop_lines(code: &str) -> usize {
    code.split('\n')
        .filter(|line| EXPLICIT_LOOP.is_match(line.trim()))
        .count()
}

/// `(list, dict, generator)` counts from the loose, `in`-less patterns.
pub fn loose_comprehension_counts(code: &str) -> (usize, usize, usize) {
    (
        LOOSE_LIST_COMP.find_iter(code).count(),
        LOOSE_DICT_COMP.find_iter(code).count(),
        LOOSE_GENERATOR.find_iter(code).count(),
    )
}

/// Whether `name(` appears as a call anywhere in the text.
pub fn calls_builtin(code: &str, name: &str) -> bool {
    let needle = format!(r"\b{}\s*\(", regex::escape(name));
    Regex::new(&needle)
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}

pub fn typing_import_anywhere(code: &str) -> bool {
    TYPING_IMPORT_ANYWHERE.is_match(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_counts_on_broken_code() {
        let code = "def a(x:\n    return [i for i in x]\nclass B:\n    pass\nfor i in range(3) print(i)\n";
        assert_eq!(function_count(code), 1);
        assert_eq!(class_count(code), 1);
        assert_eq!(loop_count(code), 1);
        assert_eq!(comprehension_counts(code).0, 1);
    }

    #[test]
    fn test_loop_count_skips_inline_comprehensions() {
        let code = "xs = [i for i in y]\nfor i in xs:\n    pass\nwhile True:\n";
        assert_eq!(loop_count(code), 2);
    }

    #[test]
    fn test_complex_types_require_typing_import() {
        assert_eq!(complex_type_count("x: List[int] = []"), 0);
        assert_eq!(
            complex_type_count("from typing import List, Dict\nx: List[int] = {}\n"),
            3
        );
    }

    #[test]
    fn test_trailing_comma_patterns() {
        let code = "x = [\n    1,\n    2,\n]\ny = [\n    3\n]\n";
        assert_eq!(trailing_comma_count(code), 1);
        assert_eq!(missing_trailing_comma_count(code), 1);
    }

    #[test]
    fn test_none_comparisons() {
        let code = "if a is None or b is not None:\n    pass\nif c == None or d != None:\n    pass\n";
        assert_eq!(none_comparison_counts(code), (2, 2));
    }

    #[test]
    fn test_imports() {
        let code = "import os\nfrom typing import List\nfrom . import sibling\nfrom ..pkg import x\n";
        assert_eq!(import_counts(code), (2, 2));
    }

    #[test]
    fn test_magic_numbers_ignore_strings_and_comments() {
        let code = "x = 42 # 99\ny = '7'\nz = 1 + 2.0\nw = 3.5\n";
        assert_eq!(magic_number_count(code), 2);
    }

    #[test]
    fn test_quote_counts_skip_triple_quoted() {
        let code = "\"\"\"doc 'x'\"\"\"\na = 'one'\nb = \"two\"\nc = \"three\"\n";
        assert_eq!(quote_counts(code), (1, 2));
    }

    #[test]
    fn test_returns_per_function() {
        let code = "def a(x):\n    if x:\n        return 1\n    return 2\ndef b():\n    pass\n";
        assert_eq!(returns_per_function(code), vec![2, 0]);
    }

    #[test]
    fn test_code_lines_and_comments() {
        let code = "# header\nx = 1  # trailing\n\n\"\"\"doc\nmore\"\"\"\n";
        assert_eq!(code_lines(code), 3);
        assert_eq!(comment_count(code), 2);
        assert_eq!(comment_and_docstring_lines(code), 4);
    }

    #[test]
    fn test_identifiers_from_signatures_and_assignments() {
        let names = identifiers("def doThing(first_arg, *rest, key: int = 1):\n    total_sum = 0\n");
        assert_eq!(names, vec!["doThing", "first_arg", "rest", "key", "total_sum"]);
    }
}
