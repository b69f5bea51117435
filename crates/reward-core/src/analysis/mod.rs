//! Code feature analysis.
//!
//! A small Python front end (tokenizer, recursive-descent parser, owned
//! tree) plus the pattern-based fallback used for code that does not parse.
//! Rules only talk to [`CodeAnalyzer`]; prose rules use [`text`].

pub mod ast;
pub mod fallback;
pub mod features;
pub mod lexer;
pub mod parser;
pub mod text;
pub mod walk;

pub use features::{CodeAnalyzer, CodeFeatures, ComprehensionCounts, TypeHintCounts};
pub use parser::{parse_module, ParseError, ParsedSource};
