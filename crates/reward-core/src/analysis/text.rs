//! Prose-level measurements for the non-code rules.

use once_cell::sync::Lazy;
use regex::Regex;

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static pattern compiles")
}

const PUNCTUATION: [char; 6] = ['.', ',', ';', ':', '!', '?'];

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| pattern(r"[.!?]\s*(?:[A-Z]|$)"));
static FORMAL_SENTENCE: Lazy<Regex> = Lazy::new(|| pattern(r"[.!?]\s+[A-Z]"));
static HEADER: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^#{1,6}\s+.+$"));
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| pattern(r"\*\*[^*]+\*\*"));
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| pattern(r"__[^_]+__"));
static ITALIC_STAR: Lazy<Regex> = Lazy::new(|| pattern(r"\*[^*]+\*"));
static ITALIC_UNDERSCORE: Lazy<Regex> = Lazy::new(|| pattern(r"_[^_]+_"));
static BULLET_ITEM: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*[-*]\s+.+$"));
static NUMBERED_ITEM: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*\d+\.\s+.+$"));
static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| pattern(r"(?s)```[^`]*```"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| pattern(r"`[^`]+`"));
static TOKEN_PIECE: Lazy<Regex> = Lazy::new(|| pattern(r"[A-Za-z]+|[0-9]|\s+|[^A-Za-z0-9\s]"));

/// Periods, commas, semicolons, colons, exclamation and question marks.
pub fn punctuation_count(text: &str) -> usize {
    text.chars().filter(|c| PUNCTUATION.contains(c)).count()
}

/// Terminal punctuation followed by a capital letter or the end of text.
pub fn sentence_endings(text: &str) -> usize {
    SENTENCE_END.find_iter(text).count()
}

/// Terminal punctuation, whitespace, then a capitalised word.
pub fn formal_sentence_starts(text: &str) -> usize {
    FORMAL_SENTENCE.find_iter(text).count()
}

pub fn header_count(text: &str) -> usize {
    HEADER.find_iter(text).count()
}

/// Bulleted plus numbered list items.
pub fn list_item_count(text: &str) -> usize {
    BULLET_ITEM.find_iter(text).count() + NUMBERED_ITEM.find_iter(text).count()
}

/// Every markdown construct, counted per pattern; overlapping constructs
/// (bold also matches italic) are counted once per pattern they match.
pub fn markdown_element_count(text: &str) -> usize {
    header_count(text)
        + BOLD_STARS.find_iter(text).count()
        + BOLD_UNDERSCORES.find_iter(text).count()
        + ITALIC_STAR.find_iter(text).count()
        + ITALIC_UNDERSCORE.find_iter(text).count()
        + list_item_count(text)
        + FENCED_BLOCK.find_iter(text).count()
        + INLINE_CODE.find_iter(text).count()
}

pub fn is_valid_json(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text.trim()).is_ok()
}

/// Deterministic stand-in for a subword tokenizer.
///
/// Runs of letters are split every four characters, every digit and every
/// punctuation mark is one token, and a whitespace run attaches to the token
/// that follows it.
pub fn approx_token_count(text: &str) -> usize {
    TOKEN_PIECE
        .find_iter(text)
        .map(|piece| {
            let s = piece.as_str();
            if s.chars().next().is_some_and(char::is_whitespace) {
                0
            } else if s.chars().all(|c| c.is_ascii_alphabetic()) {
                s.len().div_ceil(4)
            } else {
                1
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_and_sentences() {
        let text = "Hello, world. This is fine! ok";
        assert_eq!(punctuation_count(text), 3);
        assert_eq!(sentence_endings(text), 1);
        assert_eq!(sentence_endings("Done."), 1);
        assert_eq!(formal_sentence_starts(text), 1);
    }

    #[test]
    fn test_markdown_counts() {
        let text = "# Title\n\n- one\n- two\n1. first\n\nsome `code` here";
        assert_eq!(header_count(text), 1);
        assert_eq!(list_item_count(text), 3);
        assert_eq!(markdown_element_count(text), 5);
    }

    #[test]
    fn test_json_validity() {
        assert!(is_valid_json("  {\"a\": [1, 2]}  "));
        assert!(!is_valid_json("{a: 1}"));
    }

    #[test]
    fn test_approx_token_count() {
        assert_eq!(approx_token_count(""), 0);
        assert_eq!(approx_token_count("def"), 1);
        assert_eq!(approx_token_count("hello world"), 4);
        assert_eq!(approx_token_count("x = 42"), 4);
    }
}
