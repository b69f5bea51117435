//! Answer extraction from raw completions.
//!
//! A completion may carry a reasoning section closed by `</think>` and an
//! answer wrapped in `<answer>...</answer>`, optionally inside a fenced
//! Python block. Extraction never fails loudly: any layout it cannot pair
//! up yields `None`.

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const ANSWER_OPEN: &str = "<answer>";
pub const ANSWER_CLOSE: &str = "</answer>";

const FENCE_OPEN: &str = "```python\n";
const FENCE_CLOSE: &str = "\n```";
const ANSWER_PREFIX: &str = "answer=";

/// Extract the answer between the default `<answer>` delimiters.
pub fn extract_answer(text: &str) -> Option<String> {
    extract_delimited(text, ANSWER_OPEN, ANSWER_CLOSE)
}

/// Extract the answer between `prefix` and `suffix`.
///
/// Only text after the last `</think>` is considered. Among the segments
/// produced by splitting on `prefix`, the last one that contains `suffix`
/// wins; the segment before the first `prefix` takes part in that search.
pub fn extract_delimited(text: &str, prefix: &str, suffix: &str) -> Option<String> {
    let response = match text.rfind(THINK_CLOSE) {
        Some(idx) => &text[idx + THINK_CLOSE.len()..],
        None => text,
    };
    if prefix.is_empty() || !response.contains(prefix) {
        return None;
    }

    let segments: Vec<&str> = response.split(prefix).collect();
    let segment = segments
        .into_iter()
        .rev()
        .find(|segment| segment.contains(suffix))?;
    let segment = segment.strip_prefix(ANSWER_PREFIX).unwrap_or(segment);

    let answer = match segment.rfind(FENCE_OPEN) {
        Some(idx) => {
            let fenced = &segment[idx + FENCE_OPEN.len()..];
            fenced.split(FENCE_CLOSE).next().unwrap_or(fenced)
        }
        None => segment.split(suffix).next().unwrap_or(segment),
    };
    Some(answer.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_answer() {
        assert_eq!(
            extract_answer("<think>hm</think><answer>42</answer>").as_deref(),
            Some("42")
        );
    }

    #[test]
    fn test_missing_delimiters_yield_none() {
        assert_eq!(extract_answer("no tags at all"), None);
        assert_eq!(extract_answer("<answer>never closed"), None);
        assert_eq!(extract_answer("<answer>x</answer></think>"), None);
    }

    #[test]
    fn test_only_text_after_last_think_close_counts() {
        let text = "<think><answer>a</answer></think>more</think><answer>b</answer>";
        assert_eq!(extract_answer(text).as_deref(), Some("b"));
    }

    #[test]
    fn test_retreats_to_last_closed_segment() {
        let text = "<answer>first</answer> <answer>dangling";
        assert_eq!(extract_answer(text).as_deref(), Some("first"));
    }

    #[test]
    fn test_leading_segment_takes_part_in_retreat() {
        assert_eq!(
            extract_answer("a </answer> b <answer> c").as_deref(),
            Some("a ")
        );
    }

    #[test]
    fn test_answer_prefix_is_stripped() {
        assert_eq!(
            extract_answer("<answer>answer=7</answer>").as_deref(),
            Some("7")
        );
    }

    #[test]
    fn test_fenced_python_block() {
        let text = "<answer>Here:\n```python\nx = 1\n```\n</answer>";
        assert_eq!(extract_answer(text).as_deref(), Some("x = 1"));

        let two = "<answer>```python\nold\n``` then ```python\nnew\n```</answer>";
        assert_eq!(extract_answer(two).as_deref(), Some("new"));
    }

    #[test]
    fn test_custom_delimiters() {
        assert_eq!(
            extract_delimited("[[x]] and [[y]]", "[[", "]]").as_deref(),
            Some("y")
        );
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let text = "<think>t</think><answer>for i in range(3): pass</answer>";
        assert_eq!(extract_answer(text), extract_answer(text));
    }

    #[test]
    fn test_self_overlapping_delimiter_splits_left_to_right() {
        // "a###b|" splits on "##" as ["a", "#b|"].
        assert_eq!(
            extract_delimited("a###b|", "##", "|").as_deref(),
            Some("#b")
        );
    }
}
