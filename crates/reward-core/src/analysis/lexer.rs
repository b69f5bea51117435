//! Python tokenizer.
//!
//! Produces the token stream the parser consumes, following the layout rules
//! of the reference tokenizer: INDENT/DEDENT from leading whitespace, NEWLINE
//! only at the end of logical lines, implicit joining inside brackets and
//! explicit joining with a trailing backslash. Comments are collected on the
//! side so the analyzer can count them without re-scanning the text.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Number,
    Str,
    Op,
    Newline,
    Indent,
    Dedent,
    EndMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStyle {
    Single,
    Double,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringToken {
    /// Lower-cased literal prefix (`""`, `"f"`, `"rb"`, ...).
    pub prefix: String,
    pub quote: QuoteStyle,
    pub triple: bool,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub string: Option<StringToken>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    pub tokens: Vec<Token>,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },

    #[error("line {line}: unexpected character {ch:?}")]
    UnexpectedChar { line: usize, ch: char },

    #[error("line {line}: unindent does not match any outer indentation level")]
    InconsistentDedent { line: usize },

    #[error("line {line}: unmatched {ch:?}")]
    UnmatchedBracket { line: usize, ch: char },

    #[error("bracket opened on line {line} is never closed")]
    UnclosedBracket { line: usize },
}

const STRING_PREFIXES: [&str; 8] = ["r", "u", "f", "b", "br", "rb", "fr", "rf"];

const THREE_CHAR_OPS: [&str; 5] = ["**=", "//=", ">>=", "<<=", "..."];

const TWO_CHAR_OPS: [&str; 19] = [
    "==", "!=", "<=", ">=", "->", "**", "//", "<<", ">>", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "@=", ":=",
];

const ONE_CHAR_OPS: &str = "+-*/%@&|^~<>()[]{},:.;=";

/// Tokenize Python source.
pub fn tokenize(source: &str) -> Result<TokenStream, LexError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indents: Vec<usize>,
    brackets: Vec<(char, usize)>,
    out: TokenStream,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            brackets: Vec::new(),
            out: TokenStream::default(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, text: String) {
        self.out.tokens.push(Token {
            kind,
            text,
            line: self.line,
            string: None,
        });
    }

    fn run(mut self) -> Result<TokenStream, LexError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start {
                if self.skip_blank_line() {
                    continue;
                }
                self.indent()?;
                at_line_start = false;
            }

            let c = self.chars[self.pos];
            match c {
                ' ' | '\t' | '\x0c' | '\r' => self.pos += 1,
                '\n' => {
                    self.pos += 1;
                    if self.brackets.is_empty() {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                '#' => self.comment(),
                '\\' => self.line_join()?,
                '"' | '\'' => self.string(String::new())?,
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => self.number(),
                c if c.is_ascii_digit() => self.number(),
                c if is_ident_start(c) => self.name()?,
                _ => self.operator()?,
            }
        }

        if let Some(&(_, line)) = self.brackets.last() {
            return Err(LexError::UnclosedBracket { line });
        }
        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, String::new());
        }
        self.push(TokenKind::EndMarker, String::new());
        Ok(self.out)
    }

    /// Consumes a blank or comment-only physical line. Such lines never
    /// produce layout tokens.
    fn skip_blank_line(&mut self) -> bool {
        let mut i = self.pos;
        while let Some(c) = self.chars.get(i) {
            if matches!(c, ' ' | '\t' | '\x0c' | '\r') {
                i += 1;
            } else {
                break;
            }
        }
        match self.chars.get(i) {
            None => {
                self.pos = i;
                true
            }
            Some('\n') => {
                self.pos = i + 1;
                self.line += 1;
                true
            }
            Some('#') => {
                self.pos = i;
                self.comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                true
            }
            Some(_) => false,
        }
    }

    fn indent(&mut self) -> Result<(), LexError> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }

        let top = self.indents.last().copied().unwrap_or(0);
        if width > top {
            self.indents.push(width);
            self.push(TokenKind::Indent, String::new());
        } else if width < top {
            while self.indents.last().is_some_and(|&level| level > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent, String::new());
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(LexError::InconsistentDedent { line: self.line });
            }
        }
        Ok(())
    }

    fn push_newline(&mut self) {
        let needed = self.out.tokens.last().is_some_and(|t| {
            !matches!(
                t.kind,
                TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent
            )
        });
        if needed {
            self.push(TokenKind::Newline, String::new());
        }
    }

    fn comment(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        self.out.comments.push(Comment {
            line: self.line,
            text: text.trim_end_matches('\r').to_string(),
        });
    }

    fn line_join(&mut self) -> Result<(), LexError> {
        match (self.peek_at(1), self.peek_at(2)) {
            (Some('\n'), _) => self.pos += 2,
            (Some('\r'), Some('\n')) => self.pos += 3,
            _ => {
                return Err(LexError::UnexpectedChar {
                    line: self.line,
                    ch: '\\',
                })
            }
        }
        self.line += 1;
        Ok(())
    }

    fn name(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();

        let lowered = text.to_lowercase();
        if matches!(self.peek(), Some('"') | Some('\'')) && STRING_PREFIXES.contains(&lowered.as_str())
        {
            return self.string(lowered);
        }
        self.push(TokenKind::Name, text);
        Ok(())
    }

    fn number(&mut self) {
        let start = self.pos;
        let hex = self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X'));
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '+' || c == '-')
                && !hex
                && matches!(self.chars.get(self.pos.wrapping_sub(1)), Some('e') | Some('E'));
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        self.push(TokenKind::Number, text);
    }

    fn string(&mut self, prefix: String) -> Result<(), LexError> {
        let start_line = self.line;
        let quote_char = self.chars[self.pos];
        let triple = self.peek_at(1) == Some(quote_char) && self.peek_at(2) == Some(quote_char);
        let delimiter_len = if triple { 3 } else { 1 };
        self.pos += delimiter_len;
        let body_start = self.pos;

        loop {
            let Some(c) = self.peek() else {
                return Err(LexError::UnterminatedString { line: start_line });
            };
            match c {
                '\\' => {
                    if self.peek_at(1) == Some('\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                '\n' => {
                    if !triple {
                        return Err(LexError::UnterminatedString { line: start_line });
                    }
                    self.line += 1;
                    self.pos += 1;
                }
                c if c == quote_char => {
                    if !triple
                        || (self.peek_at(1) == Some(quote_char)
                            && self.peek_at(2) == Some(quote_char))
                    {
                        break;
                    }
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }

        let body: String = self.chars[body_start..self.pos].iter().collect();
        self.pos += delimiter_len;

        let quotes: String = std::iter::repeat(quote_char).take(delimiter_len).collect();
        self.out.tokens.push(Token {
            kind: TokenKind::Str,
            text: format!("{prefix}{quotes}{body}{quotes}"),
            line: start_line,
            string: Some(StringToken {
                prefix,
                quote: if quote_char == '\'' {
                    QuoteStyle::Single
                } else {
                    QuoteStyle::Double
                },
                triple,
                body,
            }),
        });
        Ok(())
    }

    fn operator(&mut self) -> Result<(), LexError> {
        let rest: String = self.chars[self.pos..(self.pos + 3).min(self.chars.len())]
            .iter()
            .collect();

        for op in THREE_CHAR_OPS {
            if rest.starts_with(op) {
                self.pos += 3;
                self.push(TokenKind::Op, op.to_string());
                return Ok(());
            }
        }
        for op in TWO_CHAR_OPS {
            if rest.starts_with(op) {
                self.pos += 2;
                self.push(TokenKind::Op, op.to_string());
                return Ok(());
            }
        }

        let c = self.chars[self.pos];
        if !ONE_CHAR_OPS.contains(c) {
            return Err(LexError::UnexpectedChar { line: self.line, ch: c });
        }
        match c {
            '(' | '[' | '{' => self.brackets.push((c, self.line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match self.brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Err(LexError::UnmatchedBracket { line: self.line, ch: c }),
                }
            }
            _ => {}
        }
        self.pos += 1;
        self.push(TokenKind::Op, c.to_string());
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize")
            .tokens
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_indent_and_dedent_are_balanced() {
        let got = kinds("if x:\n    y = 1\nz = 2\n");
        let indents = got.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = got.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
        assert_eq!(got.last(), Some(&TokenKind::EndMarker));
    }

    #[test]
    fn test_blank_and_comment_lines_emit_no_layout() {
        let stream = tokenize("x = 1\n\n    # note\ny = 2\n").expect("tokenize");
        assert!(!stream.tokens.iter().any(|t| t.kind == TokenKind::Indent));
        assert_eq!(stream.comments.len(), 1);
        assert_eq!(stream.comments[0].text, "# note");
        assert_eq!(stream.comments[0].line, 3);
    }

    #[test]
    fn test_brackets_join_lines() {
        let got = kinds("x = [\n    1,\n    2,\n]\n");
        let newlines = got.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_string_prefixes_and_quotes() {
        let stream = tokenize("a = f'{x}'\nb = rb\"raw\"\nc = '''doc'''\n").expect("tokenize");
        let strings: Vec<&StringToken> = stream
            .tokens
            .iter()
            .filter_map(|t| t.string.as_ref())
            .collect();
        assert_eq!(strings.len(), 3);
        assert_eq!(strings[0].prefix, "f");
        assert_eq!(strings[0].quote, QuoteStyle::Single);
        assert_eq!(strings[1].prefix, "rb");
        assert_eq!(strings[1].quote, QuoteStyle::Double);
        assert!(strings[2].triple);
        assert_eq!(strings[2].body, "doc");
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let stream = tokenize("s = '# not a comment'\n").expect("tokenize");
        assert!(stream.comments.is_empty());
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert_eq!(
            tokenize("x = 'abc\n").unwrap_err(),
            LexError::UnterminatedString { line: 1 }
        );
    }

    #[test]
    fn test_unbalanced_brackets_are_errors() {
        assert!(matches!(
            tokenize("x = (1, 2\n"),
            Err(LexError::UnclosedBracket { line: 1 })
        ));
        assert!(matches!(
            tokenize("x = [1, 2)\n"),
            Err(LexError::UnmatchedBracket { .. })
        ));
    }

    #[test]
    fn test_inconsistent_dedent_is_an_error() {
        assert!(matches!(
            tokenize("if x:\n        y = 1\n    z = 2\n"),
            Err(LexError::InconsistentDedent { line: 3 })
        ));
    }

    #[test]
    fn test_exponent_numbers_stay_whole() {
        let stream = tokenize("x = 1e-3 + 0x1F\n").expect("tokenize");
        let numbers: Vec<&str> = stream
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(numbers, vec!["1e-3", "0x1F"]);
    }
}
