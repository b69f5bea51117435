//! Recursive-descent parser for Python source.
//!
//! Covers the statement and expression grammar model output actually uses
//! (definitions, control flow, comprehensions, lambdas, f-strings as opaque
//! literals, decorators, walrus, slices, star-unpacking, `match` and `type`
//! soft keywords). Constructs outside that grammar (type parameters on `def`
//! and `class`, Python 2 print statements) are reported as syntax errors,
//! which routes the analyzer to its pattern-based fallback.

use super::ast::{
    Alias, BoolOp, ClassDef, CmpOp, Comprehension, Constant, ExceptHandler, Expr, FunctionDef,
    Keyword, MatchCase, Module, Param, Parameters, Stmt, StmtKind, StrLiteral, StrPart, UnaryOp,
    WithItem,
};
use super::lexer::{tokenize, Comment, LexError, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

/// A successfully parsed source file plus the comments the tokenizer saw.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSource {
    pub module: Module,
    pub comments: Vec<Comment>,
}

/// Parse a complete Python module.
pub fn parse_module(source: &str) -> Result<ParsedSource, ParseError> {
    let stream = tokenize(source)?;
    let mut parser = Parser {
        tokens: &stream.tokens,
        pos: 0,
    };
    let body = parser.file()?;
    Ok(ParsedSource {
        module: Module { body },
        comments: stream.comments,
    })
}

const KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const AUGMENTED_OPS: [&str; 13] = [
    "+=", "-=", "*=", "/=", "//=", "%=", "@=", "&=", "|=", "^=", ">>=", "<<=", "**=",
];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

type PResult<T> = Result<T, ParseError>;

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &'t Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &'t Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + n).min(last)]
    }

    fn bump(&mut self) -> &'t Token {
        let tok = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_kind(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_op(&self, op: &str) -> bool {
        let tok = self.peek();
        tok.kind == TokenKind::Op && tok.text == op
    }

    fn at_kw(&self, kw: &str) -> bool {
        let tok = self.peek();
        tok.kind == TokenKind::Name && tok.text == kw
    }

    fn nth_is_kw(&self, n: usize, kw: &str) -> bool {
        let tok = self.peek_nth(n);
        tok.kind == TokenKind::Name && tok.text == kw
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{op}'"))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            self.error(format!("expected '{kw}'"))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        let tok = self.peek();
        if tok.kind == TokenKind::Name && !is_keyword(&tok.text) {
            self.pos += 1;
            Ok(tok.text.clone())
        } else {
            self.error("expected an identifier")
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        let tok = self.peek();
        let near = match tok.kind {
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::EndMarker => "end of input".to_string(),
            _ => format!("'{}'", tok.text),
        };
        Err(ParseError::Syntax {
            line: tok.line,
            message: format!("{} near {near}", message.into()),
        })
    }

    fn at_comp_for(&self) -> bool {
        self.at_kw("for") || (self.at_kw("async") && self.nth_is_kw(1, "for"))
    }

    fn at_simple_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Newline | TokenKind::EndMarker) || self.at_op(";")
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn file(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.at_kind(TokenKind::EndMarker) {
            if self.at_kind(TokenKind::Newline) {
                self.pos += 1;
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        if self.at_op("@") {
            return Ok(vec![self.decorated()?]);
        }
        let tok = self.peek();
        if tok.kind == TokenKind::Indent {
            return self.error("unexpected indent");
        }
        if tok.kind == TokenKind::Name {
            if tok.text == "match" {
                if let Some(stmt) = self.match_stmt()? {
                    return Ok(vec![stmt]);
                }
            }
            let compound = match tok.text.as_str() {
                "def" | "class" | "if" | "while" | "for" | "try" | "with" => true,
                "async" => ["def", "for", "with"]
                    .iter()
                    .any(|kw| self.nth_is_kw(1, kw)),
                _ => false,
            };
            if compound {
                return Ok(vec![self.compound()?]);
            }
        }
        self.simple_statements()
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.at_kind(TokenKind::Newline) {
            return self.simple_statements();
        }
        self.pos += 1;
        if !self.at_kind(TokenKind::Indent) {
            return self.error("expected an indented block");
        }
        self.pos += 1;

        let mut body = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Dedent => {
                    self.pos += 1;
                    break;
                }
                TokenKind::EndMarker => return self.error("unterminated block"),
                TokenKind::Newline => self.pos += 1,
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn compound(&mut self) -> PResult<Stmt> {
        let line = self.peek().line;
        let keyword = self.peek().text.as_str();
        match keyword {
            "def" => self.function_def(Vec::new(), false),
            "class" => self.class_def(Vec::new()),
            "if" => {
                self.pos += 1;
                self.if_rest(line)
            }
            "while" => {
                self.pos += 1;
                let test = self.namedexpr_test()?;
                let body = self.block()?;
                let orelse = self.else_block()?;
                Ok(Stmt {
                    line,
                    kind: StmtKind::While { test, body, orelse },
                })
            }
            "for" => self.for_stmt(false),
            "try" => self.try_stmt(),
            "with" => self.with_stmt(false),
            "async" => {
                self.pos += 1;
                if self.at_kw("def") {
                    self.function_def(Vec::new(), true)
                } else if self.at_kw("for") {
                    self.for_stmt(true)
                } else {
                    self.with_stmt(true)
                }
            }
            _ => self.error("expected a compound statement"),
        }
    }

    /// `match` is a soft keyword: the line is a match statement only when it
    /// reads `match <subject>:` and opens an indented block of `case`s.
    fn match_stmt(&mut self) -> PResult<Option<Stmt>> {
        let save = self.pos;
        let line = self.peek().line;
        self.pos += 1;
        let subject = match self.star_expressions() {
            Ok(subject) => subject,
            Err(_) => {
                self.pos = save;
                return Ok(None);
            }
        };
        let opens_cases = self.at_op(":")
            && self.peek_nth(1).kind == TokenKind::Newline
            && self.peek_nth(2).kind == TokenKind::Indent
            && self.nth_is_kw(3, "case");
        if !opens_cases {
            self.pos = save;
            return Ok(None);
        }
        self.pos += 3;

        let mut cases = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Dedent => {
                    self.pos += 1;
                    break;
                }
                TokenKind::EndMarker => return self.error("unterminated match block"),
                TokenKind::Newline => self.pos += 1,
                _ => cases.push(self.match_case()?),
            }
        }
        Ok(Some(Stmt {
            line,
            kind: StmtKind::Match { subject, cases },
        }))
    }

    fn match_case(&mut self) -> PResult<MatchCase> {
        self.expect_kw("case")?;
        let pattern = self.patterns()?;
        let guard = if self.eat_kw("if") {
            Some(self.namedexpr_test()?)
        } else {
            None
        };
        let body = self.block()?;
        Ok(MatchCase {
            pattern,
            guard,
            body,
        })
    }

    fn patterns(&mut self) -> PResult<Expr> {
        let first = self.pattern()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op(":") || self.at_kw("if") {
                break;
            }
            elts.push(self.pattern()?);
        }
        Ok(Expr::Tuple(elts))
    }

    fn pattern(&mut self) -> PResult<Expr> {
        let pattern = if self.eat_op("*") {
            Expr::Starred(Box::new(self.bitor()?))
        } else {
            self.or_test()?
        };
        if self.eat_kw("as") {
            let name = self.expect_name()?;
            return Ok(Expr::NamedExpr {
                target: Box::new(Expr::Name(name)),
                value: Box::new(pattern),
            });
        }
        Ok(pattern)
    }

    fn else_block(&mut self) -> PResult<Vec<Stmt>> {
        if self.eat_kw("else") {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn if_rest(&mut self, line: usize) -> PResult<Stmt> {
        let test = self.namedexpr_test()?;
        let body = self.block()?;
        let orelse = if self.at_kw("elif") {
            let elif_line = self.peek().line;
            self.pos += 1;
            vec![self.if_rest(elif_line)?]
        } else {
            self.else_block()?
        };
        Ok(Stmt {
            line,
            kind: StmtKind::If { test, body, orelse },
        })
    }

    fn for_stmt(&mut self, is_async: bool) -> PResult<Stmt> {
        let line = self.peek().line;
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.star_expressions()?;
        let body = self.block()?;
        let orelse = self.else_block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                is_async,
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn try_stmt(&mut self) -> PResult<Stmt> {
        let line = self.peek().line;
        self.expect_kw("try")?;
        let body = self.block()?;

        let mut handlers = Vec::new();
        while self.eat_kw("except") {
            self.eat_op("*");
            let (typ, name) = if self.at_op(":") {
                (None, None)
            } else {
                let typ = self.test()?;
                let name = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(typ), name)
            };
            let body = self.block()?;
            handlers.push(ExceptHandler { typ, name, body });
        }

        let orelse = self.else_block()?;
        let finalbody = if self.eat_kw("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return self.error("expected 'except' or 'finally' block");
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    fn with_stmt(&mut self, is_async: bool) -> PResult<Stmt> {
        let line = self.peek().line;
        self.expect_kw("with")?;
        let items = self.with_items()?;
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::With {
                is_async,
                items,
                body,
            },
        })
    }

    fn with_items(&mut self) -> PResult<Vec<WithItem>> {
        if self.at_op("(") {
            let save = self.pos;
            self.pos += 1;
            if let Ok(items) = self.with_item_list(")") {
                if self.eat_op(")") && self.at_op(":") {
                    return Ok(items);
                }
            }
            self.pos = save;
        }
        self.with_item_list(":")
    }

    fn with_item_list(&mut self, closing: &str) -> PResult<Vec<WithItem>> {
        let mut items = vec![self.with_item()?];
        while self.eat_op(",") {
            if self.at_op(closing) {
                break;
            }
            items.push(self.with_item()?);
        }
        Ok(items)
    }

    fn with_item(&mut self) -> PResult<WithItem> {
        let context = self.test()?;
        let target = if self.eat_kw("as") {
            Some(self.bitor()?)
        } else {
            None
        };
        Ok(WithItem { context, target })
    }

    fn decorated(&mut self) -> PResult<Stmt> {
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(self.namedexpr_test()?);
            if !self.at_kind(TokenKind::Newline) {
                return self.error("expected newline after decorator");
            }
            self.pos += 1;
        }
        if self.at_kw("def") {
            self.function_def(decorators, false)
        } else if self.at_kw("class") {
            self.class_def(decorators)
        } else if self.at_kw("async") && self.nth_is_kw(1, "def") {
            self.pos += 1;
            self.function_def(decorators, true)
        } else {
            self.error("expected a definition after decorators")
        }
    }

    fn function_def(&mut self, decorators: Vec<Expr>, is_async: bool) -> PResult<Stmt> {
        let line = self.peek().line;
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parameters(")", true)?;
        self.expect_op(")")?;
        let returns = if self.eat_op("->") {
            Some(self.test()?)
        } else {
            None
        };
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef(FunctionDef {
                name,
                is_async,
                params,
                returns,
                body,
                decorators,
            }),
        })
    }

    fn class_def(&mut self, decorators: Vec<Expr>) -> PResult<Stmt> {
        let line = self.peek().line;
        self.expect_kw("class")?;
        let name = self.expect_name()?;
        let (bases, keywords) = if self.eat_op("(") {
            self.call_args()?
        } else {
            (Vec::new(), Vec::new())
        };
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::ClassDef(ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            }),
        })
    }

    fn parameters(&mut self, closing: &str, annotated: bool) -> PResult<Parameters> {
        let mut params = Parameters::default();
        let mut seen_star = false;
        while !self.at_op(closing) {
            if self.eat_op("/") {
                params.posonly = std::mem::take(&mut params.args);
            } else if self.eat_op("**") {
                params.kwarg = Some(self.param(annotated, false)?);
            } else if self.eat_op("*") {
                seen_star = true;
                if !self.at_op(",") && !self.at_op(closing) {
                    params.vararg = Some(self.param(annotated, false)?);
                }
            } else {
                let param = self.param(annotated, true)?;
                if seen_star {
                    params.kwonly.push(param);
                } else {
                    params.args.push(param);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn param(&mut self, annotated: bool, with_default: bool) -> PResult<Param> {
        let name = self.expect_name()?;
        let annotation = if annotated && self.eat_op(":") {
            Some(self.test()?)
        } else {
            None
        };
        let default = if with_default && self.eat_op("=") {
            Some(self.test()?)
        } else {
            None
        };
        Ok(Param {
            name,
            annotation,
            default,
        })
    }

    fn simple_statements(&mut self) -> PResult<Vec<Stmt>> {
        let mut out = vec![self.small_statement()?];
        while self.eat_op(";") {
            if matches!(self.peek().kind, TokenKind::Newline | TokenKind::EndMarker) {
                break;
            }
            out.push(self.small_statement()?);
        }
        match self.peek().kind {
            TokenKind::Newline => self.pos += 1,
            TokenKind::EndMarker => {}
            _ => return self.error("invalid syntax"),
        }
        Ok(out)
    }

    fn small_statement(&mut self) -> PResult<Stmt> {
        let line = self.peek().line;
        let word = if self.at_kind(TokenKind::Name) {
            self.peek().text.as_str()
        } else {
            ""
        };

        let kind = match word {
            "pass" => {
                self.pos += 1;
                StmtKind::Pass
            }
            "break" => {
                self.pos += 1;
                StmtKind::Break
            }
            "continue" => {
                self.pos += 1;
                StmtKind::Continue
            }
            "return" => {
                self.pos += 1;
                let value = if self.at_simple_end() {
                    None
                } else {
                    Some(self.star_expressions()?)
                };
                StmtKind::Return(value)
            }
            "raise" => {
                self.pos += 1;
                if self.at_simple_end() {
                    StmtKind::Raise {
                        exc: None,
                        cause: None,
                    }
                } else {
                    let exc = self.test()?;
                    let cause = if self.eat_kw("from") {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise {
                        exc: Some(exc),
                        cause,
                    }
                }
            }
            "global" | "nonlocal" => {
                self.pos += 1;
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                if word == "global" {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            "del" => {
                self.pos += 1;
                match self.star_expressions()? {
                    Expr::Tuple(targets) => StmtKind::Delete(targets),
                    single => StmtKind::Delete(vec![single]),
                }
            }
            "assert" => {
                self.pos += 1;
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            "import" => {
                self.pos += 1;
                let mut names = vec![self.dotted_alias()?];
                while self.eat_op(",") {
                    names.push(self.dotted_alias()?);
                }
                StmtKind::Import(names)
            }
            "from" => self.import_from()?,
            "type" if self.at_type_alias() => self.type_alias()?,
            _ => self.expression_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    /// `type` is a soft keyword: `type Name = ...` or `type Name[...] = ...`.
    fn at_type_alias(&self) -> bool {
        let name = self.peek_nth(1);
        let next = self.peek_nth(2);
        name.kind == TokenKind::Name
            && !is_keyword(&name.text)
            && next.kind == TokenKind::Op
            && (next.text == "=" || next.text == "[")
    }

    fn type_alias(&mut self) -> PResult<StmtKind> {
        self.expect_kw("type")?;
        let name = self.expect_name()?;
        let mut params = Vec::new();
        if self.eat_op("[") {
            loop {
                if !self.eat_op("**") {
                    self.eat_op("*");
                }
                params.push(self.expect_name()?);
                if self.eat_op(":") {
                    self.test()?;
                }
                if !self.eat_op(",") || self.at_op("]") {
                    break;
                }
            }
            self.expect_op("]")?;
        }
        self.expect_op("=")?;
        let value = self.test()?;
        Ok(StmtKind::TypeAlias {
            name: Expr::Name(name),
            params,
            value,
        })
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn dotted_alias(&mut self) -> PResult<Alias> {
        let name = self.dotted_name()?;
        let asname = if self.eat_kw("as") {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn import_from(&mut self) -> PResult<StmtKind> {
        self.expect_kw("from")?;
        let mut level = 0;
        loop {
            if self.eat_op(".") {
                level += 1;
            } else if self.eat_op("...") {
                level += 3;
            } else {
                break;
            }
        }
        let module = if self.at_kw("import") {
            None
        } else {
            Some(self.dotted_name()?)
        };
        if module.is_none() && level == 0 {
            return self.error("expected module name");
        }
        self.expect_kw("import")?;

        let mut names = Vec::new();
        if self.eat_op("*") {
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
            });
        } else {
            let parenthesized = self.eat_op("(");
            loop {
                let name = self.expect_name()?;
                let asname = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                names.push(Alias { name, asname });
                if !self.eat_op(",") {
                    break;
                }
                if parenthesized && self.at_op(")") {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(")")?;
            }
        }
        Ok(StmtKind::ImportFrom {
            module,
            level,
            names,
        })
    }

    fn expression_statement(&mut self) -> PResult<StmtKind> {
        let first = if self.at_kw("yield") {
            self.yield_expr()?
        } else {
            self.star_expressions()?
        };

        if self.eat_op(":") {
            let annotation = self.test()?;
            let value = if self.eat_op("=") {
                Some(self.assign_rhs()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        let tok = self.peek();
        if tok.kind == TokenKind::Op && AUGMENTED_OPS.contains(&tok.text.as_str()) {
            self.pos += 1;
            let value = self.assign_rhs()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op: tok.text.clone(),
                value,
            });
        }

        if self.at_op("=") {
            let mut targets = vec![first];
            loop {
                self.expect_op("=")?;
                let next = self.assign_rhs()?;
                if self.at_op("=") {
                    targets.push(next);
                } else {
                    return Ok(StmtKind::Assign {
                        targets,
                        value: next,
                    });
                }
            }
        }

        Ok(StmtKind::Expr(first))
    }

    fn assign_rhs(&mut self) -> PResult<Expr> {
        if self.at_kw("yield") {
            self.yield_expr()
        } else {
            self.star_expressions()
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn yield_expr(&mut self) -> PResult<Expr> {
        self.expect_kw("yield")?;
        if self.eat_kw("from") {
            return Ok(Expr::YieldFrom(Box::new(self.test()?)));
        }
        if self.at_simple_end() || self.at_op(")") || self.at_op("=") {
            return Ok(Expr::Yield(None));
        }
        Ok(Expr::Yield(Some(Box::new(self.star_expressions()?))))
    }

    fn star_expr(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.bitor()?)))
        } else {
            self.test()
        }
    }

    fn star_expressions(&mut self) -> PResult<Expr> {
        let first = self.star_expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_expression_end() {
                break;
            }
            elts.push(self.star_expr()?);
        }
        Ok(Expr::Tuple(elts))
    }

    fn at_expression_end(&self) -> bool {
        self.at_simple_end()
            || [")", "]", "}", "=", ":"].iter().any(|op| self.at_op(op))
            || AUGMENTED_OPS.iter().any(|op| self.at_op(op))
    }

    fn star_or_named(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.bitor()?)))
        } else {
            self.namedexpr_test()
        }
    }

    fn target_list(&mut self) -> PResult<Expr> {
        let first = self.target()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_kw("in") || self.at_op("=") {
                break;
            }
            elts.push(self.target()?);
        }
        Ok(Expr::Tuple(elts))
    }

    fn target(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.bitor()?)))
        } else {
            self.bitor()
        }
    }

    fn namedexpr_test(&mut self) -> PResult<Expr> {
        let tok = self.peek();
        let next = self.peek_nth(1);
        if tok.kind == TokenKind::Name
            && !is_keyword(&tok.text)
            && next.kind == TokenKind::Op
            && next.text == ":="
        {
            self.pos += 2;
            let value = self.test()?;
            return Ok(Expr::NamedExpr {
                target: Box::new(Expr::Name(tok.text.clone())),
                value: Box::new(value),
            });
        }
        self.test()
    }

    fn test(&mut self) -> PResult<Expr> {
        if self.at_kw("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.eat_kw("if") {
            let test = self.or_test()?;
            self.expect_kw("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn lambda(&mut self) -> PResult<Expr> {
        self.expect_kw("lambda")?;
        let params = self.parameters(":", false)?;
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::Lambda {
            params: Box::new(params),
            body: Box::new(body),
        })
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let first = self.and_test()?;
        if !self.at_kw("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("or") {
            values.push(self.and_test()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::Or,
            values,
        })
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let first = self.not_test()?;
        if !self.at_kw("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("and") {
            values.push(self.not_test()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::And,
            values,
        })
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            let operand = self.not_test()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let tok = self.peek();
        let op = match (tok.kind, tok.text.as_str()) {
            (TokenKind::Op, "==") => CmpOp::Eq,
            (TokenKind::Op, "!=") => CmpOp::NotEq,
            (TokenKind::Op, "<") => CmpOp::Lt,
            (TokenKind::Op, "<=") => CmpOp::LtE,
            (TokenKind::Op, ">") => CmpOp::Gt,
            (TokenKind::Op, ">=") => CmpOp::GtE,
            (TokenKind::Name, "in") => CmpOp::In,
            (TokenKind::Name, "not") if self.nth_is_kw(1, "in") => {
                self.pos += 2;
                return Some(CmpOp::NotIn);
            }
            (TokenKind::Name, "is") => {
                if self.nth_is_kw(1, "not") {
                    self.pos += 2;
                    return Some(CmpOp::IsNot);
                }
                CmpOp::Is
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            comparators.push(self.bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
        })
    }

    fn binary(&mut self, ops: &[&str], next: fn(&mut Self) -> PResult<Expr>) -> PResult<Expr> {
        let mut left = next(self)?;
        loop {
            let tok = self.peek();
            if tok.kind != TokenKind::Op || !ops.contains(&tok.text.as_str()) {
                return Ok(left);
            }
            self.pos += 1;
            let right = next(self)?;
            left = Expr::BinOp {
                left: Box::new(left),
                op: tok.text.clone(),
                right: Box::new(right),
            };
        }
    }

    fn bitor(&mut self) -> PResult<Expr> {
        self.binary(&["|"], Self::bitxor)
    }

    fn bitxor(&mut self) -> PResult<Expr> {
        self.binary(&["^"], Self::bitand)
    }

    fn bitand(&mut self) -> PResult<Expr> {
        self.binary(&["&"], Self::shift)
    }

    fn shift(&mut self) -> PResult<Expr> {
        self.binary(&["<<", ">>"], Self::arith)
    }

    fn arith(&mut self) -> PResult<Expr> {
        self.binary(&["+", "-"], Self::term)
    }

    fn term(&mut self) -> PResult<Expr> {
        self.binary(&["*", "/", "//", "%", "@"], Self::factor)
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = if self.at_op("-") {
            Some(UnaryOp::Neg)
        } else if self.at_op("+") {
            Some(UnaryOp::Pos)
        } else if self.at_op("~") {
            Some(UnaryOp::Invert)
        } else {
            None
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.factor()?;
            return Ok(Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            });
        }
        self.power()
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = if self.eat_kw("await") {
            Expr::Await(Box::new(self.primary()?))
        } else {
            self.primary()?
        };
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Expr::BinOp {
                left: Box::new(base),
                op: "**".to_string(),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, keywords) = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    keywords,
                };
            } else if self.eat_op("[") {
                let slice = self.subscript()?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    slice: Box::new(slice),
                };
            } else if self.eat_op(".") {
                let tok = self.peek();
                if tok.kind != TokenKind::Name {
                    return self.error("expected attribute name");
                }
                self.pos += 1;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr: tok.text.clone(),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> PResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.at_op(")") {
            if self.eat_op("*") {
                args.push(Expr::Starred(Box::new(self.test()?)));
            } else if self.eat_op("**") {
                keywords.push(Keyword {
                    arg: None,
                    value: self.test()?,
                });
            } else if self.at_kind(TokenKind::Name)
                && !is_keyword(&self.peek().text)
                && self.peek_nth(1).kind == TokenKind::Op
                && self.peek_nth(1).text == "="
            {
                let name = self.bump().text.clone();
                self.pos += 1;
                keywords.push(Keyword {
                    arg: Some(name),
                    value: self.test()?,
                });
            } else {
                let value = self.namedexpr_test()?;
                if self.at_comp_for() {
                    let generators = self.comp_for()?;
                    args.push(Expr::GeneratorExp {
                        elt: Box::new(value),
                        generators,
                    });
                } else {
                    args.push(value);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, keywords))
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let first = self.slice_item()?;
        if self.eat_op("]") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            elts.push(self.slice_item()?);
        }
        self.expect_op("]")?;
        Ok(Expr::Tuple(elts))
    }

    fn slice_item(&mut self) -> PResult<Expr> {
        let lower = if self.at_op(":") {
            None
        } else {
            let expr = self.star_or_named()?;
            if !self.at_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":")?;
        let bound_end = |p: &Self| p.at_op(":") || p.at_op("]") || p.at_op(",");
        let upper = if bound_end(self) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !(self.at_op("]") || self.at_op(",")) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn comp_for(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.at_comp_for() {
            let is_async = self.eat_kw("async");
            self.expect_kw("for")?;
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension {
                is_async,
                target,
                iter,
                ifs,
            });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> PResult<Expr> {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Name => {
                let expr = match tok.text.as_str() {
                    "None" => Expr::Constant(Constant::None),
                    "True" => Expr::Constant(Constant::Bool(true)),
                    "False" => Expr::Constant(Constant::Bool(false)),
                    word if is_keyword(word) => return self.error("invalid syntax"),
                    word => Expr::Name(word.to_string()),
                };
                self.pos += 1;
                Ok(expr)
            }
            TokenKind::Number => {
                let constant = match parse_number(&tok.text) {
                    Some(constant) => constant,
                    None => return self.error("invalid number literal"),
                };
                self.pos += 1;
                Ok(Expr::Constant(constant))
            }
            TokenKind::Str => {
                let mut parts = Vec::new();
                while let Some(string) = self.peek().string.as_ref() {
                    parts.push(StrPart {
                        prefix: string.prefix.clone(),
                        quote: string.quote,
                        triple: string.triple,
                        body: string.body.clone(),
                    });
                    self.pos += 1;
                }
                Ok(Expr::Str(StrLiteral { parts }))
            }
            TokenKind::Op => match tok.text.as_str() {
                "(" => {
                    self.pos += 1;
                    self.paren()
                }
                "[" => {
                    self.pos += 1;
                    self.list()
                }
                "{" => {
                    self.pos += 1;
                    self.brace()
                }
                "..." => {
                    self.pos += 1;
                    Ok(Expr::Constant(Constant::Ellipsis))
                }
                _ => self.error("invalid syntax"),
            },
            TokenKind::Indent => self.error("unexpected indent"),
            _ => self.error("invalid syntax"),
        }
    }

    fn paren(&mut self) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        if self.at_kw("yield") {
            let expr = self.yield_expr()?;
            self.expect_op(")")?;
            return Ok(expr);
        }
        let first = self.star_or_named()?;
        if self.at_comp_for() {
            let generators = self.comp_for()?;
            self.expect_op(")")?;
            return Ok(Expr::GeneratorExp {
                elt: Box::new(first),
                generators,
            });
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let elts = self.sequence_rest(first, ")")?;
        Ok(Expr::Tuple(elts))
    }

    fn list(&mut self) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_or_named()?;
        if self.at_comp_for() {
            let generators = self.comp_for()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        let elts = self.sequence_rest(first, "]")?;
        Ok(Expr::List(elts))
    }

    /// Parses `, item, item [,] <closing>` after the first element.
    fn sequence_rest(&mut self, first: Expr, closing: &str) -> PResult<Vec<Expr>> {
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op(closing) {
                break;
            }
            elts.push(self.star_or_named()?);
        }
        self.expect_op(closing)?;
        Ok(elts)
    }

    fn brace(&mut self) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict {
                keys: Vec::new(),
                values: Vec::new(),
            });
        }

        let first_key = if self.eat_op("**") {
            None
        } else {
            let first = self.star_or_named()?;
            if !self.at_op(":") {
                return self.set_rest(first);
            }
            Some(first)
        };

        let first_value = match first_key {
            None => self.bitor()?,
            Some(_) => {
                self.expect_op(":")?;
                self.test()?
            }
        };

        if let (Some(key), true) = (first_key.as_ref(), self.at_comp_for()) {
            let generators = self.comp_for()?;
            self.expect_op("}")?;
            return Ok(Expr::DictComp {
                key: Box::new(key.clone()),
                value: Box::new(first_value),
                generators,
            });
        }

        let mut keys = vec![first_key];
        let mut values = vec![first_value];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            if self.eat_op("**") {
                keys.push(None);
                values.push(self.bitor()?);
            } else {
                keys.push(Some(self.test()?));
                self.expect_op(":")?;
                values.push(self.test()?);
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict { keys, values })
    }

    fn set_rest(&mut self, first: Expr) -> PResult<Expr> {
        if self.at_comp_for() {
            let generators = self.comp_for()?;
            self.expect_op("}")?;
            return Ok(Expr::SetComp {
                elt: Box::new(first),
                generators,
            });
        }
        let elts = self.sequence_rest(first, "}")?;
        Ok(Expr::Set(elts))
    }
}

fn parse_number(text: &str) -> Option<Constant> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();

    if lower.ends_with('j') {
        let mantissa = &lower[..lower.len() - 1];
        return mantissa
            .parse::<f64>()
            .ok()
            .map(|_| Constant::OtherNumber(cleaned.clone()));
    }

    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(digits) = lower.strip_prefix(prefix) {
            if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
                return None;
            }
            return Some(match i64::from_str_radix(digits, radix) {
                Ok(value) => Constant::Int(value),
                Err(_) => Constant::OtherNumber(cleaned.clone()),
            });
        }
    }

    if lower.contains(['.', 'e']) {
        return lower.parse::<f64>().ok().map(Constant::Float);
    }

    if !lower.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(match lower.parse::<i64>() {
        Ok(value) => Constant::Int(value),
        Err(_) => Constant::OtherNumber(cleaned),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        parse_module(source).expect("parse").module
    }

    #[test]
    fn test_parses_function_with_annotations_and_defaults() {
        let module = parse("def add(a: int, b: int = 2, *rest, key=None, **kw) -> int:\n    return a + b\n");
        let StmtKind::FunctionDef(func) = &module.body[0].kind else {
            panic!("expected function def");
        };
        assert_eq!(func.name, "add");
        assert_eq!(func.params.args.len(), 2);
        assert!(func.params.vararg.is_some());
        assert_eq!(func.params.kwonly.len(), 1);
        assert!(func.params.kwarg.is_some());
        assert!(func.returns.is_some());
        assert_eq!(func.params.iter().count(), 5);
    }

    #[test]
    fn test_parses_control_flow_blocks() {
        let source = "\
for i in range(3):
    if i % 2 == 0:
        continue
    elif i is not None:
        pass
    else:
        break
while True:
    try:
        x = 1
    except (ValueError, KeyError) as exc:
        raise RuntimeError('bad') from exc
    finally:
        pass
with open('f') as fh, open('g') as gh:
    data = fh.read()
";
        let module = parse(source);
        assert_eq!(module.body.len(), 3);
        assert!(matches!(module.body[0].kind, StmtKind::For { .. }));
        assert!(matches!(module.body[1].kind, StmtKind::While { .. }));
        let StmtKind::With { items, .. } = &module.body[2].kind else {
            panic!("expected with");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_parses_comprehensions_of_every_kind() {
        let module = parse("a = [x for x in y if x]\nb = {x for x in y}\nc = {k: v for k, v in d.items()}\nd = sum(x for x in y)\n");
        let kinds: Vec<&Expr> = module
            .body
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Assign { value, .. } => value,
                _ => panic!("expected assign"),
            })
            .collect();
        assert!(matches!(kinds[0], Expr::ListComp { .. }));
        assert!(matches!(kinds[1], Expr::SetComp { .. }));
        assert!(matches!(kinds[2], Expr::DictComp { .. }));
        let Expr::Call { args, .. } = kinds[3] else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Expr::GeneratorExp { .. }));
    }

    #[test]
    fn test_parses_expressions_and_literals() {
        let source = "\
x = a if b else c
y = lambda p, q=1: p + q
z = {'a': 1, **other}
w = s[1:2, ::3]
v = not a and b or c
n = (yield)
m = f'{x}' 'tail'
count += -1
first, *rest = items
print(*args, sep='', **kw)
";
        let module = parse(source);
        assert_eq!(module.body.len(), 10);
        let StmtKind::Assign { value, .. } = &module.body[6].kind else {
            panic!("expected assign");
        };
        let Expr::Str(lit) = value else {
            panic!("expected string");
        };
        assert_eq!(lit.parts.len(), 2);
        assert!(lit.is_fstring());
    }

    #[test]
    fn test_parses_imports_and_relative_levels() {
        let module = parse("import os.path as p, sys\nfrom . import x\nfrom ..pkg.mod import (a, b as c,)\nfrom typing import *\n");
        assert!(matches!(&module.body[0].kind, StmtKind::Import(names) if names.len() == 2));
        assert!(matches!(&module.body[1].kind, StmtKind::ImportFrom { level: 1, module: None, .. }));
        assert!(matches!(&module.body[2].kind, StmtKind::ImportFrom { level: 2, names, .. } if names.len() == 2));
    }

    #[test]
    fn test_parses_decorated_class_and_async_def() {
        let module = parse("@dataclass\nclass Point(Base, metaclass=Meta):\n    x: int = 0\n    async def go(self):\n        await self.run()\n");
        let StmtKind::ClassDef(class) = &module.body[0].kind else {
            panic!("expected class");
        };
        assert_eq!(class.decorators.len(), 1);
        assert_eq!(class.bases.len(), 1);
        assert_eq!(class.keywords.len(), 1);
        assert!(matches!(&class.body[1].kind, StmtKind::FunctionDef(f) if f.is_async));
    }

    #[test]
    fn test_one_line_blocks_and_semicolons() {
        let module = parse("for i in range(3): pass\nx = 1; y = 2\n");
        assert_eq!(module.body.len(), 3);
    }

    #[test]
    fn test_rejects_broken_code() {
        for source in [
            "def f(:\n    pass\n",
            "print 'hello'\n",
            "if x\n    y = 1\n",
            "x = = 1\n",
            "for in range(3):\n    pass\n",
            "def f():\nreturn 1\n",
            "    x = 1\n",
        ] {
            assert!(parse_module(source).is_err(), "expected error for {source:?}");
        }
    }

    #[test]
    fn test_parses_match_statement() {
        let source = "\
match command.split():
    case [\"go\", direction] if direction:
        move(direction)
    case {\"x\": x, **rest}:
        pass
    case Point(x=0, y=_) | None:
        pass
    case [first, *others] as whole:
        pass
    case _:
        raise ValueError(command)
";
        let module = parse(source);
        let StmtKind::Match { subject, cases } = &module.body[0].kind else {
            panic!("expected match statement");
        };
        assert!(matches!(subject, Expr::Call { .. }));
        assert_eq!(cases.len(), 5);
        assert!(cases[0].guard.is_some());
        assert!(matches!(cases[2].pattern, Expr::BinOp { .. }));
        assert!(matches!(cases[3].pattern, Expr::NamedExpr { .. }));
        assert_eq!(cases[4].pattern, Expr::Name("_".to_string()));
    }

    #[test]
    fn test_match_and_type_stay_usable_as_names() {
        let module = parse("match = re.match(p, s)\nmatch.group(1)\ntype = 3\nprint(type(x))\n");
        assert_eq!(module.body.len(), 4);
        assert!(module
            .body
            .iter()
            .all(|s| matches!(s.kind, StmtKind::Assign { .. } | StmtKind::Expr(_))));
    }

    #[test]
    fn test_parses_type_alias() {
        let module = parse("type Vector = list[float]\ntype Pair[T, *Ts, **P] = tuple[T, T]\n");
        let StmtKind::TypeAlias { name, params, .. } = &module.body[1].kind else {
            panic!("expected type alias");
        };
        assert_eq!(name, &Expr::Name("Pair".to_string()));
        assert_eq!(params, &["T", "Ts", "P"]);
        assert!(matches!(module.body[0].kind, StmtKind::TypeAlias { .. }));
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(parse_number("42"), Some(Constant::Int(42)));
        assert_eq!(parse_number("1_000"), Some(Constant::Int(1000)));
        assert_eq!(parse_number("0xff"), Some(Constant::Int(255)));
        assert_eq!(parse_number("2.5"), Some(Constant::Float(2.5)));
        assert!(matches!(parse_number("3j"), Some(Constant::OtherNumber(_))));
        assert_eq!(parse_number("12abc"), None);
    }
}
