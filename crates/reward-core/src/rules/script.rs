//! Restricted interpreter for evaluation scripts.
//!
//! Scripts are small dataset-authored Python snippets that inspect fetched
//! files and assign a verdict (`correct = ...` or `reward = ...`). They are
//! parsed with the analyzer's parser and evaluated over a closed set of
//! values, builtins and methods. Nothing is ever executed by a real
//! interpreter; any construct outside the subset is a [`ScriptError`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::analysis::ast::{BoolOp, CmpOp, Constant, Expr, Stmt, StmtKind, UnaryOp};
use crate::analysis::{parse_module, ParseError};

#[derive(Debug, Clone)]
pub enum ScriptValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ScriptValue>),
    Tuple(Vec<ScriptValue>),
    /// Insertion-ordered pairs, like a Python dict.
    Dict(Vec<(ScriptValue, ScriptValue)>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("script does not parse: {0}")]
    Parse(#[from] ParseError),

    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("name '{0}' is not defined")]
    Name(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("index {0} out of range")]
    Index(i64),

    #[error("script never assigned '{0}'")]
    Unassigned(String),

    #[error("reward_fn failed: {0}")]
    Host(String),

    #[error("script inputs unavailable: {0}")]
    Metadata(String),
}

/// Backs the `reward_fn(...)` builtin.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn call_reward_fn(&self, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError>;
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::None => "NoneType",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Float(_) => "float",
            ScriptValue::Str(_) => "str",
            ScriptValue::List(_) => "list",
            ScriptValue::Tuple(_) => "tuple",
            ScriptValue::Dict(_) => "dict",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            ScriptValue::None => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Int(i) => *i != 0,
            ScriptValue::Float(f) => *f != 0.0,
            ScriptValue::Str(s) => !s.is_empty(),
            ScriptValue::List(items) | ScriptValue::Tuple(items) => !items.is_empty(),
            ScriptValue::Dict(pairs) => !pairs.is_empty(),
        }
    }

    /// Numeric value of bools, ints and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ScriptValue::Int(i) => Some(*i as f64),
            ScriptValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Bool(b) => Some(i64::from(*b)),
            ScriptValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Python `==`.
    pub fn py_eq(&self, other: &ScriptValue) -> bool {
        use ScriptValue::*;
        match (self, other) {
            (None, None) => true,
            (Str(a), Str(b)) => a == b,
            (List(a), List(b)) | (Tuple(a), Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
            }
            (Dict(a), Dict(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .all(|(k, v)| dict_get(b, k).is_some_and(|w| v.py_eq(w)))
            }
            _ => match (self.as_int(), other.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => match (self.as_f64(), other.as_f64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                },
            },
        }
    }

    fn py_cmp(&self, other: &ScriptValue) -> Result<Option<Ordering>, ScriptError> {
        match (self, other) {
            (ScriptValue::Str(a), ScriptValue::Str(b)) => Ok(Some(a.cmp(b))),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
                _ => Err(ScriptError::Type(format!(
                    "cannot order {} and {}",
                    self.type_name(),
                    other.type_name()
                ))),
            },
        }
    }

    fn contains(&self, needle: &ScriptValue) -> Result<bool, ScriptError> {
        match (self, needle) {
            (ScriptValue::Str(hay), ScriptValue::Str(n)) => Ok(hay.contains(n.as_str())),
            (ScriptValue::Str(_), other) => Err(ScriptError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
            (ScriptValue::List(items) | ScriptValue::Tuple(items), _) => {
                Ok(items.iter().any(|item| item.py_eq(needle)))
            }
            (ScriptValue::Dict(pairs), _) => Ok(dict_get(pairs, needle).is_some()),
            (other, _) => Err(ScriptError::Type(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    fn len(&self) -> Result<usize, ScriptError> {
        match self {
            ScriptValue::Str(s) => Ok(s.chars().count()),
            ScriptValue::List(items) | ScriptValue::Tuple(items) => Ok(items.len()),
            ScriptValue::Dict(pairs) => Ok(pairs.len()),
            other => Err(ScriptError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    fn iterate(&self) -> Result<Vec<ScriptValue>, ScriptError> {
        match self {
            ScriptValue::Str(s) => Ok(s.chars().map(|c| ScriptValue::Str(c.to_string())).collect()),
            ScriptValue::List(items) | ScriptValue::Tuple(items) => Ok(items.clone()),
            ScriptValue::Dict(pairs) => Ok(pairs.iter().map(|(k, _)| k.clone()).collect()),
            other => Err(ScriptError::Type(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Python `repr`.
    pub fn repr(&self) -> String {
        match self {
            ScriptValue::None => "None".to_string(),
            ScriptValue::Bool(true) => "True".to_string(),
            ScriptValue::Bool(false) => "False".to_string(),
            ScriptValue::Int(i) => i.to_string(),
            ScriptValue::Float(f) => float_repr(*f),
            ScriptValue::Str(s) => str_repr(s),
            ScriptValue::List(items) => format!("[{}]", join_repr(items)),
            ScriptValue::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            ScriptValue::Tuple(items) => format!("({})", join_repr(items)),
            ScriptValue::Dict(pairs) => {
                let body: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", body.join(", "))
            }
        }
    }
}

/// Python `str`.
impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

impl From<&Value> for ScriptValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ScriptValue::None,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ScriptValue::Int(i),
                None => ScriptValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ScriptValue::Str(s.clone()),
            Value::Array(items) => ScriptValue::List(items.iter().map(Self::from).collect()),
            Value::Object(map) => ScriptValue::Dict(
                map.iter()
                    .map(|(k, v)| (ScriptValue::Str(k.clone()), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::Str(value.to_string())
    }
}

fn join_repr(items: &[ScriptValue]) -> String {
    items.iter().map(ScriptValue::repr).collect::<Vec<_>>().join(", ")
}

fn float_repr(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        (if x > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn dict_get<'d>(
    pairs: &'d [(ScriptValue, ScriptValue)],
    key: &ScriptValue,
) -> Option<&'d ScriptValue> {
    pairs.iter().find(|(k, _)| k.py_eq(key)).map(|(_, v)| v)
}

fn normalize_index(index: i64, len: usize) -> Result<usize, ScriptError> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if (0..len as i64).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(ScriptError::Index(index))
    }
}

fn slice_bounds(len: usize, lower: Option<i64>, upper: Option<i64>) -> (usize, usize) {
    let clamp = |i: i64| -> usize {
        if i < 0 {
            (len as i64 + i).max(0) as usize
        } else {
            (i as usize).min(len)
        }
    };
    let start = lower.map_or(0, clamp);
    let end = upper.map_or(len, clamp);
    (start, end.max(start))
}

fn subscript(value: &ScriptValue, index: &ScriptValue) -> Result<ScriptValue, ScriptError> {
    match value {
        ScriptValue::Dict(pairs) => dict_get(pairs, index)
            .cloned()
            .ok_or_else(|| ScriptError::Key(index.repr())),
        ScriptValue::List(items) | ScriptValue::Tuple(items) => {
            let i = index.as_int().ok_or_else(|| {
                ScriptError::Type(format!("indices must be integers, not {}", index.type_name()))
            })?;
            Ok(items[normalize_index(i, items.len())?].clone())
        }
        ScriptValue::Str(s) => {
            let i = index.as_int().ok_or_else(|| {
                ScriptError::Type(format!("string indices must be integers, not {}", index.type_name()))
            })?;
            let chars: Vec<char> = s.chars().collect();
            Ok(ScriptValue::Str(chars[normalize_index(i, chars.len())?].to_string()))
        }
        other => Err(ScriptError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn slice(
    value: &ScriptValue,
    lower: Option<i64>,
    upper: Option<i64>,
) -> Result<ScriptValue, ScriptError> {
    match value {
        ScriptValue::List(items) => {
            let (start, end) = slice_bounds(items.len(), lower, upper);
            Ok(ScriptValue::List(items[start..end].to_vec()))
        }
        ScriptValue::Tuple(items) => {
            let (start, end) = slice_bounds(items.len(), lower, upper);
            Ok(ScriptValue::Tuple(items[start..end].to_vec()))
        }
        ScriptValue::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), lower, upper);
            Ok(ScriptValue::Str(chars[start..end].iter().collect()))
        }
        other => Err(ScriptError::Type(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

fn binary(op: &str, left: ScriptValue, right: ScriptValue) -> Result<ScriptValue, ScriptError> {
    use ScriptValue::*;
    match (op, left, right) {
        ("+", Str(a), Str(b)) => Ok(Str(a + &b)),
        ("+", List(mut a), List(b)) => {
            a.extend(b);
            Ok(List(a))
        }
        ("+", Tuple(mut a), Tuple(b)) => {
            a.extend(b);
            Ok(Tuple(a))
        }
        ("*", Str(s), Int(n)) | ("*", Int(n), Str(s)) => {
            Ok(Str(s.repeat(usize::try_from(n).unwrap_or(0))))
        }
        (op, left, right) => arithmetic(op, &left, &right),
    }
}

fn arithmetic(op: &str, left: &ScriptValue, right: &ScriptValue) -> Result<ScriptValue, ScriptError> {
    let mismatch = || {
        ScriptError::Type(format!(
            "unsupported operand types for {op}: '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))
    };
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        let exact = match op {
            "+" => a.checked_add(b),
            "-" => a.checked_sub(b),
            "*" => a.checked_mul(b),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(ScriptValue::Int(v));
        }
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(mismatch());
    };
    match op {
        "+" => Ok(ScriptValue::Float(a + b)),
        "-" => Ok(ScriptValue::Float(a - b)),
        "*" => Ok(ScriptValue::Float(a * b)),
        "/" if b == 0.0 => Err(ScriptError::Type("division by zero".to_string())),
        "/" => Ok(ScriptValue::Float(a / b)),
        other => Err(ScriptError::Unsupported(format!("operator {other}"))),
    }
}

fn builtin(name: &str, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
    use ScriptValue as V;
    let arity = |expected: &str| {
        ScriptError::Type(format!(
            "{name}() takes {expected} arguments ({} given)",
            args.len()
        ))
    };
    match (name, args.as_slice()) {
        ("len", [v]) => Ok(V::Int(v.len()? as i64)),
        ("list", []) => Ok(V::List(Vec::new())),
        ("list", [v]) => Ok(V::List(v.iterate()?)),
        ("str", []) => Ok(V::Str(String::new())),
        ("str", [v]) => Ok(V::Str(v.to_string())),
        ("bool", [v]) => Ok(V::Bool(v.truthy())),
        ("int", [V::Float(f)]) if f.is_finite() => Ok(V::Int(f.trunc() as i64)),
        ("int", [V::Str(s)]) => s
            .trim()
            .parse::<i64>()
            .map(V::Int)
            .map_err(|_| ScriptError::Type(format!("invalid literal for int(): {}", str_repr(s)))),
        ("int", [v]) => v
            .as_int()
            .map(V::Int)
            .ok_or_else(|| ScriptError::Type(format!("int() argument was {}", v.type_name()))),
        ("float", [V::Str(s)]) => s
            .trim()
            .parse::<f64>()
            .map(V::Float)
            .map_err(|_| ScriptError::Type(format!("could not convert string to float: {}", str_repr(s)))),
        ("float", [v]) => v
            .as_f64()
            .map(V::Float)
            .ok_or_else(|| ScriptError::Type(format!("float() argument was {}", v.type_name()))),
        ("len" | "bool" | "int" | "float", _) => Err(arity("exactly one")),
        ("list" | "str", _) => Err(arity("at most one")),
        _ => Err(ScriptError::Name(name.to_string())),
    }
}

fn call_method(
    receiver: ScriptValue,
    method: &str,
    args: Vec<ScriptValue>,
) -> Result<ScriptValue, ScriptError> {
    use ScriptValue as V;
    match (&receiver, method, args.as_slice()) {
        (V::Dict(pairs), "values", []) => Ok(V::List(pairs.iter().map(|(_, v)| v.clone()).collect())),
        (V::Dict(pairs), "keys", []) => Ok(V::List(pairs.iter().map(|(k, _)| k.clone()).collect())),
        (V::Dict(pairs), "items", []) => Ok(V::List(
            pairs
                .iter()
                .map(|(k, v)| V::Tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        (V::Dict(pairs), "get", [key]) => Ok(dict_get(pairs, key).cloned().unwrap_or(V::None)),
        (V::Dict(pairs), "get", [key, default]) => {
            Ok(dict_get(pairs, key).cloned().unwrap_or_else(|| default.clone()))
        }
        (V::Str(s), "strip", []) => Ok(V::Str(s.trim().to_string())),
        (V::Str(s), "strip", [V::Str(chars)]) => {
            Ok(V::Str(s.trim_matches(|c: char| chars.contains(c)).to_string()))
        }
        (V::Str(s), "lower", []) => Ok(V::Str(s.to_lowercase())),
        (V::Str(s), "upper", []) => Ok(V::Str(s.to_uppercase())),
        (V::Str(s), "split", []) => Ok(V::List(
            s.split_whitespace().map(V::from).collect(),
        )),
        (V::Str(_), "split", [V::Str(sep)]) if sep.is_empty() => {
            Err(ScriptError::Type("empty separator".to_string()))
        }
        (V::Str(s), "split", [V::Str(sep)]) => {
            Ok(V::List(s.split(sep.as_str()).map(V::from).collect()))
        }
        (V::Str(s), "startswith", [V::Str(prefix)]) => Ok(V::Bool(s.starts_with(prefix.as_str()))),
        (V::Str(s), "endswith", [V::Str(suffix)]) => Ok(V::Bool(s.ends_with(suffix.as_str()))),
        (V::Str(s), "count", [V::Str(sub)]) if sub.is_empty() => {
            Ok(V::Int(s.chars().count() as i64 + 1))
        }
        (V::Str(s), "count", [V::Str(sub)]) => Ok(V::Int(s.matches(sub.as_str()).count() as i64)),
        (V::List(items) | V::Tuple(items), "count", [needle]) => {
            Ok(V::Int(items.iter().filter(|item| item.py_eq(needle)).count() as i64))
        }
        _ => Err(ScriptError::Unsupported(format!(
            "{}.{method}() with {} argument(s)",
            receiver.type_name(),
            args.len()
        ))),
    }
}

type Eval<'a> = BoxFuture<'a, Result<ScriptValue, ScriptError>>;
type Exec<'a> = BoxFuture<'a, Result<(), ScriptError>>;

/// One script run: a flat scope of bindings plus an optional host.
pub struct Interpreter<'h> {
    scope: BTreeMap<String, ScriptValue>,
    host: Option<&'h dyn ScriptHost>,
}

impl Default for Interpreter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> Interpreter<'h> {
    pub fn new() -> Self {
        Self {
            scope: BTreeMap::new(),
            host: None,
        }
    }

    pub fn with_host(host: &'h dyn ScriptHost) -> Self {
        Self {
            scope: BTreeMap::new(),
            host: Some(host),
        }
    }

    pub fn bind(&mut self, name: &str, value: ScriptValue) -> &mut Self {
        self.scope.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScriptValue> {
        self.scope.get(name)
    }

    /// The value a finished script left in `name`.
    pub fn take(&mut self, name: &str) -> Result<ScriptValue, ScriptError> {
        self.scope
            .remove(name)
            .ok_or_else(|| ScriptError::Unassigned(name.to_string()))
    }

    pub async fn run(&mut self, source: &str) -> Result<(), ScriptError> {
        let parsed = parse_module(source)?;
        self.exec_block(&parsed.module.body).await
    }

    fn exec_block<'a>(&'a mut self, body: &'a [Stmt]) -> Exec<'a> {
        async move {
            for stmt in body {
                self.exec(stmt).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn exec<'a>(&'a mut self, stmt: &'a Stmt) -> Exec<'a> {
        async move {
            match &stmt.kind {
                StmtKind::Assign { targets, value } => {
                    let value = self.eval(value).await?;
                    for target in targets {
                        self.assign(target, value.clone())?;
                    }
                }
                StmtKind::AugAssign { target, op, value } => {
                    let Expr::Name(name) = target else {
                        return Err(ScriptError::Unsupported("augmented assignment target".into()));
                    };
                    let current = self.lookup(name)?;
                    let rhs = self.eval(value).await?;
                    let updated = binary(op.trim_end_matches('='), current, rhs)?;
                    self.scope.insert(name.clone(), updated);
                }
                StmtKind::If { test, body, orelse } => {
                    if self.eval(test).await?.truthy() {
                        self.exec_block(body).await?;
                    } else {
                        self.exec_block(orelse).await?;
                    }
                }
                StmtKind::Expr(expr) => {
                    self.eval(expr).await?;
                }
                StmtKind::Pass => {}
                other => {
                    return Err(ScriptError::Unsupported(format!(
                        "statement on line {}: {}",
                        stmt.line,
                        statement_name(other)
                    )))
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn assign(&mut self, target: &Expr, value: ScriptValue) -> Result<(), ScriptError> {
        match target {
            Expr::Name(name) => {
                self.scope.insert(name.clone(), value);
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let values = value.iterate()?;
                if values.len() != targets.len() {
                    return Err(ScriptError::Type(format!(
                        "cannot unpack {} values into {} targets",
                        values.len(),
                        targets.len()
                    )));
                }
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(())
            }
            _ => Err(ScriptError::Unsupported("assignment target".into())),
        }
    }

    fn lookup(&self, name: &str) -> Result<ScriptValue, ScriptError> {
        self.scope
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::Name(name.to_string()))
    }

    fn eval<'a>(&'a self, expr: &'a Expr) -> Eval<'a> {
        async move {
            match expr {
                Expr::Constant(constant) => match constant {
                    Constant::None => Ok(ScriptValue::None),
                    Constant::Bool(b) => Ok(ScriptValue::Bool(*b)),
                    Constant::Int(i) => Ok(ScriptValue::Int(*i)),
                    Constant::Float(f) => Ok(ScriptValue::Float(*f)),
                    Constant::OtherNumber(text) => {
                        Err(ScriptError::Unsupported(format!("numeric literal {text}")))
                    }
                    Constant::Ellipsis => Err(ScriptError::Unsupported("Ellipsis".into())),
                },
                Expr::Str(lit) if lit.is_fstring() || lit.is_bytes() => {
                    Err(ScriptError::Unsupported("f-string or bytes literal".into()))
                }
                Expr::Str(lit) => Ok(ScriptValue::Str(lit.value())),
                Expr::Name(name) => self.lookup(name),
                Expr::List(items) => Ok(ScriptValue::List(self.eval_all(items).await?)),
                Expr::Tuple(items) => Ok(ScriptValue::Tuple(self.eval_all(items).await?)),
                Expr::Dict { keys, values } => {
                    let mut pairs: Vec<(ScriptValue, ScriptValue)> = Vec::with_capacity(keys.len());
                    for (key, value) in keys.iter().zip(values) {
                        let Some(key) = key else {
                            return Err(ScriptError::Unsupported("dict unpacking".into()));
                        };
                        let key = self.eval(key).await?;
                        let value = self.eval(value).await?;
                        match pairs.iter_mut().find(|(k, _)| k.py_eq(&key)) {
                            Some(slot) => slot.1 = value,
                            None => pairs.push((key, value)),
                        }
                    }
                    Ok(ScriptValue::Dict(pairs))
                }
                Expr::BoolOp { op, values } => {
                    let mut last = ScriptValue::None;
                    for value in values {
                        last = self.eval(value).await?;
                        let short_circuit = match op {
                            BoolOp::And => !last.truthy(),
                            BoolOp::Or => last.truthy(),
                        };
                        if short_circuit {
                            break;
                        }
                    }
                    Ok(last)
                }
                Expr::UnaryOp { op, operand } => {
                    let value = self.eval(operand).await?;
                    match op {
                        UnaryOp::Not => Ok(ScriptValue::Bool(!value.truthy())),
                        UnaryOp::Neg => binary("-", ScriptValue::Int(0), value),
                        UnaryOp::Pos => binary("+", ScriptValue::Int(0), value),
                        UnaryOp::Invert => Err(ScriptError::Unsupported("operator ~".into())),
                    }
                }
                Expr::BinOp { left, op, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    binary(op, left, right)
                }
                Expr::Compare {
                    left,
                    ops,
                    comparators,
                } => {
                    let mut current = self.eval(left).await?;
                    for (op, next) in ops.iter().zip(comparators) {
                        let next = self.eval(next).await?;
                        if !compare(*op, &current, &next)? {
                            return Ok(ScriptValue::Bool(false));
                        }
                        current = next;
                    }
                    Ok(ScriptValue::Bool(true))
                }
                Expr::IfExp { test, body, orelse } => {
                    if self.eval(test).await?.truthy() {
                        self.eval(body).await
                    } else {
                        self.eval(orelse).await
                    }
                }
                Expr::Subscript { value, slice: index } => {
                    let target = self.eval(value).await?;
                    match index.as_ref() {
                        Expr::Slice { lower, upper, step } => {
                            if step.is_some() {
                                return Err(ScriptError::Unsupported("slice step".into()));
                            }
                            let lower = self.eval_bound(lower.as_deref()).await?;
                            let upper = self.eval_bound(upper.as_deref()).await?;
                            slice(&target, lower, upper)
                        }
                        index => {
                            let index = self.eval(index).await?;
                            subscript(&target, &index)
                        }
                    }
                }
                Expr::Call {
                    func,
                    args,
                    keywords,
                } => {
                    if !keywords.is_empty() {
                        return Err(ScriptError::Unsupported("keyword arguments".into()));
                    }
                    match func.as_ref() {
                        Expr::Name(name) => {
                            let args = self.eval_all(args).await?;
                            self.call_function(name, args).await
                        }
                        Expr::Attribute { value, attr } => {
                            let receiver = self.eval(value).await?;
                            let args = self.eval_all(args).await?;
                            call_method(receiver, attr, args)
                        }
                        _ => Err(ScriptError::Unsupported("call target".into())),
                    }
                }
                Expr::Attribute { attr, .. } => {
                    Err(ScriptError::Unsupported(format!("attribute access .{attr}")))
                }
                _ => Err(ScriptError::Unsupported("expression".into())),
            }
        }
        .boxed()
    }

    async fn eval_all(&self, exprs: &[Expr]) -> Result<Vec<ScriptValue>, ScriptError> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            if matches!(expr, Expr::Starred(_)) {
                return Err(ScriptError::Unsupported("star unpacking".into()));
            }
            values.push(self.eval(expr).await?);
        }
        Ok(values)
    }

    async fn eval_bound(&self, bound: Option<&Expr>) -> Result<Option<i64>, ScriptError> {
        let Some(bound) = bound else {
            return Ok(None);
        };
        match self.eval(bound).await? {
            ScriptValue::None => Ok(None),
            value => value.as_int().map(Some).ok_or_else(|| {
                ScriptError::Type(format!("slice indices must be integers, not {}", value.type_name()))
            }),
        }
    }

    async fn call_function(
        &self,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError> {
        if name == "reward_fn" {
            let host = self
                .host
                .ok_or_else(|| ScriptError::Name(name.to_string()))?;
            return host.call_reward_fn(args).await;
        }
        if let Some(value) = self.scope.get(name) {
            return Err(ScriptError::Type(format!(
                "'{}' object is not callable",
                value.type_name()
            )));
        }
        builtin(name, args)
    }
}

fn compare(op: CmpOp, left: &ScriptValue, right: &ScriptValue) -> Result<bool, ScriptError> {
    let is_same = |a: &ScriptValue, b: &ScriptValue| match (a, b) {
        (ScriptValue::None, ScriptValue::None) => Ok(true),
        (ScriptValue::Bool(x), ScriptValue::Bool(y)) => Ok(x == y),
        (ScriptValue::None | ScriptValue::Bool(_), _) | (_, ScriptValue::None | ScriptValue::Bool(_)) => {
            Ok(false)
        }
        _ => Err(ScriptError::Unsupported(
            "identity comparison between non-singletons".into(),
        )),
    };
    match op {
        CmpOp::Eq => Ok(left.py_eq(right)),
        CmpOp::NotEq => Ok(!left.py_eq(right)),
        CmpOp::In => right.contains(left),
        CmpOp::NotIn => right.contains(left).map(|found| !found),
        CmpOp::Is => is_same(left, right),
        CmpOp::IsNot => is_same(left, right).map(|same| !same),
        CmpOp::Lt => Ok(left.py_cmp(right)? == Some(Ordering::Less)),
        CmpOp::LtE => Ok(matches!(
            left.py_cmp(right)?,
            Some(Ordering::Less | Ordering::Equal)
        )),
        CmpOp::Gt => Ok(left.py_cmp(right)? == Some(Ordering::Greater)),
        CmpOp::GtE => Ok(matches!(
            left.py_cmp(right)?,
            Some(Ordering::Greater | Ordering::Equal)
        )),
    }
}

fn statement_name(kind: &StmtKind) -> &'static str {
    match kind {
        StmtKind::FunctionDef(_) => "def",
        StmtKind::ClassDef(_) => "class",
        StmtKind::Return(_) => "return",
        StmtKind::Delete(_) => "del",
        StmtKind::AnnAssign { .. } => "annotated assignment",
        StmtKind::For { .. } => "for",
        StmtKind::While { .. } => "while",
        StmtKind::With { .. } => "with",
        StmtKind::Raise { .. } => "raise",
        StmtKind::Try { .. } => "try",
        StmtKind::Assert { .. } => "assert",
        StmtKind::Match { .. } => "match",
        StmtKind::TypeAlias { .. } => "type alias",
        StmtKind::Import(_) | StmtKind::ImportFrom { .. } => "import",
        StmtKind::Global(_) | StmtKind::Nonlocal(_) => "scope declaration",
        StmtKind::Break | StmtKind::Continue => "loop control",
        StmtKind::Assign { .. }
        | StmtKind::AugAssign { .. }
        | StmtKind::If { .. }
        | StmtKind::Expr(_)
        | StmtKind::Pass => "statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn files() -> ScriptValue {
        ScriptValue::from(&json!({"solution.py": "42\n", "notes.txt": "Hello"}))
    }

    async fn run(source: &str) -> Result<Interpreter<'static>, ScriptError> {
        let mut interp = Interpreter::new();
        interp
            .bind("fetched_files", files())
            .bind("ground_truth", ScriptValue::from("42"));
        interp.run(source).await?;
        Ok(interp)
    }

    #[tokio::test]
    async fn test_typical_evaluation_script() {
        let mut interp = run("correct = list(fetched_files.values())[0].strip() == ground_truth")
            .await
            .expect("runs");
        assert!(interp.take("correct").expect("assigned").truthy());
    }

    #[tokio::test]
    async fn test_branches_and_methods() {
        let source = "\
text = fetched_files.get('notes.txt', '')
if text.lower().startswith('hel') and 'notes.txt' in fetched_files:
    correct = len(text.split('l')) == 3
else:
    correct = False
";
        let mut interp = run(source).await.expect("runs");
        assert!(interp.take("correct").expect("assigned").py_eq(&ScriptValue::Bool(true)));
    }

    #[tokio::test]
    async fn test_values_and_arithmetic() {
        let mut interp = run("x = int(ground_truth) + 0.5\ny = str([1, 'a', None])\nz = 'abc'[-2:]")
            .await
            .expect("runs");
        assert!(interp.take("x").expect("x").py_eq(&ScriptValue::Float(42.5)));
        assert_eq!(interp.take("y").expect("y").to_string(), "[1, 'a', None]");
        assert_eq!(interp.take("z").expect("z").to_string(), "bc");
    }

    #[tokio::test]
    async fn test_unsupported_and_missing() {
        assert!(matches!(
            run("import os").await.err(),
            Some(ScriptError::Unsupported(_))
        ));
        assert!(matches!(
            run("for f in fetched_files:\n    pass").await.err(),
            Some(ScriptError::Unsupported(_))
        ));
        assert!(matches!(
            run("correct = open('x')").await.err(),
            Some(ScriptError::Name(_))
        ));
        assert!(matches!(
            run("correct = fetched_files['missing']").await.err(),
            Some(ScriptError::Key(_))
        ));
        assert!(matches!(run("correct = (").await.err(), Some(ScriptError::Parse(_))));

        let mut interp = run("x = 1").await.expect("runs");
        assert!(matches!(interp.take("correct"), Err(ScriptError::Unassigned(_))));
    }

    struct LengthHost;

    #[async_trait]
    impl ScriptHost for LengthHost {
        async fn call_reward_fn(
            &self,
            args: Vec<ScriptValue>,
        ) -> Result<ScriptValue, ScriptError> {
            let first = args.first().map(ScriptValue::to_string).unwrap_or_default();
            Ok(ScriptValue::Float(first.len() as f64))
        }
    }

    #[tokio::test]
    async fn test_reward_fn_goes_through_host() {
        let host = LengthHost;
        let mut interp = Interpreter::with_host(&host);
        interp.bind("fetched_files", files());
        interp
            .run("reward = reward_fn(fetched_files['notes.txt'], 'ignored') - 1")
            .await
            .expect("runs");
        assert!(interp.take("reward").expect("reward").py_eq(&ScriptValue::Float(4.0)));

        let mut hostless = Interpreter::new();
        assert!(matches!(
            hostless.run("reward = reward_fn('x')").await,
            Err(ScriptError::Name(_))
        ));
    }

    #[test]
    fn test_python_equality_and_repr() {
        assert!(ScriptValue::Int(1).py_eq(&ScriptValue::Bool(true)));
        assert!(ScriptValue::Int(2).py_eq(&ScriptValue::Float(2.0)));
        assert!(!ScriptValue::List(vec![]).py_eq(&ScriptValue::Tuple(vec![])));
        assert_eq!(ScriptValue::Float(3.0).repr(), "3.0");
        assert_eq!(ScriptValue::from("it's").repr(), "\"it's\"");
        assert_eq!(ScriptValue::Tuple(vec![ScriptValue::Int(1)]).repr(), "(1,)");
    }
}
