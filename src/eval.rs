//! Runtime values, variable scopes and the expression evaluator capability.

use crate::ast::*;
use crate::expr::parse_expr;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Null => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Text appended to the output buffer for `{{ value }}`.
    pub fn render_to_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(items) => {
                let items: Vec<_> = items.iter().map(Value::render_to_string).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Map(_) => "[object]".to_string(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Values supplied at render time. Every key becomes a top-level variable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    vars: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from any serializable struct or map.
    ///
    /// The value must serialize to a JSON object.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, EvalError> {
        let json = serde_json::to_value(value).map_err(|e| EvalError::Context(e.to_string()))?;
        match Value::from(json) {
            Value::Map(vars) => Ok(Self { vars }),
            other => Err(EvalError::Context(format!(
                "context must be a map, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }
}

impl From<HashMap<String, Value>> for Context {
    fn from(vars: HashMap<String, Value>) -> Self {
        Self {
            vars: vars.into_iter().collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Variable lookup during a render: the context at the bottom, one scope
/// per active loop iteration above it.
pub struct Scope<'c> {
    context: &'c Context,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'c> Scope<'c> {
    pub fn new(context: &'c Context) -> Self {
        Self {
            context,
            scopes: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.context.get(name))
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("invalid token at offset {position}: {message}")]
    Lex { position: usize, message: String },

    #[error("syntax error in `{expression}`: {message}")]
    Syntax { expression: String, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("invalid context: {0}")]
    Context(String),

    #[error("invalid compiled program: {0}")]
    InvalidProgram(String),
}

/// Evaluates the expression text of `{{ }}`, `if` and `for` directives.
///
/// Compiled programs carry expressions as plain strings; an engine can be
/// given any implementation of this trait.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, scope: &Scope<'_>) -> Result<Value, EvalError>;
}

/// The built-in expression language (see [`crate::expr`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct Evaluator;

impl ExpressionEvaluator for Evaluator {
    fn evaluate(&self, expression: &str, scope: &Scope<'_>) -> Result<Value, EvalError> {
        let expr = parse_expr(expression)?;
        eval_expr(&expr, scope)
    }
}

pub fn eval_expr(expr: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::StringLit(s) => Ok(Value::String(s.clone())),
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::IntLit(i) => Ok(Value::Int(*i)),
        Expr::FloatLit(f) => Ok(Value::Float(*f)),
        Expr::Var(name) => Ok(scope.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Attribute(obj, attr) => {
            let val = eval_expr(obj, scope)?;
            match val {
                Value::Map(m) => Ok(m.get(attr).cloned().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                _ => Err(EvalError::Type(format!(
                    "cannot get attribute `{}` of {}",
                    attr,
                    val.type_name()
                ))),
            }
        }
        Expr::Index(obj, idx) => {
            let val = eval_expr(obj, scope)?;
            let idx_val = eval_expr(idx, scope)?;
            match (val, idx_val) {
                (Value::Map(m), Value::String(s)) => Ok(m.get(&s).cloned().unwrap_or(Value::Null)),
                (Value::Array(a), Value::Int(i)) => {
                    let i = if i < 0 { a.len() as i64 + i } else { i };
                    Ok(usize::try_from(i)
                        .ok()
                        .and_then(|i| a.get(i).cloned())
                        .unwrap_or(Value::Null))
                }
                (Value::Null, _) => Ok(Value::Null),
                (val, idx_val) => Err(EvalError::Type(format!(
                    "cannot index {} with {}",
                    val.type_name(),
                    idx_val.type_name()
                ))),
            }
        }
        Expr::Unary(op, operand) => {
            let val = eval_expr(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
                UnaryOp::Neg => match val {
                    Value::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| EvalError::Type(format!("cannot negate {i}"))),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(EvalError::Type(format!("cannot negate {}", other.type_name()))),
                },
            }
        }
        Expr::BinOp(lhs, op, rhs) => {
            // Short-circuit and/or, keeping the deciding operand.
            match op {
                BinOp::And => {
                    let l = eval_expr(lhs, scope)?;
                    return if l.is_truthy() { eval_expr(rhs, scope) } else { Ok(l) };
                }
                BinOp::Or => {
                    let l = eval_expr(lhs, scope)?;
                    return if l.is_truthy() { Ok(l) } else { eval_expr(rhs, scope) };
                }
                _ => {}
            }

            let l = eval_expr(lhs, scope)?;
            let r = eval_expr(rhs, scope)?;
            binary(*op, l, r)
        }
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    let mismatch = |l: &Value, r: &Value| {
        EvalError::Type(format!(
            "unsupported operands for {:?}: {} and {}",
            op,
            l.type_name(),
            r.type_name()
        ))
    };

    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&l, &r).ok_or_else(|| mismatch(&l, &r))?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::In => match (&l, &r) {
            (_, Value::Array(items)) => Ok(Value::Bool(items.iter().any(|v| values_equal(v, &l)))),
            (Value::String(key), Value::Map(m)) => Ok(Value::Bool(m.contains_key(key))),
            (Value::String(needle), Value::String(hay)) => Ok(Value::Bool(hay.contains(needle.as_str()))),
            (_, Value::Null) => Ok(Value::Bool(false)),
            _ => Err(mismatch(&l, &r)),
        },
        BinOp::Add => match (l, r) {
            (Value::String(s1), Value::String(s2)) => Ok(Value::String(s1 + &s2)),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (l, r) => arithmetic(op, &l, &r).ok_or_else(|| mismatch(&l, &r)),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            arithmetic(op, &l, &r).ok_or_else(|| mismatch(&l, &r))
        }
        BinOp::And | BinOp::Or => unreachable!("short-circuited in eval_expr"),
    }
}

fn arithmetic(op: BinOp, l: &Value, r: &Value) -> Option<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => a.checked_add(*b).map(Value::Int),
            BinOp::Sub => a.checked_sub(*b).map(Value::Int),
            BinOp::Mul => a.checked_mul(*b).map(Value::Int),
            BinOp::Div => match a.checked_rem(*b)? {
                0 => a.checked_div(*b).map(Value::Int),
                _ => Some(Value::Float(*a as f64 / *b as f64)),
            },
            BinOp::Rem => a.checked_rem(*b).map(Value::Int),
            _ => None,
        },
        _ => {
            let (a, b) = (as_float(l)?, as_float(r)?);
            match op {
                BinOp::Add => Some(Value::Float(a + b)),
                BinOp::Sub => Some(Value::Float(a - b)),
                BinOp::Mul => Some(Value::Float(a * b)),
                BinOp::Div if b != 0.0 => Some(Value::Float(a / b)),
                BinOp::Rem if b != 0.0 => Some(Value::Float(a % b)),
                _ => None,
            }
        }
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            as_float(l) == as_float(r)
        }
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        _ => as_float(l)?.partial_cmp(&as_float(r)?),
    }
}
