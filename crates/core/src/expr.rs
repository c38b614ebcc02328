//! Expression model: resolved values, deferred expressions and their
//! evaluation.
//!
//! Integers are 64-bit unsigned with wraparound arithmetic. Booleans coerce
//! to 0/1 in arithmetic and integers coerce to truth values in logical
//! operators.

use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Values
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(u64),
    Str(String),
    /// Member of a built-in enumeration such as an access mode (`rw`, `na`).
    Keyword(String),
    /// Absolute dotted path of a referenced instance.
    InstRef(String),
    /// User enumeration type; `id` is the session-wide key of the
    /// definition the name was bound to.
    EnumType { name: String, id: usize },
    EnumMember {
        ty: String,
        member: String,
        value: u64,
    },
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::InstRef(_) => "instance reference",
            Value::EnumType { .. } => "enum type",
            Value::EnumMember { .. } => "enum member",
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(u64::from(*b)),
            Value::EnumMember { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Keyword(s) | Value::InstRef(s) => Some(s),
            Value::EnumType { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Keyword(s) | Value::InstRef(s) => f.write_str(s),
            Value::EnumType { name, .. } => f.write_str(name),
            Value::EnumMember { ty, member, .. } => write!(f, "{}::{}", ty, member),
        }
    }
}

// ──────────────────────────────────────────────
// Operators
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "-")]
    Neg,
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "~")]
    BitNot,
    #[serde(rename = "!")]
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    #[serde(rename = "**")]
    Pow,
    #[serde(rename = "<<")]
    Shl,
    #[serde(rename = ">>")]
    Shr,
    #[serde(rename = "&")]
    BitAnd,
    #[serde(rename = "|")]
    BitOr,
    #[serde(rename = "^")]
    BitXor,
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Param(String),
    InstRef(Vec<String>),
    PropRef {
        path: Vec<String>,
        prop: String,
    },
    /// Element count of dimension `dim` of a referenced array instance.
    ArrayCount {
        path: Vec<String>,
        dim: usize,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Why an expression could not be reduced to a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("parameter '{0}' has no value")]
    UnboundParameter(String),
    #[error("reference '{0}' does not name an instance in scope")]
    UnresolvedReference(String),
    #[error("forward reference to unresolved property '{0}'")]
    ForwardReference(String),
    #[error("unknown property '{0}'")]
    UnknownProperty(String),
    #[error("property '{0}' is not set and has no default")]
    PropertyNotSet(String),
    #[error("'{0}' is not an array or has no dimension {1}")]
    NotAnArray(String, usize),
    #[error("division by zero")]
    DivisionByZero,
    #[error("operator '{op}' cannot be applied to {operand}")]
    Type { op: String, operand: &'static str },
}

/// Name lookups an expression needs while being evaluated.
pub trait EvalScope {
    fn param(&self, name: &str) -> Result<Value, EvalError>;
    fn instance_ref(&self, path: &[String]) -> Result<Value, EvalError>;
    fn property_ref(&self, path: &[String], prop: &str) -> Result<Value, EvalError>;
    fn array_count(&self, path: &[String], dim: usize) -> Result<u64, EvalError>;
}

/// Scope for constant expressions: any name lookup fails.
pub struct ConstScope;

impl EvalScope for ConstScope {
    fn param(&self, name: &str) -> Result<Value, EvalError> {
        Err(EvalError::UnboundParameter(name.to_owned()))
    }

    fn instance_ref(&self, path: &[String]) -> Result<Value, EvalError> {
        Err(EvalError::UnresolvedReference(path.join(".")))
    }

    fn property_ref(&self, path: &[String], _prop: &str) -> Result<Value, EvalError> {
        Err(EvalError::UnresolvedReference(path.join(".")))
    }

    fn array_count(&self, path: &[String], _dim: usize) -> Result<u64, EvalError> {
        Err(EvalError::UnresolvedReference(path.join(".")))
    }
}

impl Expr {
    pub fn int(v: u64) -> Self {
        Expr::Literal(Value::Int(v))
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn eval(&self, scope: &dyn EvalScope) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Param(name) => scope.param(name),
            Expr::InstRef(path) => scope.instance_ref(path),
            Expr::PropRef { path, prop } => scope.property_ref(path, prop),
            Expr::ArrayCount { path, dim } => scope.array_count(path, *dim).map(Value::Int),
            Expr::Unary { op, operand } => eval_unary(*op, operand.eval(scope)?),
            Expr::Binary { op, lhs, rhs } => {
                // short-circuit before touching the right operand
                match op {
                    BinaryOp::And => {
                        if !truthy(&lhs.eval(scope)?, "&&")? {
                            return Ok(Value::Bool(false));
                        }
                        return Ok(Value::Bool(truthy(&rhs.eval(scope)?, "&&")?));
                    }
                    BinaryOp::Or => {
                        if truthy(&lhs.eval(scope)?, "||")? {
                            return Ok(Value::Bool(true));
                        }
                        return Ok(Value::Bool(truthy(&rhs.eval(scope)?, "||")?));
                    }
                    _ => {}
                }
                eval_binary(*op, lhs.eval(scope)?, rhs.eval(scope)?)
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if truthy(&cond.eval(scope)?, "?:")? {
                    then.eval(scope)
                } else {
                    otherwise.eval(scope)
                }
            }
        }
    }
}

fn truthy(v: &Value, op: &str) -> Result<bool, EvalError> {
    v.as_bool().ok_or_else(|| EvalError::Type {
        op: op.to_owned(),
        operand: v.kind_name(),
    })
}

fn integer(v: &Value, op: impl fmt::Display) -> Result<u64, EvalError> {
    v.as_int().ok_or_else(|| EvalError::Type {
        op: op.to_string(),
        operand: v.kind_name(),
    })
}

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(&v, "!")?)),
        UnaryOp::Plus => Ok(Value::Int(integer(&v, "+")?)),
        UnaryOp::Neg => Ok(Value::Int(integer(&v, "-")?.wrapping_neg())),
        UnaryOp::BitNot => Ok(Value::Int(!integer(&v, "~")?)),
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(&l, &r))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(&l, &r))),
        _ => {}
    }
    let a = integer(&l, op)?;
    let b = integer(&r, op)?;
    let v = match op {
        BinaryOp::Add => Value::Int(a.wrapping_add(b)),
        BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinaryOp::Div => Value::Int(a.checked_div(b).ok_or(EvalError::DivisionByZero)?),
        BinaryOp::Rem => Value::Int(a.checked_rem(b).ok_or(EvalError::DivisionByZero)?),
        BinaryOp::Pow => Value::Int(a.wrapping_pow(u32::try_from(b).unwrap_or(u32::MAX))),
        BinaryOp::Shl => Value::Int(shift(a, b, u64::checked_shl)),
        BinaryOp::Shr => Value::Int(shift(a, b, u64::checked_shr)),
        BinaryOp::BitAnd => Value::Int(a & b),
        BinaryOp::BitOr => Value::Int(a | b),
        BinaryOp::BitXor => Value::Int(a ^ b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Eq | BinaryOp::Ne => unreachable!(),
    };
    Ok(v)
}

fn shift(a: u64, b: u64, f: fn(u64, u32) -> Option<u64>) -> u64 {
    u32::try_from(b).ok().and_then(|b| f(a, b)).unwrap_or(0)
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l.as_int(), r.as_int()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}
