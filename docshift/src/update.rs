//! Per-document update expressions.
//!
//! An [`Update`] is an ordered list of operations evaluated against one document
//! at a time, so a store can apply it set-wise without materializing the
//! collection. Operations run in order and each sees the result of the previous.

use serde_json::{Number, Value};

use crate::document::{Document, ValueType};
use crate::errors::UpdateError;

/// A value computed from the document being updated.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Value of another field; missing when the field is absent.
    Field(String),
    /// Numeric coercion of strings, booleans and numbers.
    ToNumber(Box<Expr>),
    /// String rendering of strings, booleans and numbers.
    ToText(Box<Expr>),
    /// Wraps a scalar into a one-element array; arrays pass through.
    WrapArray(Box<Expr>),
    /// First element of an array; missing for empty arrays.
    First(Box<Expr>),
    /// Falls back to the second expression when the first is missing or null.
    IfMissing(Box<Expr>, Box<Expr>),
    /// Concatenates string renderings; missing if any part is missing.
    Concat(Vec<Expr>),
    Lower(Box<Expr>),
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn numeric(self) -> Self {
        Expr::ToNumber(Box::new(self))
    }

    pub fn text(self) -> Self {
        Expr::ToText(Box::new(self))
    }

    pub fn wrap_array(self) -> Self {
        Expr::WrapArray(Box::new(self))
    }

    pub fn first(self) -> Self {
        Expr::First(Box::new(self))
    }

    pub fn if_missing(self, fallback: Expr) -> Self {
        Expr::IfMissing(Box::new(self), Box::new(fallback))
    }

    pub fn lower(self) -> Self {
        Expr::Lower(Box::new(self))
    }

    /// Evaluate against `doc`. `Ok(None)` means the expression is missing.
    pub fn eval(&self, doc: &Document, target: &str) -> Result<Option<Value>, UpdateError> {
        match self {
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Field(path) => Ok(doc.get(path).cloned()),
            Expr::ToNumber(inner) => inner
                .eval(doc, target)?
                .map(|value| to_number(&value, target))
                .transpose(),
            Expr::ToText(inner) => inner
                .eval(doc, target)?
                .map(|value| to_text(&value, target).map(Value::String))
                .transpose(),
            Expr::WrapArray(inner) => Ok(inner.eval(doc, target)?.map(|value| match value {
                Value::Array(items) => Value::Array(items),
                other => Value::Array(vec![other]),
            })),
            Expr::First(inner) => match inner.eval(doc, target)? {
                Some(Value::Array(items)) => Ok(items.into_iter().next()),
                Some(other) => Err(UpdateError::TypeMismatch {
                    path: target.to_string(),
                    found: ValueType::of(&other),
                    expected: ValueType::Array,
                }),
                None => Ok(None),
            },
            Expr::IfMissing(primary, fallback) => match primary.eval(doc, target)? {
                Some(Value::Null) | None => fallback.eval(doc, target),
                found => Ok(found),
            },
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part.eval(doc, target)? {
                        Some(value) => out.push_str(&to_text(&value, target)?),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::String(out)))
            }
            Expr::Lower(inner) => match inner.eval(doc, target)? {
                Some(Value::String(text)) => Ok(Some(Value::String(text.to_lowercase()))),
                Some(other) => Err(UpdateError::TypeMismatch {
                    path: target.to_string(),
                    found: ValueType::of(&other),
                    expected: ValueType::String,
                }),
                None => Ok(None),
            },
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

/// A single update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Assign the expression result; a missing result removes the field.
    Set { path: String, expr: Expr },
    Unset { path: String },
    /// Move a field; no-op when the source is absent.
    Rename { from: String, to: String },
    /// Add to a numeric field, treating a missing field as zero.
    Inc { path: String, by: f64 },
    /// Append to an array unless an equal element is present.
    AddToSet { path: String, value: Value },
    /// Remove every equal element from an array.
    Pull { path: String, value: Value },
}

/// Ordered list of update operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set {
            path: path.into(),
            expr: Expr::Literal(value.into()),
        });
        self
    }

    pub fn set_expr(mut self, path: impl Into<String>, expr: Expr) -> Self {
        self.ops.push(UpdateOp::Set { path: path.into(), expr });
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset { path: path.into() });
        self
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn inc(mut self, path: impl Into<String>, by: f64) -> Self {
        self.ops.push(UpdateOp::Inc { path: path.into(), by });
        self
    }

    pub fn add_to_set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::AddToSet {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Pull {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    /// Append `other`'s operations, so both land in one single-document write.
    pub fn then(mut self, other: Update) -> Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply all operations to `doc`. Returns whether the document changed.
    ///
    /// On error the document is left untouched.
    pub fn apply(&self, doc: &mut Document) -> Result<bool, UpdateError> {
        let mut working = doc.clone();
        for op in &self.ops {
            apply_op(op, &mut working)?;
        }
        if working == *doc {
            return Ok(false);
        }
        *doc = working;
        Ok(true)
    }
}

fn apply_op(op: &UpdateOp, doc: &mut Document) -> Result<(), UpdateError> {
    match op {
        UpdateOp::Set { path, expr } => match expr.eval(doc, path)? {
            Some(value) => doc.set(path, value),
            None => {
                doc.remove(path);
                Ok(())
            }
        },
        UpdateOp::Unset { path } => {
            doc.remove(path);
            Ok(())
        }
        UpdateOp::Rename { from, to } => {
            if let Some(value) = doc.remove(from) {
                doc.set(to, value)?;
            }
            Ok(())
        }
        UpdateOp::Inc { path, by } => {
            let current = match doc.get(path) {
                None => 0.0,
                Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
                Some(other) => {
                    return Err(UpdateError::TypeMismatch {
                        path: path.clone(),
                        found: ValueType::of(other),
                        expected: ValueType::Number,
                    });
                }
            };
            doc.set(path, number_value(current + by))
        }
        UpdateOp::AddToSet { path, value } => match doc.get_mut(path) {
            Some(Value::Array(items)) => {
                if !items.contains(value) {
                    items.push(value.clone());
                }
                Ok(())
            }
            Some(other) => Err(UpdateError::TypeMismatch {
                path: path.clone(),
                found: ValueType::of(other),
                expected: ValueType::Array,
            }),
            None => doc.set(path, Value::Array(vec![value.clone()])),
        },
        UpdateOp::Pull { path, value } => match doc.get_mut(path) {
            Some(Value::Array(items)) => {
                items.retain(|item| item != value);
                Ok(())
            }
            Some(other) => Err(UpdateError::TypeMismatch {
                path: path.clone(),
                found: ValueType::of(other),
                expected: ValueType::Array,
            }),
            None => Ok(()),
        },
    }
}

/// Render a float as an integer JSON number when it has no fractional part.
pub(crate) fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn to_number(value: &Value, target: &str) -> Result<Value, UpdateError> {
    let conversion_error = || UpdateError::Conversion {
        path: target.to_string(),
        found: ValueType::of(value),
        target: ValueType::Number,
    };
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::Bool(flag) => Ok(Value::from(u8::from(*flag))),
        Value::String(text) => {
            let trimmed = text.trim();
            if let Ok(integer) = trimmed.parse::<i64>() {
                return Ok(Value::from(integer));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|number| number.is_finite())
                .map(number_value)
                .ok_or_else(conversion_error)
        }
        _ => Err(conversion_error()),
    }
}

fn to_text(value: &Value, target: &str) -> Result<String, UpdateError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        _ => Err(UpdateError::Conversion {
            path: target.to_string(),
            found: ValueType::of(value),
            target: ValueType::String,
        }),
    }
}
