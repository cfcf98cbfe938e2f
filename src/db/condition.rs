//! Conditions and patches for single-record conditional writes.
//!
//! Every mutating store call takes a [`Predicate`] that is evaluated against
//! the currently stored record (or its absence) atomically with the write.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::StoreError;

/// A flat stored record.
pub type Item = Map<String, Value>;

/// Guard evaluated against the current record before a write.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Always,
    /// A record is stored under the key
    Exists,
    /// Nothing is stored under the key
    NotExists,
    /// Field equals the value
    Equals(String, Value),
    /// Field is greater than the value; a missing numeric field counts as zero
    GreaterThan(String, Value),
    /// Field is less than the value; a missing numeric field counts as zero
    LessThan(String, Value),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Predicate::Equals(field.to_string(), value.into())
    }

    pub fn greater_than(field: &str, value: impl Into<Value>) -> Self {
        Predicate::GreaterThan(field.to_string(), value.into())
    }

    pub fn less_than(field: &str, value: impl Into<Value>) -> Self {
        Predicate::LessThan(field.to_string(), value.into())
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against the current record; `None` when nothing is stored.
    pub fn evaluate(&self, current: Option<&Item>) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Exists => current.is_some(),
            Predicate::NotExists => current.is_none(),
            Predicate::Equals(field, expected) => current
                .and_then(|item| item.get(field))
                .is_some_and(|actual| values_equal(actual, expected)),
            Predicate::GreaterThan(field, bound) => current
                .is_some_and(|item| compare_field(item, field, bound) == Some(Ordering::Greater)),
            Predicate::LessThan(field, bound) => current
                .is_some_and(|item| compare_field(item, field, bound) == Some(Ordering::Less)),
            Predicate::Not(inner) => !inner.evaluate(current),
            Predicate::All(predicates) => predicates.iter().all(|p| p.evaluate(current)),
            Predicate::Any(predicates) => predicates.iter().any(|p| p.evaluate(current)),
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn compare_field(item: &Item, field: &str, bound: &Value) -> Option<Ordering> {
    match (item.get(field), bound) {
        (None | Some(Value::Null), Value::Number(b)) => 0.0_f64.partial_cmp(&b.as_f64()?),
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Some(Value::String(a)), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Single field change within a patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set(String, Value),
    /// Numeric increment; a missing field starts at zero
    Add(String, Value),
}

/// Field-level changes applied to one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::Set(field.to_string(), value.into()));
        self
    }

    pub fn add(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::Add(field.to_string(), value.into()));
        self
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// Apply all changes in order.
    pub fn apply(&self, item: &mut Item) -> Result<(), StoreError> {
        for op in &self.ops {
            match op {
                PatchOp::Set(field, value) => {
                    item.insert(field.clone(), value.clone());
                }
                PatchOp::Add(field, delta) => {
                    let current = item.get(field).cloned().unwrap_or(Value::from(0));
                    let sum = add_numbers(&current, delta).ok_or_else(|| {
                        StoreError::InvalidArgument(format!("field '{}' is not numeric", field))
                    })?;
                    item.insert(field.clone(), sum);
                }
            }
        }
        Ok(())
    }
}

fn add_numbers(current: &Value, delta: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return a.checked_add(b).map(Value::from);
    }
    let sum = current.as_f64()? + delta.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}
