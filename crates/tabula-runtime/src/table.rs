//! Table type - the language's sole aggregate data structure
//!
//! A table maps non-nil values to values. Numeric keys are canonicalized
//! through `OrderedFloat` so that every NaN hashes identically; tables,
//! closures, and natives key by reference identity, matching value equality.

use ordered_float::OrderedFloat;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::function::{Closure, Function};
use crate::value::{NativeFunction, RuntimeError, TableRef, Value};

/// Hashable wrapper for table keys
///
/// Every value except nil can be a key. Primitives and strings hash by
/// content; aggregates hash by pointer identity.
#[derive(Debug, Clone)]
pub enum TableKey {
    Bool(bool),
    Number(OrderedFloat<f64>),
    String(Rc<String>),
    Table(TableRef),
    Function(Rc<Function>),
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
}

impl TableKey {
    /// Create a key from a value; nil keys are rejected
    pub fn from_value(value: &Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Nil => Err(RuntimeError::NilTableKey),
            Value::Bool(b) => Ok(TableKey::Bool(*b)),
            Value::Number(n) => {
                // Canonicalize NaN so all NaN keys collide on one entry.
                let normalized = if n.is_nan() { f64::NAN } else { *n };
                Ok(TableKey::Number(OrderedFloat(normalized)))
            }
            Value::String(s) => Ok(TableKey::String(Rc::clone(s))),
            Value::Table(t) => Ok(TableKey::Table(Rc::clone(t))),
            Value::Function(f) => Ok(TableKey::Function(Rc::clone(f))),
            Value::Closure(c) => Ok(TableKey::Closure(Rc::clone(c))),
            Value::Native(n) => Ok(TableKey::Native(Rc::clone(n))),
        }
    }

    /// Convert the key back to a value
    pub fn to_value(&self) -> Value {
        match self {
            TableKey::Bool(b) => Value::Bool(*b),
            TableKey::Number(n) => Value::Number(n.0),
            TableKey::String(s) => Value::String(Rc::clone(s)),
            TableKey::Table(t) => Value::Table(Rc::clone(t)),
            TableKey::Function(f) => Value::Function(Rc::clone(f)),
            TableKey::Closure(c) => Value::Closure(Rc::clone(c)),
            TableKey::Native(n) => Value::Native(Rc::clone(n)),
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableKey::Bool(a), TableKey::Bool(b)) => a == b,
            (TableKey::Number(a), TableKey::Number(b)) => a == b,
            (TableKey::String(a), TableKey::String(b)) => a == b,
            (TableKey::Table(a), TableKey::Table(b)) => Rc::ptr_eq(a, b),
            (TableKey::Function(a), TableKey::Function(b)) => Rc::ptr_eq(a, b),
            (TableKey::Closure(a), TableKey::Closure(b)) => Rc::ptr_eq(a, b),
            (TableKey::Native(a), TableKey::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Discriminant first so e.g. Bool(true) and Number(1.0) never collide
        // structurally.
        std::mem::discriminant(self).hash(state);
        match self {
            TableKey::Bool(b) => b.hash(state),
            TableKey::Number(n) => n.hash(state),
            TableKey::String(s) => s.hash(state),
            TableKey::Table(t) => Rc::as_ptr(t).hash(state),
            TableKey::Function(f) => Rc::as_ptr(f).hash(state),
            TableKey::Closure(c) => Rc::as_ptr(c).hash(state),
            TableKey::Native(n) => Rc::as_ptr(n).hash(state),
        }
    }
}

/// Mutable key-value table
///
/// Insertion order is not observable. Assigning nil stores the binding
/// (scope lookup distinguishes "bound to nil" from "absent").
#[derive(Debug, Default)]
pub struct Table {
    entries: HashMap<TableKey, Value>,
}

impl Table {
    /// Create a new empty table
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Bind `key` to `value`, replacing any previous binding
    ///
    /// # Errors
    /// Returns [`RuntimeError::NilTableKey`] if the key is nil.
    pub fn assign(&mut self, key: &Value, value: Value) -> Result<(), RuntimeError> {
        let key = TableKey::from_value(key)?;
        self.entries.insert(key, value);
        Ok(())
    }

    /// Look up `key`; absent keys (and nil keys) read as nil
    pub fn get(&self, key: &Value) -> Value {
        match TableKey::from_value(key) {
            Ok(key) => self.entries.get(&key).cloned().unwrap_or(Value::Nil),
            Err(_) => Value::Nil,
        }
    }

    /// Check whether `key` is bound (a nil binding counts)
    pub fn contains_key(&self, key: &Value) -> bool {
        match TableKey::from_value(key) {
            Ok(key) => self.entries.contains_key(&key),
            Err(_) => false,
        }
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table has no bindings
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot all bindings as (key, value) pairs, in no particular order
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.to_value(), v.clone()))
            .collect()
    }
}
