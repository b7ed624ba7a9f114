//! Runtime value representation
//!
//! Shared value representation for the VM.
//! - Nil, booleans, numbers: immediate values
//! - Strings: heap-allocated, reference-counted (`Rc<String>`), interned by the data pool
//! - Tables: heap-allocated, mutable through `RefCell`, aliased freely by reference
//! - Closures and natives: reference-counted function objects

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

use crate::bytecode::OpCode;
use crate::function::{Closure, Function};
use crate::table::Table;
use crate::vm::NativeContext;

/// Shared handle to a table
///
/// Tables are mutable and shared; a mutation through one handle is observable
/// through every alias.
pub type TableRef = Rc<RefCell<Table>>;

/// Runtime value type
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value
    Nil,
    /// Boolean value
    Bool(bool),
    /// Numeric value (IEEE 754 double-precision)
    Number(f64),
    /// String value (reference-counted, immutable)
    String(Rc<String>),
    /// Table value (reference-counted, mutable through RefCell)
    Table(TableRef),
    /// Compiled function prototype
    ///
    /// Appears only as an instruction parameter; it becomes callable once
    /// `GenerateClosure` wraps it in a [`Closure`].
    Function(Rc<Function>),
    /// Script closure (function prototype + captured upvalues)
    Closure(Rc<Closure>),
    /// Host-provided native function
    Native(Rc<NativeFunction>),
}

impl Value {
    /// Create a new string value
    ///
    /// Values built this way are not interned; the data pool's `string`
    /// factory is the interning path. String equality is by content either
    /// way.
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Rc::new(s.into()))
    }

    /// Get the human-readable type name of this value, as used in error
    /// messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::Closure(_) | Value::Native(_) => "function",
        }
    }

    /// Check whether this value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            // Strings compare by content; interning makes equal text share
            // one allocation but is not required for equality.
            (Value::String(a), Value::String(b)) => a == b,
            // Aggregates compare by reference identity.
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.0}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Function(func) => match func.name() {
                Some(name) => write!(f, "function: {}", name),
                None => write!(f, "function: {:p}", Rc::as_ptr(func)),
            },
            Value::Closure(cl) => match cl.function().name() {
                Some(name) => write!(f, "function: {}", name),
                None => write!(f, "function: {:p}", Rc::as_ptr(cl)),
            },
            Value::Native(n) => write!(f, "function: {}", n.name()),
        }
    }
}

/// Host-provided native function
///
/// A native reads its argument counter (and the values beneath it) from the
/// operand stack through [`NativeContext`], runs to completion synchronously,
/// and pushes its return values followed by a return counter. The VM then
/// performs the ordinary return sequence on its behalf.
pub struct NativeFunction {
    name: String,
    func: Box<dyn Fn(&mut NativeContext<'_>) -> Result<(), RuntimeError>>,
}

impl NativeFunction {
    /// Create a native function with the given diagnostic name
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut NativeContext<'_>) -> Result<(), RuntimeError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Diagnostic name, used in stack traces and display
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the native body
    pub fn call(&self, ctx: &mut NativeContext<'_>) -> Result<(), RuntimeError> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Runtime error type
///
/// A raised error unwinds the whole `run` activation; there is no recovery
/// inside the dispatch loop and the VM is not reusable afterwards within that
/// invocation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    /// Indexing into a value that is not a table
    #[error("attempt to index value from {type_name}")]
    IndexNonTable { type_name: &'static str },
    /// Calling a value that is neither a closure nor a native
    #[error("attempt to call {type_name}")]
    CallNonFunction { type_name: &'static str },
    /// Nil used as a table key at assignment
    #[error("table key is nil")]
    NilTableKey,
    /// The operand stack did not have the shape an instruction requires
    ///
    /// Not reachable from valid compiler output; hostile or buggy bootstraps
    /// get this instead of undefined behavior.
    #[error("invalid stack shape: expected {expected}")]
    StackShape { expected: &'static str },
    /// An instruction carried a missing or wrongly-kinded parameter
    #[error("malformed parameter for {op_code}")]
    BadParameter { op_code: OpCode },
    /// Operand stack grew past the configured ceiling
    #[error("operand stack overflow")]
    StackOverflow,
    /// Call stack grew past the configured ceiling
    #[error("call depth limit exceeded")]
    CallDepthExceeded,
    /// A declared upvalue was absent from the enclosing closure's table
    #[error("upvalue '{name}' missing from enclosing closure")]
    MissingUpvalue { name: String },
}
