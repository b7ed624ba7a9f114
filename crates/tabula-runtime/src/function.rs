//! Compiled functions and closures
//!
//! A `Function` is the immutable unit the compiler emits: an instruction
//! sequence plus the ordered set of upvalue names the body references from
//! enclosing scopes. A `Closure` pairs a function with the upvalue table
//! that captures those names at creation time.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::CodeRef;
use crate::table::Table;
use crate::value::{TableRef, Value};

/// Immutable compiled function
#[derive(Debug)]
pub struct Function {
    /// Optional diagnostic name, used in stack traces and display
    name: Option<String>,
    /// Instruction sequence of the body
    code: CodeRef,
    /// Names to resolve and copy into the upvalue table at closure creation,
    /// in declaration order
    upvalue_names: Vec<Value>,
}

impl Function {
    /// Create a function from its compiled body
    pub fn new(code: CodeRef) -> Self {
        Self {
            name: None,
            code,
            upvalue_names: Vec::new(),
        }
    }

    /// Attach a diagnostic name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare the upvalue names the body references
    pub fn with_upvalues(mut self, names: Vec<Value>) -> Self {
        self.upvalue_names = names;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn code(&self) -> &CodeRef {
        &self.code
    }

    pub fn upvalue_names(&self) -> &[Value] {
        &self.upvalue_names
    }

    /// Whether a closure over this function needs an upvalue table
    pub fn has_upvalues(&self) -> bool {
        !self.upvalue_names.is_empty()
    }
}

/// Script closure
///
/// Owns a reference to its function and, when the function declares upvalues,
/// the table holding the values captured at creation. Capture is by value:
/// later mutation of the originating scope does not reach the closure.
#[derive(Debug)]
pub struct Closure {
    function: Rc<Function>,
    /// Present iff the function declares at least one upvalue
    upvalues: Option<TableRef>,
}

impl Closure {
    /// Wrap a function, allocating the upvalue table iff one is needed
    ///
    /// The table starts empty; the VM seeds it from the owning scopes as part
    /// of closure creation.
    pub fn new(function: Rc<Function>) -> Self {
        let upvalues = function
            .has_upvalues()
            .then(|| Rc::new(RefCell::new(Table::new())));
        Self { function, upvalues }
    }

    pub fn function(&self) -> &Rc<Function> {
        &self.function
    }

    pub fn code(&self) -> &CodeRef {
        self.function.code()
    }

    /// The captured-upvalue table, if the function declares any upvalues
    pub fn upvalue_table(&self) -> Option<&TableRef> {
        self.upvalues.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_code() -> CodeRef {
        Rc::from(Vec::new())
    }

    #[test]
    fn test_closure_without_upvalues_has_no_table() {
        let func = Rc::new(Function::new(empty_code()));
        let closure = Closure::new(func);
        assert!(closure.upvalue_table().is_none());
    }

    #[test]
    fn test_closure_with_upvalues_gets_empty_table() {
        let func = Rc::new(
            Function::new(empty_code()).with_upvalues(vec![Value::string("n")]),
        );
        let closure = Closure::new(func);
        let table = closure.upvalue_table().expect("upvalue table");
        assert!(table.borrow().is_empty());
    }

    #[test]
    fn test_function_name() {
        let func = Function::new(empty_code()).with_name("outer");
        assert_eq!(func.name(), Some("outer"));
    }
}
