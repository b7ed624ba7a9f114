//! Call-stack activation records

use crate::bytecode::CodeRef;
use crate::value::Value;

/// Activation record for one call
///
/// Each `Call` pushes a record that snapshots where the caller left off:
/// - the caller's instruction sequence and offset (restored by `Ret`)
/// - the callee value (consulted for upvalue lookups inside the callee)
/// - `callee_tables`: how many scope tables the callee has pushed so far;
///   `Ret` removes exactly that many from the scope stack
///
/// The bottom of the call stack is a sentinel record pushed by
/// `AddGlobalTable` with no callee and `callee_tables = 1` (the global
/// table), removed by `DelGlobalTable` rather than `Ret`.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Caller's instruction sequence
    pub caller_code: CodeRef,
    /// Caller's instruction offset at the call site
    pub caller_ip: isize,
    /// The value being called; `None` only for the global sentinel
    pub callee: Option<Value>,
    /// Scope tables the callee has pushed and not yet popped
    pub callee_tables: usize,
}

impl CallRecord {
    /// Record for a real call; the callee starts with zero scope tables
    pub fn new(caller_code: CodeRef, caller_ip: isize, callee: Value) -> Self {
        Self {
            caller_code,
            caller_ip,
            callee: Some(callee),
            callee_tables: 0,
        }
    }

    /// The sentinel record opened by `AddGlobalTable`
    pub fn sentinel() -> Self {
        Self {
            caller_code: std::rc::Rc::from(Vec::new()),
            caller_ip: 0,
            callee: None,
            callee_tables: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_starts_with_no_tables() {
        let record = CallRecord::new(std::rc::Rc::from(Vec::new()), 7, Value::Nil);
        assert_eq!(record.callee_tables, 0);
        assert_eq!(record.caller_ip, 7);
    }

    #[test]
    fn test_sentinel_owns_the_global_table() {
        let sentinel = CallRecord::sentinel();
        assert!(sentinel.callee.is_none());
        assert_eq!(sentinel.callee_tables, 1);
    }
}
