//! VM opcode set
//!
//! Seventeen opcodes organized by concern. At most one parameter per
//! instruction; parameter kinds live in [`super::Param`].

use std::fmt;

/// VM opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ===== Operand stack =====
    /// Push a value, a name, or a counter (depending on the parameter kind)
    Push,
    /// Pop the top counter and every value slot it describes
    CleanStack,

    // ===== Name resolution =====
    /// Push the innermost scope table, topped with a counter of one
    GetLocalTable,
    /// Resolve a name to its owning scope table and push it [Name]
    GetTable,
    /// Replace an addressed table slot with the value its key maps to [CounterIndex]
    GetTableValue,
    /// Bind key to one value consumed from the right-hand-side counter
    Assign,

    // ===== Functions =====
    /// Create a closure from a function prototype, capturing its upvalues [Value]
    GenerateClosure,
    /// Transfer control to the callee beneath the argument counter
    Call,
    /// Restore the caller and trim the callee's scope tables
    Ret,
    /// Pack the unconsumed argument run into a table bound as "arg"
    GenerateArgTable,

    // ===== Counter protocol =====
    /// Concatenate the two topmost counter runs into one
    MergeCounter,
    /// Coerce the top counter to exactly one value (pad with nil / drop extras)
    ResetCounter,
    /// Copy the run beneath the top counter, topped with a fresh counter
    DuplicateCounter,

    // ===== Scope tables =====
    /// Open a fresh scope table for the current frame
    AddLocalTable,
    /// Close the innermost scope table of the current frame
    DelLocalTable,
    /// Push the global table and open the sentinel call record
    AddGlobalTable,
    /// Inverse of AddGlobalTable
    DelGlobalTable,
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_variant_name() {
        assert_eq!(OpCode::Push.to_string(), "Push");
        assert_eq!(OpCode::GenerateArgTable.to_string(), "GenerateArgTable");
    }
}
