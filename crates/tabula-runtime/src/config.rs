//! Execution limits
//!
//! Ceilings the VM enforces while running a bootstrap. Defaults are generous;
//! they exist so runaway scripts surface a runtime error instead of
//! exhausting host memory.

/// Resource ceilings for one VM instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmLimits {
    /// Maximum number of operand-stack slots, checked at instruction
    /// boundaries
    pub max_stack_slots: usize,
    /// Maximum call-stack depth (including the global sentinel record)
    pub max_call_depth: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            max_stack_slots: 1 << 20,
            max_call_depth: 1024,
        }
    }
}
