//! Execution profiler
//!
//! Opt-in instrumentation for the dispatch loop: per-opcode instruction
//! counts plus peak operand-stack and call-frame depths. Zero overhead when
//! disabled (the VM skips the hooks entirely).

use std::collections::HashMap;
use std::fmt::Write;

use crate::bytecode::OpCode;

/// Instruction-level execution statistics
#[derive(Debug, Default)]
pub struct Profiler {
    enabled: bool,
    total: u64,
    counts: HashMap<OpCode, u64>,
    max_stack_depth: usize,
    max_frame_depth: usize,
}

impl Profiler {
    /// Create a disabled profiler
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an enabled profiler
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Record one dispatched instruction and the depths observed at its fetch
    pub fn record(&mut self, op_code: OpCode, stack_depth: usize, frame_depth: usize) {
        if !self.enabled {
            return;
        }
        self.total += 1;
        *self.counts.entry(op_code).or_insert(0) += 1;
        self.max_stack_depth = self.max_stack_depth.max(stack_depth);
        self.max_frame_depth = self.max_frame_depth.max(frame_depth);
    }

    pub fn total_instructions(&self) -> u64 {
        self.total
    }

    pub fn instruction_count(&self, op_code: OpCode) -> u64 {
        self.counts.get(&op_code).copied().unwrap_or(0)
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub fn max_frame_depth(&self) -> usize {
        self.max_frame_depth
    }

    /// Clear all recorded statistics (keeps the enabled flag)
    pub fn reset(&mut self) {
        self.total = 0;
        self.counts.clear();
        self.max_stack_depth = 0;
        self.max_frame_depth = 0;
    }

    /// Human-readable summary, opcodes sorted by count descending
    pub fn report(&self) -> String {
        if !self.enabled && self.total == 0 {
            return "profiler not enabled".to_string();
        }
        let mut output = String::new();
        writeln!(output, "instructions: {}", self.total).unwrap();
        writeln!(output, "peak operand stack: {}", self.max_stack_depth).unwrap();
        writeln!(output, "peak call depth: {}", self.max_frame_depth).unwrap();

        let mut counts: Vec<(OpCode, u64)> =
            self.counts.iter().map(|(op, n)| (*op, *n)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| format!("{}", a.0).cmp(&format!("{}", b.0))));
        for (op, n) in counts {
            writeln!(output, "  {:<18} {}", op.to_string(), n).unwrap();
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_records_nothing() {
        let mut profiler = Profiler::new();
        profiler.record(OpCode::Push, 3, 1);
        assert_eq!(profiler.total_instructions(), 0);
    }

    #[test]
    fn test_record_counts_and_depths() {
        let mut profiler = Profiler::enabled();
        profiler.record(OpCode::Push, 2, 1);
        profiler.record(OpCode::Push, 5, 2);
        profiler.record(OpCode::Assign, 4, 2);

        assert_eq!(profiler.total_instructions(), 3);
        assert_eq!(profiler.instruction_count(OpCode::Push), 2);
        assert_eq!(profiler.instruction_count(OpCode::Assign), 1);
        assert_eq!(profiler.instruction_count(OpCode::Call), 0);
        assert_eq!(profiler.max_stack_depth(), 5);
        assert_eq!(profiler.max_frame_depth(), 2);
    }

    #[test]
    fn test_reset_clears_stats() {
        let mut profiler = Profiler::enabled();
        profiler.record(OpCode::Push, 1, 1);
        profiler.reset();
        assert_eq!(profiler.total_instructions(), 0);
        assert!(profiler.is_enabled());
    }

    #[test]
    fn test_report_mentions_counts() {
        let mut profiler = Profiler::enabled();
        profiler.record(OpCode::Push, 1, 1);
        let report = profiler.report();
        assert!(report.contains("instructions: 1"));
        assert!(report.contains("Push"));
    }
}
