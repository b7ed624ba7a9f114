//! Instruction-stream disassembler
//!
//! Converts a bootstrap to a human-readable assembly-like listing for
//! debugging and test output.

use std::fmt::Write;

use super::{Bootstrap, Param};
use crate::value::Value;

/// Disassemble a bootstrap to a listing, one instruction per line
///
/// # Format
/// ```text
/// 0000  AddGlobalTable
/// 0001  Push number 1
/// 0002  Push counter 1
/// 0003  GetTable name "x"
/// ```
pub fn disassemble(bootstrap: &Bootstrap) -> String {
    let mut output = String::new();
    for (offset, ins) in bootstrap.instructions().iter().enumerate() {
        write!(output, "{:04}  {}", offset, ins.op_code).unwrap();
        if let Some(param) = &ins.param {
            match param {
                Param::Name(v) => write!(output, " name {}", format_value(v)).unwrap(),
                Param::Value(v) => write!(output, " {} {}", v.type_name(), format_value(v)).unwrap(),
                Param::Counter(total) => write!(output, " counter {}", total).unwrap(),
                Param::CounterIndex(ci) => write!(output, " skip {}", ci).unwrap(),
            }
        }
        output.push('\n');
    }
    output
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s.as_str()),
        other => other.to_string(),
    }
}
