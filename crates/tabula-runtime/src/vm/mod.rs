//! Stack-based virtual machine
//!
//! Executes a bootstrap against an operand stack, a stack of nested scope
//! tables, and a call stack of activation records.
//! - Multi-value results live on the operand stack as value runs topped by
//!   counter slots
//! - Name lookup sees only the scope tables the current frame has pushed;
//!   outer names reach a callee through its closure's upvalue table
//! - `Call`/`Ret` redirect the instruction pointer by swapping the shared
//!   code handle

mod frame;
mod profiler;
mod stack;

pub use frame::CallRecord;
pub use profiler::Profiler;
pub use stack::{OperandStack, Slot};

use std::rc::Rc;

use crate::bytecode::{Bootstrap, CodeRef, Instruction, OpCode, Param};
use crate::config::VmLimits;
use crate::pool::DataPool;
use crate::value::{RuntimeError, TableRef, Value};

/// Virtual machine state
///
/// One instance owns its operand stack, scope stack, call stack, and data
/// pool outright; execution is single-threaded and synchronous. Global
/// bindings persist across `run` calls, so a host can execute several
/// bootstraps against one VM.
pub struct Vm {
    /// Operand stack (values and counters)
    stack: OperandStack,
    /// Nested scope tables, innermost last
    scopes: Vec<TableRef>,
    /// Activation records, current frame last
    frames: Vec<CallRecord>,
    /// Value factories and string interner
    pool: DataPool,
    /// The global table, pushed as a scope by `AddGlobalTable`
    global: TableRef,
    /// Currently executing instruction sequence
    code: CodeRef,
    /// Instruction offset into `code`
    ///
    /// Signed: `Call` parks it at −1 so the loop's post-increment fetches
    /// the callee's first instruction.
    ip: isize,
    /// Built-in single-`Ret` sequence executed after a native call
    native_ret: CodeRef,
    /// Resource ceilings
    limits: VmLimits,
    /// Optional instruction-level statistics
    profiler: Option<Profiler>,
}

impl Vm {
    /// Create a VM with default limits
    pub fn new() -> Self {
        Self::with_limits(VmLimits::default())
    }

    /// Create a VM with explicit resource ceilings
    pub fn with_limits(limits: VmLimits) -> Self {
        let mut pool = DataPool::new();
        let global = pool.table();

        let mut ret = Bootstrap::new();
        ret.emit(OpCode::Ret);

        Self {
            stack: OperandStack::new(),
            scopes: Vec::new(),
            frames: Vec::new(),
            pool,
            global,
            code: Rc::from(Vec::new()),
            ip: 0,
            native_ret: ret.into_code(),
            limits,
            profiler: None,
        }
    }

    /// Create a VM with profiling enabled
    pub fn with_profiling() -> Self {
        let mut vm = Self::new();
        vm.profiler = Some(Profiler::enabled());
        vm
    }

    /// Execute a bootstrap until the instruction pointer walks off the end
    ///
    /// An error unwinds the whole activation; the operand, scope, and call
    /// stacks are left as the failing instruction saw them, which
    /// [`Vm::stack_trace`] can render.
    pub fn run(&mut self, bootstrap: &Bootstrap) -> Result<(), RuntimeError> {
        self.code = bootstrap.code();
        self.ip = 0;

        while self.ip < self.code.len() as isize {
            if self.stack.len() > self.limits.max_stack_slots {
                return Err(RuntimeError::StackOverflow);
            }

            // The handlers may replace `self.code`; keep this fetch's
            // sequence alive across the call.
            let code = Rc::clone(&self.code);
            let ins = &code[self.ip as usize];

            if let Some(profiler) = &mut self.profiler {
                profiler.record(ins.op_code, self.stack.len(), self.frames.len());
            }

            self.execute(ins)?;
            self.ip += 1;
        }
        Ok(())
    }

    fn execute(&mut self, ins: &Instruction) -> Result<(), RuntimeError> {
        match ins.op_code {
            OpCode::Push => self.op_push(ins),
            OpCode::CleanStack => self.op_clean_stack(),
            OpCode::GetLocalTable => self.op_get_local_table(),
            OpCode::GetTable => self.op_get_table(ins),
            OpCode::GetTableValue => self.op_get_table_value(ins),
            OpCode::Assign => self.op_assign(),
            OpCode::GenerateClosure => self.op_generate_closure(ins),
            OpCode::Call => self.op_call(),
            OpCode::Ret => self.op_ret(),
            OpCode::GenerateArgTable => self.op_generate_arg_table(),
            OpCode::MergeCounter => self.op_merge_counter(),
            OpCode::ResetCounter => self.op_reset_counter(),
            OpCode::DuplicateCounter => self.op_duplicate_counter(),
            OpCode::AddLocalTable => self.op_add_local_table(),
            OpCode::DelLocalTable => self.op_del_local_table(),
            OpCode::AddGlobalTable => self.op_add_global_table(),
            OpCode::DelGlobalTable => self.op_del_global_table(),
        }
    }

    // ===== Operand stack =====

    fn op_push(&mut self, ins: &Instruction) -> Result<(), RuntimeError> {
        match &ins.param {
            Some(Param::Name(value)) | Some(Param::Value(value)) => {
                self.stack.push_value(value.clone());
                Ok(())
            }
            Some(Param::Counter(total)) => {
                self.stack.push_counter(*total, 0);
                Ok(())
            }
            _ => Err(RuntimeError::BadParameter {
                op_code: OpCode::Push,
            }),
        }
    }

    fn op_clean_stack(&mut self) -> Result<(), RuntimeError> {
        let (_current, total) = self.stack.counter_at(-1)?;
        // Pop the counter, then the values beneath it.
        self.stack.pop(1);
        if total > 0 {
            self.stack.pop(total);
        }
        Ok(())
    }

    // ===== Name resolution =====

    fn op_get_local_table(&mut self) -> Result<(), RuntimeError> {
        let table = self.scopes.last().cloned().ok_or(RuntimeError::StackShape {
            expected: "an open scope table",
        })?;
        self.stack.push_value(Value::Table(table));
        self.stack.push_counter(1, 0);
        Ok(())
    }

    fn op_get_table(&mut self, ins: &Instruction) -> Result<(), RuntimeError> {
        let key = match &ins.param {
            Some(Param::Name(name)) => name.clone(),
            _ => {
                return Err(RuntimeError::BadParameter {
                    op_code: OpCode::GetTable,
                })
            }
        };

        let (callee_tables, callee) = {
            let frame = self.current_frame()?;
            (frame.callee_tables, frame.callee.clone())
        };

        // Only the scope tables this frame pushed are visible.
        for table in self.scopes.iter().rev().take(callee_tables) {
            if table.borrow().contains_key(&key) {
                let found = Rc::clone(table);
                self.stack.push_value(Value::Table(found));
                self.stack.push_counter(1, 0);
                return Ok(());
            }
        }

        // Unresolved names fall back to the closure's upvalue table, or to
        // the frame's outermost visible scope (the global table at top
        // level). Missing-key semantics are deferred to the actual lookup.
        let upvalue_table = match &callee {
            Some(Value::Closure(closure)) => closure.upvalue_table().cloned(),
            _ => None,
        };
        let target = match upvalue_table {
            Some(table) => table,
            None => self.outermost_visible_scope(callee_tables)?,
        };
        self.stack.push_value(Value::Table(target));
        self.stack.push_counter(1, 0);
        Ok(())
    }

    fn op_get_table_value(&mut self, ins: &Instruction) -> Result<(), RuntimeError> {
        let counter_index = match &ins.param {
            Some(Param::CounterIndex(ci)) => *ci,
            _ => {
                return Err(RuntimeError::BadParameter {
                    op_code: OpCode::GetTableValue,
                })
            }
        };

        // Walk down past `counter_index` counter runs to the addressed
        // (table, counter) pair.
        let mut index: isize = -1;
        for _ in 0..counter_index {
            index -= 1;
            let (_current, total) = self.stack.counter_at(index)?;
            index -= total as isize;
        }
        self.stack.counter_at(index - 1)?;

        let target = self.stack.value_at(index - 2)?.clone();
        let table = match target {
            Value::Table(table) => table,
            other => {
                return Err(RuntimeError::IndexNonTable {
                    type_name: other.type_name(),
                })
            }
        };

        let key = self.stack.value_at(-1)?.clone();
        let value = table.borrow().get(&key);

        // Replace the table slot with the looked-up value, then drop the key.
        self.stack.set_slot(index - 2, Slot::Value(value))?;
        self.stack.pop(1);
        Ok(())
    }

    fn op_assign(&mut self) -> Result<(), RuntimeError> {
        let key = self.stack.value_at(-1)?.clone();
        // Pop the key and the target table's counter.
        self.stack.pop(2);

        let target = self.stack.value_at(-1)?.clone();
        self.stack.pop(1);

        // One value is consumed from the right-hand-side counter per key;
        // past its total the assignment pads with nil.
        let (current, total) = self.stack.counter_at(-1)?;
        let mut value = Value::Nil;
        if current < total {
            let index = current as isize - total as isize - 1;
            value = self.stack.value_at(index)?.clone();
            self.stack.advance_counter(-1)?;
        }

        let table = match target {
            Value::Table(table) => table,
            other => {
                return Err(RuntimeError::IndexNonTable {
                    type_name: other.type_name(),
                })
            }
        };
        let result = table.borrow_mut().assign(&key, value);
        result
    }

    // ===== Functions =====

    fn op_generate_closure(&mut self, ins: &Instruction) -> Result<(), RuntimeError> {
        let function = match &ins.param {
            Some(Param::Value(Value::Function(function))) => Rc::clone(function),
            _ => {
                return Err(RuntimeError::BadParameter {
                    op_code: OpCode::GenerateClosure,
                })
            }
        };

        let closure = self.pool.closure(&function);
        self.stack.push_value(Value::Closure(Rc::clone(&closure)));
        self.stack.push_counter(1, 0);

        // Upvalues are captured by value, here and now: later mutation of the
        // owning scope does not reach the closure.
        if let Some(upvalues) = closure.upvalue_table() {
            for name in function.upvalue_names() {
                let owner = self.upvalue_owner_table(name)?;
                let captured = owner.borrow().get(name);
                upvalues.borrow_mut().assign(name, captured)?;
            }
        }
        Ok(())
    }

    fn op_call(&mut self) -> Result<(), RuntimeError> {
        let (_current, arg_total) = self.stack.counter_at(-1)?;

        let mut index = -1 - arg_total as isize;
        index -= 1;
        let (_cc, callee_total) = self.stack.counter_at(index)?;
        if callee_total != 1 {
            return Err(RuntimeError::StackShape {
                expected: "a callee counter of one",
            });
        }
        index -= 1;
        let callee = self.stack.value_at(index)?.clone();

        if self.frames.len() >= self.limits.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded);
        }
        self.frames
            .push(CallRecord::new(Rc::clone(&self.code), self.ip, callee.clone()));

        match callee {
            Value::Closure(closure) => {
                // Park the pointer at −1; the loop's post-increment makes the
                // next fetch the callee's instruction 0.
                self.code = Rc::clone(closure.code());
                self.ip = -1;
            }
            Value::Native(native) => {
                // Natives run to completion synchronously, then the built-in
                // Ret sequence performs the symmetric return.
                let mut ctx = NativeContext {
                    stack: &mut self.stack,
                    pool: &mut self.pool,
                };
                native.call(&mut ctx)?;
                self.code = Rc::clone(&self.native_ret);
                self.ip = -1;
            }
            other => {
                return Err(RuntimeError::CallNonFunction {
                    type_name: other.type_name(),
                })
            }
        }
        Ok(())
    }

    fn op_ret(&mut self) -> Result<(), RuntimeError> {
        let record = self.frames.pop().ok_or(RuntimeError::StackShape {
            expected: "an active call record",
        })?;
        self.code = record.caller_code;
        self.ip = record.caller_ip;

        let depth = self
            .scopes
            .len()
            .checked_sub(record.callee_tables)
            .ok_or(RuntimeError::StackShape {
                expected: "the callee's scope tables",
            })?;
        self.scopes.truncate(depth);
        Ok(())
    }

    fn op_generate_arg_table(&mut self) -> Result<(), RuntimeError> {
        let (current, total) = self.stack.counter_at(-1)?;
        let unconsumed = total.saturating_sub(current);

        let arg = self.pool.table();
        let mut index = -1 - unconsumed as isize;
        let mut arg_index = 1;
        for _ in 0..unconsumed {
            let key = self.pool.number(arg_index as f64);
            let value = self.stack.value_at(index)?.clone();
            arg.borrow_mut().assign(&key, value)?;
            index += 1;
            arg_index += 1;
        }
        self.stack.finish_counter(-1)?;

        let name = self.pool.string("arg");
        let local = self.scopes.last().cloned().ok_or(RuntimeError::StackShape {
            expected: "an open scope table",
        })?;
        let result = local.borrow_mut().assign(&name, Value::Table(arg));
        result
    }

    // ===== Counter protocol =====

    fn op_merge_counter(&mut self) -> Result<(), RuntimeError> {
        let (_c1, upper_total) = self.stack.counter_at(-1)?;
        let mut index = -1 - upper_total as isize - 1;
        let (_c2, lower_total) = self.stack.counter_at(index)?;

        // Shift the upper run down over the lower run's counter slot.
        for _ in 0..upper_total {
            let slot = self
                .stack
                .get(index + 1)
                .cloned()
                .ok_or(RuntimeError::StackShape {
                    expected: "an addressable slot",
                })?;
            self.stack.set_slot(index, slot)?;
            index += 1;
        }

        self.stack.pop(2);
        self.stack.push_counter(lower_total + upper_total, 0);
        Ok(())
    }

    fn op_reset_counter(&mut self) -> Result<(), RuntimeError> {
        let (_current, total) = self.stack.counter_at(-1)?;
        if total == 1 {
            return Ok(());
        }

        self.stack.pop(1);
        if total == 0 {
            self.stack.push_value(Value::Nil);
        } else {
            self.stack.pop(total - 1);
        }
        self.stack.push_counter(1, 0);
        Ok(())
    }

    fn op_duplicate_counter(&mut self) -> Result<(), RuntimeError> {
        let (_current, total) = self.stack.counter_at(-1)?;

        // Absolute index of the run's first value; stays valid while pushes
        // grow the stack above it.
        let mut index = self.stack.len() as isize - total as isize - 1;
        for _ in 0..total {
            let slot = self
                .stack
                .get(index)
                .cloned()
                .ok_or(RuntimeError::StackShape {
                    expected: "an addressable slot",
                })?;
            self.stack.push_slot(slot);
            index += 1;
        }
        self.stack.push_counter(total, 0);
        Ok(())
    }

    // ===== Scope tables =====

    fn op_add_local_table(&mut self) -> Result<(), RuntimeError> {
        let table = self.pool.table();
        self.scopes.push(table);
        self.current_frame_mut()?.callee_tables += 1;
        Ok(())
    }

    fn op_del_local_table(&mut self) -> Result<(), RuntimeError> {
        self.scopes.pop().ok_or(RuntimeError::StackShape {
            expected: "an open scope table",
        })?;
        let frame = self.current_frame_mut()?;
        frame.callee_tables =
            frame
                .callee_tables
                .checked_sub(1)
                .ok_or(RuntimeError::StackShape {
                    expected: "the callee's scope tables",
                })?;
        Ok(())
    }

    fn op_add_global_table(&mut self) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded);
        }
        self.scopes.push(Rc::clone(&self.global));
        self.frames.push(CallRecord::sentinel());
        Ok(())
    }

    fn op_del_global_table(&mut self) -> Result<(), RuntimeError> {
        self.scopes.pop().ok_or(RuntimeError::StackShape {
            expected: "an open scope table",
        })?;
        self.frames.pop().ok_or(RuntimeError::StackShape {
            expected: "an active call record",
        })?;
        Ok(())
    }

    // ===== Helpers =====

    fn current_frame(&self) -> Result<&CallRecord, RuntimeError> {
        self.frames.last().ok_or(RuntimeError::StackShape {
            expected: "an active call record",
        })
    }

    fn current_frame_mut(&mut self) -> Result<&mut CallRecord, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::StackShape {
            expected: "an active call record",
        })
    }

    /// The outermost of the current frame's visible scope tables
    fn outermost_visible_scope(&self, callee_tables: usize) -> Result<TableRef, RuntimeError> {
        let index = self
            .scopes
            .len()
            .checked_sub(callee_tables)
            .filter(|_| callee_tables > 0)
            .ok_or(RuntimeError::StackShape {
                expected: "the frame's scope tables",
            })?;
        self.scopes
            .get(index)
            .cloned()
            .ok_or(RuntimeError::StackShape {
                expected: "the frame's scope tables",
            })
    }

    /// Find (or create) the table owning `key` for upvalue capture
    ///
    /// Search order: the current frame's visible scopes innermost outward,
    /// then the enclosing closure's upvalue table (which must contain the
    /// key by construction), and at the global frame the key is bound as nil
    /// in the outermost visible scope so every declared upvalue has an owner.
    fn upvalue_owner_table(&mut self, key: &Value) -> Result<TableRef, RuntimeError> {
        let (callee_tables, callee) = {
            let frame = self.current_frame()?;
            (frame.callee_tables, frame.callee.clone())
        };

        for table in self.scopes.iter().rev().take(callee_tables) {
            if table.borrow().contains_key(key) {
                return Ok(Rc::clone(table));
            }
        }

        if let Some(Value::Closure(enclosing)) = &callee {
            let table = enclosing
                .upvalue_table()
                .filter(|t| t.borrow().contains_key(key))
                .ok_or_else(|| RuntimeError::MissingUpvalue {
                    name: key.to_string(),
                })?;
            return Ok(Rc::clone(table));
        }

        debug_assert_eq!(callee_tables, 1);
        let table = self.outermost_visible_scope(callee_tables)?;
        table.borrow_mut().assign(key, Value::Nil)?;
        Ok(table)
    }

    // ===== Inspection =====

    /// The operand stack, for natives' tests and host inspection
    pub fn stack(&self) -> &OperandStack {
        &self.stack
    }

    /// Current scope-table depth
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Current call-stack depth
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// The global table
    pub fn global(&self) -> &TableRef {
        &self.global
    }

    pub fn pool(&self) -> &DataPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut DataPool {
        &mut self.pool
    }

    pub fn limits(&self) -> VmLimits {
        self.limits
    }

    pub fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    pub fn profiler_mut(&mut self) -> Option<&mut Profiler> {
        self.profiler.as_mut()
    }

    /// Frame names innermost first, synthesized from the call records
    pub fn stack_trace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|record| match &record.callee {
                None => "<main>".to_string(),
                Some(Value::Closure(closure)) => closure
                    .function()
                    .name()
                    .unwrap_or("<anonymous>")
                    .to_string(),
                Some(Value::Native(native)) => native.name().to_string(),
                Some(other) => format!("<{}>", other.type_name()),
            })
            .collect()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// What a native function sees while it runs
///
/// The argument counter is on top of the stack when the body starts; `args`
/// reads the unconsumed values beneath it and `ret` pushes the return run.
pub struct NativeContext<'a> {
    pub stack: &'a mut OperandStack,
    pub pool: &'a mut DataPool,
}

impl NativeContext<'_> {
    /// The unconsumed argument values, left to right
    pub fn args(&self) -> Result<Vec<Value>, RuntimeError> {
        let (current, total) = self.stack.counter_at(-1)?;
        let unconsumed = total.saturating_sub(current);

        let mut args = Vec::with_capacity(unconsumed);
        let mut index = -1 - unconsumed as isize;
        for _ in 0..unconsumed {
            args.push(self.stack.value_at(index)?.clone());
            index += 1;
        }
        Ok(args)
    }

    /// Push return values topped with their counter
    pub fn ret(&mut self, values: Vec<Value>) {
        let total = values.len();
        for value in values {
            self.stack.push_value(value);
        }
        self.stack.push_counter(total, 0);
    }
}
