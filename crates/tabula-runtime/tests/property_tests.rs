//! Property-based tests for the counter protocol and stack discipline
//!
//! A tiny model compiler (the strategies below) emits random valid
//! instruction streams; the properties check the invariants the real
//! compiler relies on.

use proptest::prelude::*;
use std::rc::Rc;
use tabula_runtime::{Bootstrap, Function, OpCode, Slot, Value, Vm};

// ============================================================================
// Model compiler
// ============================================================================

fn value_run() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1000.0..1000.0f64, 0..6)
}

fn push_run(boot: &mut Bootstrap, run: &[f64]) {
    for n in run {
        boot.push_value(Value::Number(*n));
    }
    boot.push_counter(run.len());
}

fn run_vm(boot: &Bootstrap) -> Vm {
    let mut vm = Vm::new();
    vm.run(boot).expect("bootstrap failed");
    vm
}

/// The slots a sequence of runs merged into one should produce
fn merged_slots(runs: &[Vec<f64>]) -> Vec<Slot> {
    let mut slots: Vec<Slot> = runs
        .iter()
        .flatten()
        .map(|n| Slot::Value(Value::Number(*n)))
        .collect();
    let total = slots.len();
    slots.push(Slot::Counter { current: 0, total });
    slots
}

/// Top counter describes value slots only
fn counter_integrity_holds(vm: &Vm) -> bool {
    match vm.stack().counter_at(-1) {
        Ok((_current, total)) => {
            (0..total).all(|i| matches!(vm.stack().get(-2 - i as isize), Some(Slot::Value(_))))
        }
        Err(_) => true,
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn reset_counter_is_idempotent(values in value_run()) {
        let mut once = Bootstrap::new();
        push_run(&mut once, &values);
        once.emit(OpCode::ResetCounter);

        let mut twice = Bootstrap::new();
        push_run(&mut twice, &values);
        twice.emit(OpCode::ResetCounter);
        twice.emit(OpCode::ResetCounter);

        let once = run_vm(&once);
        let twice = run_vm(&twice);
        prop_assert_eq!(once.stack().slots(), twice.stack().slots());

        // Either way the result is exactly one value under a counter of one.
        prop_assert_eq!(once.stack().len(), 2);
        prop_assert_eq!(once.stack().counter_at(-1).unwrap(), (0, 1));
        prop_assert!(counter_integrity_holds(&once));
    }

    #[test]
    fn merge_counter_is_associative(
        a in value_run(),
        b in value_run(),
        c in value_run(),
    ) {
        // (a · b) · c
        let mut left = Bootstrap::new();
        push_run(&mut left, &a);
        push_run(&mut left, &b);
        left.emit(OpCode::MergeCounter);
        push_run(&mut left, &c);
        left.emit(OpCode::MergeCounter);

        // a · (b · c)
        let mut right = Bootstrap::new();
        push_run(&mut right, &a);
        push_run(&mut right, &b);
        push_run(&mut right, &c);
        right.emit(OpCode::MergeCounter);
        right.emit(OpCode::MergeCounter);

        let left = run_vm(&left);
        let right = run_vm(&right);
        prop_assert_eq!(left.stack().slots(), right.stack().slots());
        let merged = merged_slots(&[a, b, c]);
        prop_assert_eq!(left.stack().slots(), merged.as_slice());
        prop_assert!(counter_integrity_holds(&left));
    }

    #[test]
    fn clean_stack_removes_run_and_counter(values in value_run()) {
        let mut boot = Bootstrap::new();
        push_run(&mut boot, &values);
        boot.emit(OpCode::CleanStack);
        let vm = run_vm(&boot);
        prop_assert!(vm.stack().is_empty());
    }

    #[test]
    fn multiple_assignment_truncates_or_pads(
        values in value_run(),
        key_count in 1usize..5,
    ) {
        let mut boot = Bootstrap::new();
        boot.emit(OpCode::AddGlobalTable);
        push_run(&mut boot, &values);
        for i in 0..key_count {
            boot.emit(OpCode::GetLocalTable);
            boot.push_name(Value::string(format!("k{}", i)));
            boot.emit(OpCode::Assign);
        }
        let vm = run_vm(&boot);

        // Each Assign removed exactly three slots (key, table counter,
        // table), leaving the advancing RHS counter in place.
        prop_assert_eq!(vm.stack().len(), values.len() + 1);
        prop_assert_eq!(
            vm.stack().counter_at(-1).unwrap(),
            (key_count.min(values.len()), values.len())
        );
        prop_assert!(counter_integrity_holds(&vm));

        // First min(K, N) keys got real values, the rest nil.
        for i in 0..key_count {
            let bound = vm.global().borrow().get(&Value::string(format!("k{}", i)));
            if i < values.len() {
                prop_assert_eq!(bound, Value::Number(values[i]));
            } else {
                prop_assert_eq!(bound, Value::Nil);
            }
        }
    }

    #[test]
    fn call_ret_restores_scope_and_call_depth(
        (opened, closed) in (0usize..4).prop_flat_map(|opened| (Just(opened), 0..=opened)),
    ) {
        // Callee opens `opened` scope tables and closes only `closed` of
        // them; Ret trims the remainder.
        let mut body = Bootstrap::new();
        for _ in 0..opened {
            body.emit(OpCode::AddLocalTable);
        }
        for _ in 0..closed {
            body.emit(OpCode::DelLocalTable);
        }
        body.push_counter(0);
        body.emit(OpCode::Ret);
        let f = Value::Function(Rc::new(Function::new(body.into_code())));

        let mut boot = Bootstrap::new();
        boot.emit(OpCode::AddGlobalTable);
        boot.generate_closure(f);
        boot.push_counter(0);
        boot.emit(OpCode::Call);
        boot.emit(OpCode::CleanStack); // empty return run
        boot.emit(OpCode::CleanStack); // argument counter
        boot.emit(OpCode::CleanStack); // callee run
        let vm = run_vm(&boot);

        prop_assert_eq!(vm.scope_depth(), 1);
        prop_assert_eq!(vm.frame_depth(), 1);
        prop_assert!(vm.stack().is_empty());
    }

    #[test]
    fn duplicate_counter_leaves_original_intact(values in value_run()) {
        let mut boot = Bootstrap::new();
        push_run(&mut boot, &values);
        boot.emit(OpCode::DuplicateCounter);
        let vm = run_vm(&boot);

        let n = values.len();
        prop_assert_eq!(vm.stack().len(), 2 * (n + 1));
        prop_assert_eq!(vm.stack().counter_at(-1).unwrap(), (0, n));
        prop_assert_eq!(
            vm.stack().counter_at(-(n as isize) - 2).unwrap(),
            (0, n)
        );
        for (i, value) in values.iter().enumerate() {
            // Copy, from the top.
            prop_assert_eq!(
                vm.stack().value_at(-2 - (n - 1 - i) as isize).unwrap(),
                &Value::Number(*value)
            );
            // Original, by absolute position.
            prop_assert_eq!(
                vm.stack().value_at(i as isize).unwrap(),
                &Value::Number(*value)
            );
        }
        prop_assert!(counter_integrity_holds(&vm));
    }
}
