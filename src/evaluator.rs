//! Test battery evaluator
//!
//! Runs inside the sandbox, after the script channel. Tests run in
//! battery order against the shared execution context, so assertions see
//! every mutation and variable the script produced. Each assertion is
//! isolated: a fault fails its own test and the battery moves on.

use crate::engine::ExecutionContext;
use crate::model::{TestBattery, TestOutcome};

/// Evaluate every test in the battery. `emit` fires once per test, in
/// order, as each outcome resolves; the sandbox runner uses it to stream
/// test-result messages before the battery finishes.
pub fn evaluate_battery(
    ctx: &mut ExecutionContext,
    battery: &TestBattery,
    mut emit: impl FnMut(usize, &TestOutcome),
) -> Vec<TestOutcome> {
    let mut outcomes = Vec::with_capacity(battery.tests.len());
    for (index, test) in battery.tests.iter().enumerate() {
        let outcome = match ctx.eval_assertion(&test.assertion) {
            Ok(value) if value.truthy() => TestOutcome::passed(test.name.as_str()),
            Ok(value) => TestOutcome::failed(test.name.as_str(), "expected a truthy result")
                .with_captured_value(value.render()),
            Err(fault) => TestOutcome::failed(test.name.as_str(), fault.message),
        };
        emit(index, &outcome);
        outcomes.push(outcome);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestCase;

    fn battery(tests: Vec<TestCase>) -> TestBattery {
        TestBattery::new("demo", 1, tests)
    }

    #[test]
    fn test_pass_and_fail_outcomes() {
        let mut ctx = ExecutionContext::prepare("<h1>hi</h1>", "");
        let battery = battery(vec![
            TestCase::new("has heading", "exists('h1')"),
            TestCase::new("has paragraph", "exists('p')"),
        ]);
        let outcomes = evaluate_battery(&mut ctx, &battery, |_, _| {});
        assert!(outcomes[0].passed);
        assert_eq!(outcomes[0].message, "passed");
        assert!(!outcomes[1].passed);
        assert_eq!(outcomes[1].message, "expected a truthy result");
        assert_eq!(outcomes[1].captured_value.as_deref(), Some("false"));
    }

    #[test]
    fn test_fault_fails_only_its_own_test() {
        let mut ctx = ExecutionContext::prepare("<h1>hi</h1>", "");
        let battery = battery(vec![
            TestCase::new("first", "exists('h1')"),
            TestCase::new("second", "boom()"),
            TestCase::new("third", "count('h1') == 1"),
        ]);
        let outcomes = evaluate_battery(&mut ctx, &battery, |_, _| {});
        assert!(outcomes[0].passed);
        assert!(!outcomes[1].passed);
        assert_eq!(outcomes[1].message, "unknown function: boom");
        assert!(outcomes[1].captured_value.is_none());
        assert!(outcomes[2].passed);
    }

    #[test]
    fn test_emit_streams_in_battery_order() {
        let mut ctx = ExecutionContext::prepare("", "");
        let battery = battery(vec![
            TestCase::new("a", "true"),
            TestCase::new("b", "false"),
        ]);
        let mut seen = Vec::new();
        evaluate_battery(&mut ctx, &battery, |index, outcome| {
            seen.push((index, outcome.passed));
        });
        assert_eq!(seen, vec![(0, true), (1, false)]);
    }

    #[test]
    fn test_script_state_visible() {
        let mut ctx = ExecutionContext::prepare("<div id=\"app\"></div>", "");
        ctx.run_script("append('#app', 'span'); let marker = 'ok'").unwrap();
        let battery = battery(vec![
            TestCase::new("span added", "count('#app span') == 1"),
            TestCase::new("marker set", "marker == 'ok'"),
        ]);
        let outcomes = evaluate_battery(&mut ctx, &battery, |_, _| {});
        assert!(outcomes.iter().all(|o| o.passed));
    }

    #[test]
    fn test_empty_battery_yields_nothing() {
        let mut ctx = ExecutionContext::prepare("", "");
        let outcomes = evaluate_battery(&mut ctx, &battery(vec![]), |_, _| {
            panic!("emit must not fire");
        });
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_captured_value_renderings() {
        let mut ctx = ExecutionContext::prepare("", "");
        let battery = battery(vec![
            TestCase::new("zero", "0"),
            TestCase::new("empty", "''"),
            TestCase::new("null", "text('h1')"),
        ]);
        let outcomes = evaluate_battery(&mut ctx, &battery, |_, _| {});
        assert_eq!(outcomes[0].captured_value.as_deref(), Some("0"));
        assert_eq!(outcomes[1].captured_value.as_deref(), Some(""));
        assert_eq!(outcomes[2].captured_value.as_deref(), Some("null"));
    }
}
