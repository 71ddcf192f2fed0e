//! Scorer
//!
//! Pure functions from outcomes to a score and a status. The same code
//! grades provisional runs, server re-runs, and revalidation comparisons,
//! so any two graders of the same outcomes agree exactly.

use crate::model::{AttemptStatus, Termination, TestBattery, TestOutcome};

/// Effective weights for a battery, in test order.
pub fn battery_weights(battery: &TestBattery) -> Vec<f64> {
    battery.tests.iter().map(|t| t.effective_weight()).collect()
}

/// Weighted pass percentage, clamped to [0, 100] and rounded to two
/// decimals. An empty battery scores 0.
pub fn score(outcomes: &[TestOutcome], weights: &[f64]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    let mut passed = 0.0;
    for (i, outcome) in outcomes.iter().enumerate() {
        // Missing weights (outcome list longer than the weight list)
        // count as 1.0, same as an unweighted test.
        let w = weights.get(i).copied().unwrap_or(1.0);
        total += w;
        if outcome.passed {
            passed += w;
        }
    }
    if total <= 0.0 {
        return 0.0;
    }
    round2((100.0 * passed / total).clamp(0.0, 100.0))
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Status for a graded run. Abnormal termination and empty batteries are
/// errors regardless of score; otherwise the score decides.
pub fn derive_status(score: f64, termination: Termination, outcome_count: usize) -> AttemptStatus {
    if termination != Termination::Completed || outcome_count == 0 {
        return AttemptStatus::Error;
    }
    if score == 100.0 {
        AttemptStatus::Pass
    } else {
        AttemptStatus::Fail
    }
}

/// Score and status for one run of a battery.
pub fn grade(
    battery: &TestBattery,
    outcomes: &[TestOutcome],
    termination: Termination,
) -> (f64, AttemptStatus) {
    let weights = battery_weights(battery);
    let score = score(outcomes, &weights);
    let status = derive_status(score, termination, outcomes.len());
    (score, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestCase;

    fn outcomes(flags: &[bool]) -> Vec<TestOutcome> {
        flags
            .iter()
            .enumerate()
            .map(|(i, &passed)| {
                if passed {
                    TestOutcome::passed(format!("t{}", i))
                } else {
                    TestOutcome::failed(format!("t{}", i), "expected a truthy result")
                }
            })
            .collect()
    }

    #[test]
    fn test_unweighted_score() {
        let w = [1.0, 1.0, 1.0];
        assert_eq!(score(&outcomes(&[true, true, true]), &w), 100.0);
        assert_eq!(score(&outcomes(&[true, true, false]), &w), 66.67);
        assert_eq!(score(&outcomes(&[true, false, false]), &w), 33.33);
        assert_eq!(score(&outcomes(&[false, false, false]), &w), 0.0);
    }

    #[test]
    fn test_weighted_score() {
        let w = [2.0, 1.0, 1.0];
        assert_eq!(score(&outcomes(&[true, false, false]), &w), 50.0);
        assert_eq!(score(&outcomes(&[false, true, true]), &w), 50.0);
        assert_eq!(score(&outcomes(&[true, true, false]), &w), 75.0);
    }

    #[test]
    fn test_missing_weights_default_to_one() {
        let w = [2.0];
        assert_eq!(score(&outcomes(&[true, false]), &w), 66.67);
    }

    #[test]
    fn test_empty_battery_scores_zero_and_errors() {
        assert_eq!(score(&[], &[]), 0.0);
        assert_eq!(
            derive_status(0.0, Termination::Completed, 0),
            AttemptStatus::Error
        );
    }

    #[test]
    fn test_status_from_score() {
        assert_eq!(
            derive_status(100.0, Termination::Completed, 2),
            AttemptStatus::Pass
        );
        assert_eq!(
            derive_status(66.67, Termination::Completed, 3),
            AttemptStatus::Fail
        );
        assert_eq!(
            derive_status(0.0, Termination::Completed, 1),
            AttemptStatus::Fail
        );
    }

    #[test]
    fn test_abnormal_termination_is_error_even_at_full_score() {
        assert_eq!(
            derive_status(100.0, Termination::Timeout, 2),
            AttemptStatus::Error
        );
        assert_eq!(
            derive_status(100.0, Termination::Fault, 2),
            AttemptStatus::Error
        );
    }

    #[test]
    fn test_grade_uses_battery_weights() {
        let battery = TestBattery::new(
            "demo",
            1,
            vec![
                TestCase::new("a", "true").with_weight(3.0),
                TestCase::new("b", "true"),
            ],
        );
        let (s, st) = grade(&battery, &outcomes(&[true, false]), Termination::Completed);
        assert_eq!(s, 75.0);
        assert_eq!(st, AttemptStatus::Fail);

        let (s, st) = grade(&battery, &outcomes(&[true, true]), Termination::Completed);
        assert_eq!(s, 100.0);
        assert_eq!(st, AttemptStatus::Pass);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(100.0), 100.0);
        assert_eq!(round2(0.005), 0.01);
    }
}
