use trialgate_types::EfficiencyScore;

use crate::config::EfficiencySettings;
use crate::watcher::WatcherSummary;

/// Fold the watcher's failure bookkeeping into an EfficiencyScore. The
/// penalty parameters are baked into the score so it stays self-describing
/// after persistence.
pub fn evaluate_efficiency(
    summary: &WatcherSummary,
    settings: &EfficiencySettings,
) -> EfficiencyScore {
    EfficiencyScore {
        total_gate_failures: summary.failed,
        unique_failure_categories: summary.unique_failure_categories,
        repeat_failures: summary.repeat_failures,
        max_gate_failures: settings.max_gate_failures,
        repeat_penalty: settings.repeat_penalty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(failed: u32, repeats: u32) -> WatcherSummary {
        WatcherSummary {
            total_gates: failed + 1,
            passed: 1,
            failed,
            unique_failure_categories: failed.min(2),
            repeat_failures: repeats,
            terminated_early: false,
        }
    }

    #[test]
    fn clean_run_scores_one() {
        let score = evaluate_efficiency(&summary(0, 0), &EfficiencySettings::default());
        assert_eq!(score.score(), 1.0);
    }

    #[test]
    fn failures_and_repeats_degrade_linearly() {
        let settings = EfficiencySettings::default();
        let two_failures = evaluate_efficiency(&summary(2, 0), &settings);
        assert_eq!(two_failures.score(), 0.5);

        let with_repeat = evaluate_efficiency(&summary(2, 1), &settings);
        assert_eq!(with_repeat.score(), 0.3);
    }
}
