use std::path::Path;

use regex::Regex;
use tracing::debug;
use trialgate_types::FunctionalScore;

use crate::config::TimeoutSettings;
use crate::process::run_command;

/// Extract (passed, total) counts from test runner output. Understands the
/// common "N pass" / "N fail" summary lines.
pub fn parse_test_output(stdout: &str, stderr: &str) -> (u32, u32) {
    let output = format!("{}{}", stdout, stderr);
    let pass_re = Regex::new(r"(\d+) pass").unwrap();
    let fail_re = Regex::new(r"(\d+) fail").unwrap();

    let passed = pass_re
        .captures(&output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0u32);
    let failed = fail_re
        .captures(&output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0u32);

    (passed, passed + failed)
}

/// Run the task's build and test commands and reduce them to a
/// FunctionalScore. A missing build command counts as a succeeding build so
/// test-only tasks still score.
pub async fn evaluate_functional(
    workspace: &Path,
    build_command: Option<&[String]>,
    test_command: Option<&[String]>,
    timeouts: &TimeoutSettings,
) -> FunctionalScore {
    let build_succeeded = match build_command {
        Some(argv) => run_command(argv, workspace, timeouts.build).await.success(),
        None => true,
    };

    let (all_passed, tests_passed, tests_total) = match test_command {
        Some(argv) => {
            let outcome = run_command(argv, workspace, timeouts.test).await;
            let (passed, total) = parse_test_output(&outcome.stdout, &outcome.stderr);
            if total == 0 {
                // No tests discovered: the exit code alone decides.
                (outcome.success(), 0, 0)
            } else {
                (outcome.success() && passed == total, passed, total)
            }
        }
        None => (true, 0, 0),
    };

    debug!(build_succeeded, tests_passed, tests_total, "functional evaluation");

    FunctionalScore {
        passed: build_succeeded && all_passed,
        tests_passed,
        tests_total,
        build_succeeded,
        gates_passed: 0,
        gates_total: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_pass_and_fail_counts() {
        assert_eq!(parse_test_output("12 pass\n3 fail\n", ""), (12, 15));
        assert_eq!(parse_test_output("", "5 pass"), (5, 5));
        assert_eq!(parse_test_output("no summary here", ""), (0, 0));
    }

    #[tokio::test]
    async fn build_only_task_scores_on_exit_code() {
        let ok = evaluate_functional(
            Path::new("."),
            Some(&argv(&["sh", "-c", "exit 0"])),
            None,
            &TimeoutSettings::default(),
        )
        .await;
        assert!(ok.passed);
        assert_eq!(ok.score(), 1.0);

        let bad = evaluate_functional(
            Path::new("."),
            Some(&argv(&["sh", "-c", "exit 1"])),
            None,
            &TimeoutSettings::default(),
        )
        .await;
        assert!(!bad.build_succeeded);
        assert_eq!(bad.score(), 0.0);
    }

    #[tokio::test]
    async fn failing_tests_produce_ratio() {
        let score = evaluate_functional(
            Path::new("."),
            None,
            Some(&argv(&["sh", "-c", "echo '3 pass'; echo '1 fail'; exit 1"])),
            &TimeoutSettings::default(),
        )
        .await;
        assert!(!score.passed);
        assert_eq!(score.tests_passed, 3);
        assert_eq!(score.tests_total, 4);
        assert!((score.score() - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_tests_with_clean_exit_passes() {
        let score = evaluate_functional(
            Path::new("."),
            None,
            Some(&argv(&["sh", "-c", "echo 'no tests found'; exit 0"])),
            &TimeoutSettings::default(),
        )
        .await;
        assert!(score.passed);
        assert_eq!(score.tests_total, 0);
        assert_eq!(score.score(), 1.0);
    }
}
