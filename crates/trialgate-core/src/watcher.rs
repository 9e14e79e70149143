use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};
use trialgate_types::GateEvent;

use crate::config::GateSettings;
use crate::process::run_command;
use crate::task::{OnFailure, VerificationGate};

/// Ordered (category, pattern, label) failure rules; first match wins.
#[derive(Debug, Clone)]
pub struct CategoryRules {
    rules: Vec<(String, Regex, String)>,
}

impl CategoryRules {
    pub fn new(rules: Vec<(&str, &str, &str)>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|(category, pattern, label)| {
                Regex::new(pattern)
                    .ok()
                    .map(|re| (category.to_string(), re, label.to_string()))
            })
            .collect();
        Self { rules }
    }

    /// First rule whose pattern matches `text`, in table order.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(_, re, _)| re.is_match(text))
            .map(|(category, _, _)| category.as_str())
    }

    pub fn label(&self, category: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(c, _, _)| c == category)
            .map(|(_, _, label)| label.as_str())
    }
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self::new(vec![
            ("type_error", r"TS\d+:", "TypeScript Error"),
            ("lint_unused", r"no-unused-vars", "Unused Variable"),
            ("lint_import", r"import/order", "Import Order"),
            ("lint_complexity", r"complexity", "Complexity"),
            ("test_assertion", r"AssertionError", "Test Assertion"),
            ("test_timeout", r"Timeout", "Test Timeout"),
            ("build_module", r"Cannot find module", "Missing Module"),
            ("build_syntax", r"SyntaxError", "Syntax Error"),
        ])
    }
}

/// Categorize combined gate output. Unmatched non-empty output maps to
/// "unknown" so an unclassified failure is still tracked for repeats, while
/// staying out of the named-category statistics. Empty output maps to none.
pub fn categorize_failure(stdout: &str, stderr: &str) -> Option<String> {
    categorize_with_rules(&CategoryRules::default(), stdout, stderr)
}

pub fn categorize_with_rules(
    rules: &CategoryRules,
    stdout: &str,
    stderr: &str,
) -> Option<String> {
    let combined = format!("{}{}", stdout, stderr);
    if let Some(category) = rules.first_match(&combined) {
        return Some(category.to_string());
    }
    if combined.trim().is_empty() {
        None
    } else {
        Some("unknown".to_string())
    }
}

fn truncate_output(output: &str, max_length: usize) -> String {
    if output.len() <= max_length {
        return output.to_string();
    }
    let mut cut = max_length;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... (truncated, {} total chars)",
        &output[..cut],
        output.len()
    )
}

/// Terminal state of a gate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRunStatus {
    /// Every gate ran.
    Completed,
    /// A terminate-policy gate failed or the failure threshold was reached.
    HaltedEarly,
}

#[derive(Debug, Clone, Default)]
pub struct WatcherSummary {
    pub total_gates: u32,
    pub passed: u32,
    pub failed: u32,
    pub unique_failure_categories: u32,
    pub repeat_failures: u32,
    pub terminated_early: bool,
}

/// Runs verification gates sequentially within one trial, categorizing
/// failures and tracking category repeats. Gates may depend on each other's
/// order (typecheck before test), so there is no intra-trial parallelism.
pub struct GateWatcher {
    settings: GateSettings,
    timeout_secs: u64,
    rules: CategoryRules,
    events: Vec<GateEvent>,
    categories_seen: HashSet<String>,
    total_failures: u32,
}

impl GateWatcher {
    pub fn new(settings: GateSettings, timeout_secs: u64) -> Self {
        Self::with_rules(settings, timeout_secs, CategoryRules::default())
    }

    pub fn with_rules(settings: GateSettings, timeout_secs: u64, rules: CategoryRules) -> Self {
        Self {
            settings,
            timeout_secs,
            rules,
            events: Vec::new(),
            categories_seen: HashSet::new(),
            total_failures: 0,
        }
    }

    pub fn events(&self) -> &[GateEvent] {
        &self.events
    }

    pub fn total_failures(&self) -> u32 {
        self.total_failures
    }

    pub fn should_terminate(&self) -> bool {
        self.total_failures >= self.settings.max_failures
    }

    /// Execute one gate and append its event. Command-level breakage
    /// (timeout, missing binary) degrades to exit code -1 in the event.
    pub async fn run_gate(&mut self, gate: &VerificationGate, workspace: &Path) -> GateEvent {
        let timestamp = Utc::now().to_rfc3339();
        let outcome = run_command(&gate.command, workspace, self.timeout_secs).await;

        let mut failure_category = None;
        let mut is_repeat = false;

        if outcome.exit_code != 0 {
            self.total_failures += 1;
            failure_category = categorize_with_rules(&self.rules, &outcome.stdout, &outcome.stderr);
            if let Some(category) = &failure_category {
                is_repeat = self.categories_seen.contains(category);
                self.categories_seen.insert(category.clone());
            }
            warn!(
                gate = %gate.name,
                exit_code = outcome.exit_code,
                category = failure_category.as_deref().unwrap_or("-"),
                is_repeat,
                "gate failed"
            );
        }

        let event = GateEvent {
            timestamp,
            gate_name: gate.name.clone(),
            command: gate.command.join(" "),
            exit_code: outcome.exit_code,
            stdout: truncate_output(&outcome.stdout, self.settings.max_output_length),
            stderr: truncate_output(&outcome.stderr, self.settings.max_output_length),
            failure_category,
            is_repeat,
        };

        self.events.push(event.clone());
        event
    }

    /// Run gates in order; stop after a failed terminate-policy gate or once
    /// the cumulative failure threshold is hit.
    pub async fn run_all_gates(
        &mut self,
        gates: &[VerificationGate],
        workspace: &Path,
    ) -> (Vec<GateEvent>, GateRunStatus) {
        let mut status = GateRunStatus::Completed;

        for gate in gates {
            let event = self.run_gate(gate, workspace).await;

            if event.exit_code != 0 && gate.on_failure == OnFailure::Terminate {
                info!(gate = %gate.name, "halting: terminate-policy gate failed");
                status = GateRunStatus::HaltedEarly;
                break;
            }
            if self.should_terminate() {
                info!(
                    failures = self.total_failures,
                    "halting: failure threshold reached"
                );
                status = GateRunStatus::HaltedEarly;
                break;
            }
        }

        (self.events.clone(), status)
    }

    pub fn summary(&self) -> WatcherSummary {
        let passed = self.events.iter().filter(|e| e.exit_code == 0).count() as u32;
        WatcherSummary {
            total_gates: self.events.len() as u32,
            passed,
            failed: self.events.len() as u32 - passed,
            unique_failure_categories: self
                .categories_seen
                .iter()
                .filter(|c| c.as_str() != "unknown")
                .count() as u32,
            repeat_failures: self.events.iter().filter(|e| e.is_repeat).count() as u32,
            terminated_early: self.should_terminate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::OnFailure;

    fn gate(name: &str, argv: &[&str], on_failure: OnFailure) -> VerificationGate {
        VerificationGate {
            name: name.to_string(),
            command: argv.iter().map(|s| s.to_string()).collect(),
            on_failure,
        }
    }

    fn watcher(max_failures: u32) -> GateWatcher {
        GateWatcher::new(
            GateSettings {
                max_failures,
                max_output_length: 2000,
            },
            10,
        )
    }

    #[test]
    fn categorizes_known_patterns() {
        assert_eq!(
            categorize_failure("TS2345: argument type", ""),
            Some("type_error".to_string())
        );
        assert_eq!(
            categorize_failure("", "AssertionError: expected 2"),
            Some("test_assertion".to_string())
        );
        assert_eq!(
            categorize_failure("Cannot find module 'react'", ""),
            Some("build_module".to_string())
        );
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        // Both type_error and test_timeout patterns are present; the rule
        // table order decides.
        assert_eq!(
            categorize_failure("TS1000: Timeout waiting", ""),
            Some("type_error".to_string())
        );
    }

    #[test]
    fn unmatched_text_is_unknown_and_empty_is_none() {
        assert_eq!(
            categorize_failure("some novel failure", ""),
            Some("unknown".to_string())
        );
        assert_eq!(categorize_failure("", ""), None);
        assert_eq!(categorize_failure("   \n", ""), None);
    }

    #[test]
    fn truncation_appends_marker_with_original_length() {
        let long = "x".repeat(2500);
        let truncated = truncate_output(&long, 2000);
        assert!(truncated.starts_with(&"x".repeat(2000)));
        assert!(truncated.ends_with("... (truncated, 2500 total chars)"));

        let short = "short output";
        assert_eq!(truncate_output(short, 2000), short);
    }

    #[tokio::test]
    async fn run_gate_records_pass() {
        let mut w = watcher(3);
        let event = w
            .run_gate(&gate("echo", &["echo", "ok"], OnFailure::Continue), Path::new("."))
            .await;
        assert_eq!(event.exit_code, 0);
        assert!(event.failure_category.is_none());
        assert_eq!(w.total_failures(), 0);
    }

    #[tokio::test]
    async fn missing_binary_degrades_to_failing_event() {
        let mut w = watcher(3);
        let event = w
            .run_gate(
                &gate("ghost", &["no-such-binary-qq"], OnFailure::Continue),
                Path::new("."),
            )
            .await;
        assert_eq!(event.exit_code, -1);
        assert!(event.stderr.contains("Command not found"));
        assert_eq!(w.total_failures(), 1);
    }

    #[tokio::test]
    async fn terminate_policy_halts_after_one_event() {
        let mut w = watcher(3);
        let gates = vec![
            gate("fail", &["sh", "-c", "echo 'TS1: nope' >&2; exit 1"], OnFailure::Terminate),
            gate("never", &["echo", "unreachable"], OnFailure::Continue),
        ];
        let (events, status) = w.run_all_gates(&gates, Path::new(".")).await;
        assert_eq!(events.len(), 1);
        assert_eq!(status, GateRunStatus::HaltedEarly);
    }

    #[tokio::test]
    async fn failure_threshold_halts_sequence() {
        let mut w = watcher(2);
        let failing = gate("fail", &["sh", "-c", "exit 1"], OnFailure::Continue);
        let gates = vec![failing.clone(), failing.clone(), failing.clone(), failing];
        let (events, status) = w.run_all_gates(&gates, Path::new(".")).await;
        assert_eq!(events.len(), 2);
        assert_eq!(status, GateRunStatus::HaltedEarly);
        assert!(w.should_terminate());
    }

    #[tokio::test]
    async fn all_passing_gates_complete() {
        let mut w = watcher(3);
        let gates = vec![
            gate("a", &["echo", "a"], OnFailure::Continue),
            gate("b", &["echo", "b"], OnFailure::Continue),
        ];
        let (events, status) = w.run_all_gates(&gates, Path::new(".")).await;
        assert_eq!(events.len(), 2);
        assert_eq!(status, GateRunStatus::Completed);
    }

    #[tokio::test]
    async fn repeats_tracked_within_one_trial_only() {
        let mut w = watcher(10);
        let failing = gate(
            "types",
            &["sh", "-c", "echo 'TS2345: bad' >&2; exit 1"],
            OnFailure::Continue,
        );
        let first = w.run_gate(&failing, Path::new(".")).await;
        let second = w.run_gate(&failing, Path::new(".")).await;
        assert!(!first.is_repeat);
        assert!(second.is_repeat);

        let summary = w.summary();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.unique_failure_categories, 1);
        assert_eq!(summary.repeat_failures, 1);

        // A fresh watcher (new trial) starts with a clean seen-set.
        let mut fresh = watcher(10);
        let again = fresh.run_gate(&failing, Path::new(".")).await;
        assert!(!again.is_repeat);
    }
}
