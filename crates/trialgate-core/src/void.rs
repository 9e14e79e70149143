//! Classify infrastructure failures that make a trial unscoreable.
//!
//! A void reason means the trial never got a fair chance: the harness or
//! the provider broke, not the agent. Voided runs keep their scorecard for
//! audit but are excluded from validity and composite statistics.

const RULES: &[(&str, &str)] = &[
    ("timeout expired", "harness_timeout"),
    ("unsupported compose version", "environment_version_unsupported"),
    ("rate limit", "provider_rate_limit"),
    (
        "stream disconnected before completion",
        "provider_stream_disconnect",
    ),
    ("harness not installed", "harness_unavailable"),
    ("harness exited with code", "harness_cli_failure"),
    ("harness trial exception", "harness_trial_exception"),
];

/// Map a termination reason onto void tags. Returns an empty list for a
/// normally completed trial (no reason, or a reason no rule recognizes as
/// infrastructure failure).
pub fn classify_void_reasons(terminated_early: bool, reason: Option<&str>) -> Vec<String> {
    let Some(reason) = reason else {
        return Vec::new();
    };
    let lowered = reason.to_lowercase();

    let mut tags: Vec<String> = Vec::new();
    for (needle, tag) in RULES {
        if lowered.contains(needle) && !tags.iter().any(|t| t == tag) {
            tags.push((*tag).to_string());
        }
    }

    // A failed agent turn with no more specific cause is still not the
    // agent's work product being judged.
    if tags.is_empty()
        && terminated_early
        && (lowered.contains("turn failed") || lowered.contains("failed turn"))
    {
        tags.push("provider_or_harness_turn_failure".to_string());
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_completion_is_not_void() {
        assert!(classify_void_reasons(false, None).is_empty());
        assert!(classify_void_reasons(false, Some("all gates passed")).is_empty());
    }

    #[test]
    fn each_rule_matches_case_insensitively() {
        let cases = [
            ("Timeout expired after 1800s", "harness_timeout"),
            (
                "unsupported Compose version: 3.9",
                "environment_version_unsupported",
            ),
            ("provider returned 429: Rate Limit", "provider_rate_limit"),
            (
                "stream disconnected before completion",
                "provider_stream_disconnect",
            ),
            ("harness not installed on PATH", "harness_unavailable"),
            ("harness exited with code 2", "harness_cli_failure"),
            ("harness trial exception: broken pipe", "harness_trial_exception"),
        ];
        for (reason, expected) in cases {
            let tags = classify_void_reasons(true, Some(reason));
            assert_eq!(tags, [expected.to_string()], "reason: {reason}");
        }
    }

    #[test]
    fn turn_failure_fallback_requires_early_termination() {
        let tags = classify_void_reasons(true, Some("turn failed: connection reset"));
        assert_eq!(tags, ["provider_or_harness_turn_failure".to_string()]);
        assert!(classify_void_reasons(false, Some("turn failed")).is_empty());
    }

    #[test]
    fn specific_rule_wins_over_fallback_and_dedupes() {
        let tags = classify_void_reasons(
            true,
            Some("turn failed: rate limit hit, then rate limit again"),
        );
        assert_eq!(tags, ["provider_rate_limit".to_string()]);
    }

    #[test]
    fn multiple_distinct_causes_preserve_rule_order() {
        let tags = classify_void_reasons(
            true,
            Some("harness exited with code 1 after timeout expired"),
        );
        assert_eq!(
            tags,
            [
                "harness_timeout".to_string(),
                "harness_cli_failure".to_string()
            ]
        );
    }
}
