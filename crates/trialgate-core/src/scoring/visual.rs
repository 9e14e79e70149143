use std::path::Path;

use regex::Regex;
use tracing::debug;
use trialgate_types::VisualScore;

use crate::config::{TimeoutSettings, VisualSettings};
use crate::process::run_command;
use crate::task::VisualConfig;

/// Run the screenshot command; true iff it exits 0 and the output file
/// appeared. A broken capture is a zero-similarity outcome, not an error.
pub async fn capture_screenshot(
    workspace: &Path,
    command: &[String],
    output_path: &Path,
    timeout_secs: u64,
) -> bool {
    let outcome = run_command(command, workspace, timeout_secs).await;
    outcome.success() && output_path.exists()
}

/// Compare two images with an external pixel-diff tool. Exit 0 means an
/// exact match; otherwise the tool's percentage-difference output maps to
/// `1 - p/100`. A missing reference or tool failure yields 0 similarity.
pub async fn compare_images(
    workspace: &Path,
    diff_command: &[String],
    reference: &Path,
    actual: &Path,
    diff_output: &Path,
    settings: &VisualSettings,
    timeout_secs: u64,
) -> (f64, Option<String>) {
    if !reference.exists() || !actual.exists() {
        return (0.0, None);
    }

    let mut argv: Vec<String> = diff_command.to_vec();
    argv.extend([
        reference.display().to_string(),
        actual.display().to_string(),
        diff_output.display().to_string(),
        "--threshold".to_string(),
        settings.diff_threshold.to_string(),
    ]);

    let outcome = run_command(&argv, workspace, timeout_secs).await;
    if outcome.success() {
        return (1.0, None);
    }

    let output = format!("{}{}", outcome.stdout, outcome.stderr);
    let percent_re = Regex::new(r"(\d+\.?\d*)\s*%").unwrap();
    if let Some(caps) = percent_re.captures(&output) {
        if let Ok(diff_percent) = caps[1].parse::<f64>() {
            let similarity = (1.0 - diff_percent / 100.0).max(0.0);
            let diff_path = diff_output
                .exists()
                .then(|| diff_output.display().to_string());
            return (similarity, diff_path);
        }
    }
    let diff_path = diff_output
        .exists()
        .then(|| diff_output.display().to_string());
    (0.0, diff_path)
}

/// Evaluate visual similarity against the task's reference design.
pub async fn evaluate_visual(
    workspace: &Path,
    config: &VisualConfig,
    diff_command: &[String],
    settings: &VisualSettings,
    timeouts: &TimeoutSettings,
) -> VisualScore {
    let actual = workspace.join("actual.png");
    let diff = workspace.join("diff.png");
    let reference = workspace.join(&config.reference_image);

    let captured = capture_screenshot(
        workspace,
        &config.screenshot_command,
        &actual,
        timeouts.screenshot,
    )
    .await;

    if !captured {
        debug!("screenshot capture failed; similarity 0");
        return VisualScore {
            similarity: 0.0,
            diff_path: None,
            capture_succeeded: false,
            threshold: config.threshold,
        };
    }

    let (similarity, diff_path) = compare_images(
        workspace,
        diff_command,
        &reference,
        &actual,
        &diff,
        settings,
        timeouts.image_compare,
    )
    .await;

    VisualScore {
        similarity,
        diff_path,
        capture_succeeded: true,
        threshold: config.threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn capture_fails_when_no_file_produced() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("shot.png");
        let ok = capture_screenshot(dir.path(), &argv(&["true"]), &out, 10).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn capture_succeeds_when_command_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("shot.png");
        let cmd = argv(&["sh", "-c", &format!("touch {}", out.display())]);
        assert!(capture_screenshot(dir.path(), &cmd, &out, 10).await);
    }

    #[tokio::test]
    async fn missing_reference_scores_zero() {
        let dir = tempfile::tempdir().unwrap();
        let actual = dir.path().join("actual.png");
        std::fs::write(&actual, b"png").unwrap();
        let (similarity, diff) = compare_images(
            dir.path(),
            &argv(&["true"]),
            &dir.path().join("missing-ref.png"),
            &actual,
            &dir.path().join("diff.png"),
            &VisualSettings::default(),
            10,
        )
        .await;
        assert_eq!(similarity, 0.0);
        assert!(diff.is_none());
    }

    #[tokio::test]
    async fn exact_match_scores_one() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.png");
        let actual = dir.path().join("actual.png");
        std::fs::write(&reference, b"png").unwrap();
        std::fs::write(&actual, b"png").unwrap();
        let (similarity, _) = compare_images(
            dir.path(),
            &argv(&["true"]),
            &reference,
            &actual,
            &dir.path().join("diff.png"),
            &VisualSettings::default(),
            10,
        )
        .await;
        assert_eq!(similarity, 1.0);
    }

    #[tokio::test]
    async fn percentage_output_maps_to_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.png");
        let actual = dir.path().join("actual.png");
        std::fs::write(&reference, b"a").unwrap();
        std::fs::write(&actual, b"b").unwrap();
        // Fake pixel-diff tool reporting a 12.5% difference.
        let cmd = argv(&["sh", "-c", "echo 'Different pixels: 12.5%'; exit 22"]);
        // Drop the appended image/threshold args via sh -c ignoring them.
        let (similarity, _) = compare_images(
            dir.path(),
            &cmd,
            &reference,
            &actual,
            &dir.path().join("diff.png"),
            &VisualSettings::default(),
            10,
        )
        .await;
        assert!((similarity - 0.875).abs() < 1e-9);
    }
}
