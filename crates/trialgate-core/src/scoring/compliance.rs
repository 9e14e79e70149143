use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::warn;
use trialgate_types::{ComplianceCheck, ComplianceScore};

use crate::config::JudgeSettings;
use crate::task::{CheckType, ComplianceConfig, DeterministicCheck, JudgeCriterion};

/// Subjective compliance judge. The HTTP implementation talks to an
/// OpenAI-compatible chat endpoint; tests use in-memory stubs.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(&self, prompt: &str) -> Result<String>;
}

pub struct HttpJudge {
    client: reqwest::Client,
    url: String,
    settings: JudgeSettings,
}

impl HttpJudge {
    pub fn new(url: impl Into<String>, settings: JudgeSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            settings,
        }
    }
}

#[async_trait]
impl Judge for HttpJudge {
    async fn evaluate(&self, prompt: &str) -> Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .json(&json!({
                "model": self.settings.model,
                "messages": [{ "role": "user", "content": prompt }],
                "max_tokens": self.settings.max_tokens,
            }))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.json::<serde_json::Value>().await?;
        if !status.is_success() {
            anyhow::bail!("judge HTTP {}: {}", status.as_u16(), body);
        }
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(content)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub passed: bool,
    pub evidence: String,
}

fn head(text: &str, max: usize) -> &str {
    let mut cut = max.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

/// Parse a judge response with three fallbacks, specific to the
/// VERDICT/EVIDENCE prompt convention:
/// 1. explicit "VERDICT: PASS|FAIL" block (with optional "EVIDENCE:");
/// 2. an unambiguous PASS or FAIL keyword on the first line, FAIL winning
///    when both appear;
/// 3. conservative FAIL recording that the response was unparseable.
pub fn parse_judge_response(response: &str) -> JudgeVerdict {
    let response = response.trim();

    let verdict_re = Regex::new(r"(?i)VERDICT:\s*(PASS|FAIL)").unwrap();
    let evidence_re = Regex::new(r"(?is)EVIDENCE:\s*(.+?)(?:\n\n|\z)").unwrap();

    if let Some(caps) = verdict_re.captures(response) {
        let passed = caps[1].eq_ignore_ascii_case("PASS");
        let evidence = evidence_re
            .captures(response)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| head(response, 200).to_string());
        return JudgeVerdict { passed, evidence };
    }

    let first_line = response.lines().next().unwrap_or("").to_uppercase();
    if first_line.contains("PASS") && !first_line.contains("FAIL") {
        return JudgeVerdict {
            passed: true,
            evidence: head(response, 200).to_string(),
        };
    }
    if first_line.contains("FAIL") {
        return JudgeVerdict {
            passed: false,
            evidence: head(response, 200).to_string(),
        };
    }

    JudgeVerdict {
        passed: false,
        evidence: format!("Could not parse response: {}...", head(response, 100)),
    }
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

fn source_files(workspace: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    walk_files(&workspace.join("src"), &mut files);
    files
}

fn rel(workspace: &Path, path: &Path) -> String {
    path.strip_prefix(workspace)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn check_import_present(workspace: &Path, pattern: &str) -> (bool, String) {
    let files = source_files(workspace);
    if files.is_empty() {
        return (false, "src directory not found".to_string());
    }
    for path in &files {
        if let Ok(content) = std::fs::read_to_string(path) {
            if content.contains(pattern) {
                return (true, format!("Found in {}", rel(workspace, path)));
            }
        }
    }
    (false, format!("Pattern '{}' not found in any source file", pattern))
}

fn check_file_exists(workspace: &Path, pattern: &str) -> (bool, String) {
    // Glob-lite: '*' wildcards over workspace-relative paths.
    let regex_text = format!(
        "^{}$",
        regex::escape(pattern).replace(r"\*\*", ".*").replace(r"\*", "[^/]*")
    );
    let Ok(re) = Regex::new(&regex_text) else {
        return (false, format!("Invalid file pattern '{}'", pattern));
    };
    let mut files = Vec::new();
    walk_files(workspace, &mut files);
    let matches = files
        .iter()
        .filter(|p| re.is_match(&rel(workspace, p)))
        .count();
    if matches > 0 {
        (true, format!("Found {} matching files", matches))
    } else {
        (false, format!("No files matching '{}'", pattern))
    }
}

fn check_no_pattern(workspace: &Path, pattern: &str) -> (bool, String) {
    let files = source_files(workspace);
    if files.is_empty() {
        return (true, "src directory not found (pattern check passes)".to_string());
    }
    let Ok(re) = Regex::new(pattern) else {
        return (false, format!("Invalid pattern '{}'", pattern));
    };
    for path in &files {
        if let Ok(content) = std::fs::read_to_string(path) {
            if re.is_match(&content) {
                return (false, format!("Pattern found in {}", rel(workspace, path)));
            }
        }
    }
    (true, "Pattern not found (good)".to_string())
}

/// Run one deterministic compliance check against the workspace.
pub fn run_deterministic_check(check: &DeterministicCheck, workspace: &Path) -> ComplianceCheck {
    let (passed, evidence) = match check.check_type {
        CheckType::ImportPresent => check_import_present(workspace, &check.pattern),
        CheckType::FileExists => check_file_exists(workspace, &check.pattern),
        CheckType::NoPattern => check_no_pattern(workspace, &check.pattern),
    };
    ComplianceCheck {
        rule: check.description.clone(),
        check_type: "deterministic".to_string(),
        passed,
        evidence: Some(evidence),
    }
}

/// Concatenate workspace sources for the judge prompt, capped at `max_chars`.
pub fn collect_source_code(workspace: &Path, max_chars: usize) -> String {
    let files = source_files(workspace);
    if files.is_empty() {
        return "No source directory found".to_string();
    }

    let mut collected = Vec::new();
    let mut total = 0usize;
    for path in files {
        if total >= max_chars {
            break;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let mut block = format!("=== {} ===\n{}\n", rel(workspace, &path), content);
        if total + block.len() > max_chars {
            let remaining = max_chars - total;
            block = format!("{}\n... (truncated)", head(&block, remaining));
        }
        total += block.len();
        collected.push(block);
    }
    collected.join("\n")
}

fn judge_prompt(criterion: &JudgeCriterion, source_code: &str, rules_content: &str) -> String {
    format!(
        "You are evaluating code compliance with project guidelines.\n\n\
         ## Project Rules\n{rules_content}\n\n\
         ## Source Code\n{source_code}\n\n\
         ## Evaluation Criterion\n{criterion}\n\n\
         Evaluate whether the code follows this criterion. Respond with:\n\
         1. PASS or FAIL\n\
         2. Brief evidence (1-2 sentences)\n\n\
         Format:\nVERDICT: [PASS/FAIL]\nEVIDENCE: [your evidence]",
        criterion = criterion.criterion,
    )
}

/// Evaluate one judge criterion with bounded retry. An exhausted retry
/// budget records a conservative failure carrying the last error.
pub async fn run_judge_check(
    judge: &dyn Judge,
    criterion: &JudgeCriterion,
    source_code: &str,
    rules_content: &str,
    max_retries: u32,
) -> ComplianceCheck {
    let prompt = judge_prompt(criterion, source_code, rules_content);
    let mut last_error = None;

    for _attempt in 0..=max_retries {
        match judge.evaluate(&prompt).await {
            Ok(response) => {
                let verdict = parse_judge_response(&response);
                return ComplianceCheck {
                    rule: criterion.criterion.clone(),
                    check_type: "judge".to_string(),
                    passed: verdict.passed,
                    evidence: Some(verdict.evidence),
                };
            }
            Err(err) => {
                warn!(criterion = %criterion.criterion, error = %err, "judge call failed");
                last_error = Some(err);
            }
        }
    }

    ComplianceCheck {
        rule: criterion.criterion.clone(),
        check_type: "judge".to_string(),
        passed: false,
        evidence: Some(format!(
            "Judge error after {} attempts: {}",
            max_retries + 1,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )),
    }
}

fn blended_score(checks: &[ComplianceCheck]) -> f64 {
    let deterministic: Vec<_> = checks.iter().filter(|c| c.check_type == "deterministic").collect();
    let judged: Vec<_> = checks.iter().filter(|c| c.check_type == "judge").collect();

    let ratio = |subset: &[&ComplianceCheck]| {
        if subset.is_empty() {
            1.0
        } else {
            subset.iter().filter(|c| c.passed).count() as f64 / subset.len() as f64
        }
    };

    if checks.is_empty() {
        1.0
    } else if judged.is_empty() {
        ratio(&deterministic)
    } else {
        // 60/40 deterministic/judge blend.
        ratio(&deterministic) * 0.6 + ratio(&judged) * 0.4
    }
}

/// Evaluate all compliance checks for a task. `judge` may be None (judge
/// checks skipped, deterministic-only blend), e.g. in offline scoring.
pub async fn evaluate_compliance(
    workspace: &Path,
    config: &ComplianceConfig,
    judge: Option<&dyn Judge>,
    rules_content: &str,
    settings: &JudgeSettings,
) -> ComplianceScore {
    let mut checks = Vec::new();

    for check in &config.deterministic_checks {
        checks.push(run_deterministic_check(check, workspace));
    }

    if let Some(judge) = judge {
        if !config.judge_rubric.is_empty() {
            let source_code = collect_source_code(workspace, settings.max_source_chars);
            for criterion in &config.judge_rubric {
                checks.push(
                    run_judge_check(
                        judge,
                        criterion,
                        &source_code,
                        rules_content,
                        settings.max_retries,
                    )
                    .await,
                );
            }
        }
    }

    let score = blended_score(&checks);
    ComplianceScore { checks, score }
}
