use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;
use trialgate_types::{
    ComplianceScore, CoverageScore, EfficiencyScore, FunctionalScore, GateEvent,
    RequirementCoverageScore, Scorecard, Verdict, VerdictCheck, VisualScore,
};

use crate::config::ScoringWeights;
use crate::void::classify_void_reasons;

/// Weights actually applied to a scorecard. When the visual dimension is
/// absent its weight is redistributed proportionally across the others so
/// the applied weights still sum to 1.0.
pub fn effective_weights(weights: &ScoringWeights, has_visual: bool) -> ScoringWeights {
    if has_visual {
        return *weights;
    }
    let remaining = weights.sum() - weights.visual;
    if remaining <= 0.0 {
        return ScoringWeights::default();
    }
    let scale = weights.sum() / remaining;
    ScoringWeights {
        functional: weights.functional * scale,
        compliance: weights.compliance * scale,
        visual: 0.0,
        efficiency: weights.efficiency * scale,
        coverage: weights.coverage * scale,
        requirements: weights.requirements * scale,
    }
}

/// Everything the composer needs about one finished trial. The scorers run
/// first; composition is a pure function over their outputs.
#[derive(Debug, Clone, Default)]
pub struct ScorecardInputs {
    pub run_id: String,
    pub task_name: String,
    pub harness: String,
    pub model: String,
    pub rules_variant: String,
    pub duration_sec: f64,
    pub terminated_early: bool,
    pub termination_reason: Option<String>,
    pub metadata: BTreeMap<String, Value>,

    pub functional: FunctionalScore,
    pub compliance: ComplianceScore,
    pub visual: Option<VisualScore>,
    pub efficiency: EfficiencyScore,
    pub coverage: CoverageScore,
    pub requirements: RequirementCoverageScore,

    /// Gate names declared by the task, in declaration order.
    pub gate_names: Vec<String>,
    pub gate_history: Vec<GateEvent>,
}

fn weighted_blend(inputs: &ScorecardInputs, weights: &ScoringWeights) -> f64 {
    let applied = effective_weights(weights, inputs.visual.is_some());
    let mut blend = inputs.functional.score() * applied.functional
        + inputs.compliance.score * applied.compliance
        + inputs.efficiency.score() * applied.efficiency
        + inputs.coverage.score() * applied.coverage
        + inputs.requirements.score() * applied.requirements;
    if let Some(visual) = &inputs.visual {
        blend += visual.score() * applied.visual;
    }
    blend.clamp(0.0, 1.0)
}

fn run_validity(inputs: &ScorecardInputs) -> Verdict {
    Verdict {
        checks: vec![
            VerdictCheck {
                name: "run_completed".to_string(),
                passed: !inputs.terminated_early,
                evidence: inputs.termination_reason.clone(),
            },
            VerdictCheck {
                name: "coverage_threshold_met".to_string(),
                passed: inputs.coverage.passed,
                evidence: inputs.coverage.measured.map(|m| format!("measured {m:.4}")),
            },
            VerdictCheck {
                name: "no_requirement_test_gaps".to_string(),
                passed: !inputs.requirements.has_mapping_gaps(),
                evidence: (!inputs.requirements.requirement_gap_ids.is_empty())
                    .then(|| inputs.requirements.requirement_gap_ids.join(", ")),
            },
        ],
    }
}

/// One check per distinct gate name the task declared; a gate passes when
/// its most recent event exited 0. A declared gate that never ran fails.
fn performance_gates(inputs: &ScorecardInputs) -> Verdict {
    let mut seen: Vec<&str> = Vec::new();
    let mut checks = Vec::new();
    for name in &inputs.gate_names {
        if seen.contains(&name.as_str()) {
            continue;
        }
        seen.push(name);
        let last = inputs
            .gate_history
            .iter()
            .rev()
            .find(|e| e.gate_name == *name);
        let (passed, evidence) = match last {
            Some(event) => (
                event.passed(),
                (!event.passed()).then(|| format!("exit code {}", event.exit_code)),
            ),
            None => (false, Some("gate never ran".to_string())),
        };
        checks.push(VerdictCheck {
            name: name.clone(),
            passed,
            evidence,
        });
    }
    Verdict { checks }
}

/// Build the final scorecard. The diagnostic score is the weighted blend
/// regardless of validity; the composite is gated to 0.0 for voided or
/// invalid runs so suite rankings never reward a broken trial.
pub fn compose_scorecard(inputs: ScorecardInputs, weights: &ScoringWeights) -> Result<Scorecard> {
    weights.validate()?;

    let void_reasons =
        classify_void_reasons(inputs.terminated_early, inputs.termination_reason.as_deref());
    let voided = !void_reasons.is_empty();

    let run_validity = run_validity(&inputs);
    let performance_gates = performance_gates(&inputs);

    let diagnostic_score = weighted_blend(&inputs, weights);
    let composite_score = if voided || !run_validity.passed() {
        0.0
    } else {
        diagnostic_score
    };

    Ok(Scorecard {
        run_id: inputs.run_id,
        task_name: inputs.task_name,
        harness: inputs.harness,
        model: inputs.model,
        rules_variant: inputs.rules_variant,
        duration_sec: inputs.duration_sec,
        terminated_early: inputs.terminated_early,
        termination_reason: inputs.termination_reason,
        metadata: inputs.metadata,
        functional: inputs.functional,
        compliance: inputs.compliance,
        visual: inputs.visual,
        efficiency: inputs.efficiency,
        coverage: inputs.coverage,
        requirements: inputs.requirements,
        run_validity,
        performance_gates,
        voided,
        void_reasons,
        composite_score,
        diagnostic_score,
    })
}

/// Scorecard for a trial that died before any scorer could run. Every
/// dimension is its zero value and the run-completed check fails, so the
/// composite is 0.0 while the audit trail keeps the termination reason.
pub fn terminated_scorecard(
    run_id: &str,
    task_name: &str,
    harness: &str,
    model: &str,
    rules_variant: &str,
    duration_sec: f64,
    reason: &str,
) -> Scorecard {
    let void_reasons = classify_void_reasons(true, Some(reason));
    Scorecard {
        run_id: run_id.to_string(),
        task_name: task_name.to_string(),
        harness: harness.to_string(),
        model: model.to_string(),
        rules_variant: rules_variant.to_string(),
        duration_sec,
        terminated_early: true,
        termination_reason: Some(reason.to_string()),
        run_validity: Verdict {
            checks: vec![VerdictCheck {
                name: "run_completed".to_string(),
                passed: false,
                evidence: Some(reason.to_string()),
            }],
        },
        voided: !void_reasons.is_empty(),
        void_reasons,
        ..Default::default()
    }
}
