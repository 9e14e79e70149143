//! trialgate-core: scoring and repeat/retry engine for coding-agent trials.
//! Run verification gates against an agent's workspace, reduce the signals to
//! one composite score, and repeat trials under a bounded void-retry budget.

pub mod compose;
pub mod config;
pub mod process;
pub mod report;
pub mod suite;
pub mod summary;
pub mod task;
pub mod void;
pub mod watcher;

pub mod scoring {
    pub mod compliance;
    pub mod coverage;
    pub mod efficiency;
    pub mod functional;
    pub mod visual;
}

pub use compose::{compose_scorecard, effective_weights, terminated_scorecard, ScorecardInputs};
pub use config::EvalSettings;
pub use suite::{run_with_void_retries, SuiteError, SuiteOutcome, TrialRunner};
pub use summary::create_suite_summary;
pub use task::TaskDefinition;
pub use void::classify_void_reasons;
pub use watcher::{categorize_failure, CategoryRules, GateRunStatus, GateWatcher};
pub use trialgate_types::{
    EvalRun, GateEvent, Scorecard, SessionEvent, SuiteSummary,
};
