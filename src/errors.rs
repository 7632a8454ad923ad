//! Typed error hierarchy for the idea-to-implementation pipeline.
//!
//! Two kinds of failure are kept apart so callers can tell "your input was
//! bad" from "the system failed":
//! - `InputValidationError`: a structural or size check rejected data
//!   before (or instead of) an expensive external call.
//! - `PipelineError`: everything a run can surface, with validation errors
//!   carried through verbatim and collaborator failures tagged with the step
//!   that raised them.

use thiserror::Error;

use crate::pipeline::state::RunStatus;

/// Caller-supplied data failed a structural or size check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InputValidationError {
    pub message: String,
}

impl InputValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by `Orchestrator::run`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Never retried and never wrapped.
    #[error(transparent)]
    InputValidation(#[from] InputValidationError),

    /// A step failed after its retries (if any) were exhausted. `source` is
    /// the collaborator's original error, untouched.
    #[error("{source}")]
    StepFailed {
        step: RunStatus,
        #[source]
        source: anyhow::Error,
    },

    #[error("Illegal status transition {from} -> {to}")]
    IllegalTransition { from: RunStatus, to: RunStatus },
}

impl PipelineError {
    pub fn step_failed(step: RunStatus, source: anyhow::Error) -> Self {
        Self::StepFailed { step, source }
    }

    /// True when the caller's input (not the system) was at fault.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InputValidation(_))
    }

    /// The step a failure happened in, if it happened inside a step.
    pub fn failed_step(&self) -> Option<RunStatus> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            Self::IllegalTransition { to, .. } => Some(*to),
            Self::InputValidation(_) => None,
        }
    }
}
