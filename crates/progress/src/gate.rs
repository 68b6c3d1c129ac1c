//! Assessment gating.

use learnpath_core::{AssessmentAttempt, AssessmentRequirement, ContentId, ContentNode, ContentRef, StudentId};
use learnpath_storage::{ContentCatalog, ProgressStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ProgressionError, Result};

/// Attempts still available on an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptsRemaining {
    /// No attempt limit
    Unlimited,
    /// This many attempts left
    Limited(u32),
}

/// Outcome of evaluating a student's attempts against an assessment's
/// requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateEvaluation {
    /// The assessment
    pub assessment_id: ContentId,
    /// Whether the best score meets the passing score
    pub passed: bool,
    /// Attempts recorded so far
    pub attempts_used: u32,
    /// Attempts left
    pub attempts_remaining: AttemptsRemaining,
    /// Highest score across attempts, 0 with no attempts
    pub best_score: u8,
    /// Attempts submitted after the time limit
    pub late_attempts: u32,
}

impl GateEvaluation {
    /// Failed with no attempts left. Only an unlock override gets the
    /// student past this.
    pub fn is_terminal_failure(&self) -> bool {
        !self.passed && self.attempts_remaining == AttemptsRemaining::Limited(0)
    }
}

/// Decides whether a student has passed a mandatory assessment.
pub struct AssessmentGate {
    catalog: Arc<dyn ContentCatalog>,
    store: Arc<dyn ProgressStore>,
}

impl AssessmentGate {
    /// Create a gate.
    pub fn new(catalog: Arc<dyn ContentCatalog>, store: Arc<dyn ProgressStore>) -> Self {
        Self { catalog, store }
    }

    /// Evaluate `student`'s recorded attempts at `assessment_id`.
    pub async fn evaluate(&self, student: &StudentId, assessment_id: &ContentId) -> Result<GateEvaluation> {
        let reference = ContentRef::assessment(assessment_id.clone());
        let node = self
            .catalog
            .get_node(&reference)
            .await?
            .ok_or(ProgressionError::ContentNotFound(reference))?;
        let requirement = Self::requirement(&node)?;
        let attempts = self.store.list_attempts(student, assessment_id).await?;
        Ok(Self::evaluate_attempts(requirement, &attempts))
    }

    /// The requirement attached to an assessment node.
    pub fn requirement(node: &ContentNode) -> Result<&AssessmentRequirement> {
        node.requirement.as_ref().ok_or_else(|| {
            ProgressionError::InvalidInput(format!("{} has no assessment requirement", node.reference()))
        })
    }

    /// Evaluate `attempts` against the current `requirement`.
    ///
    /// Passing needs at least one attempt. The best score only ever grows,
    /// so a later lower score never revokes a pass.
    pub fn evaluate_attempts(
        requirement: &AssessmentRequirement,
        attempts: &[AssessmentAttempt],
    ) -> GateEvaluation {
        let attempts_used = attempts.len() as u32;
        let best_score = attempts.iter().map(|a| a.score).max().unwrap_or(0);
        let passed = !attempts.is_empty() && best_score >= requirement.minimum_passing_score;
        let attempts_remaining = match requirement.max_attempts {
            Some(max) => AttemptsRemaining::Limited(max.saturating_sub(attempts_used)),
            None => AttemptsRemaining::Unlimited,
        };

        GateEvaluation {
            assessment_id: requirement.assessment_id.clone(),
            passed,
            attempts_used,
            attempts_remaining,
            best_score,
            late_attempts: attempts.iter().filter(|a| a.late).count() as u32,
        }
    }
}
