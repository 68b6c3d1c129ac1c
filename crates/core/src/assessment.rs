//! Assessment attempt model.

use serde::{Deserialize, Serialize};
use crate::content::AssessmentRequirement;
use crate::id::{AttemptId, ContentId, StudentId};
use crate::Time;

/// One scored submission of an assessment. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentAttempt {
    /// Unique identifier
    pub id: AttemptId,

    /// Assessment attempted
    pub assessment_id: ContentId,

    /// The learner
    pub student_id: StudentId,

    /// 1-based attempt number
    pub attempt_number: u32,

    /// Score (0-100)
    pub score: u8,

    /// Whether this attempt alone met the passing score
    pub passed: bool,

    /// When the attempt was started, if known
    #[serde(default)]
    pub started_at: Option<Time>,

    /// When it was submitted
    pub submitted_at: Time,

    /// Submitted after the advisory time limit elapsed
    #[serde(default)]
    pub late: bool,

    /// Client supplied token used to detect duplicate submits
    #[serde(default)]
    pub client_token: Option<String>,
}

impl AssessmentAttempt {
    /// Score a submission against `requirement`.
    ///
    /// Late submissions are still scored; they are only tagged.
    pub fn scored(
        requirement: &AssessmentRequirement,
        student_id: StudentId,
        attempt_number: u32,
        score: u8,
        started_at: Option<Time>,
        submitted_at: Time,
    ) -> Self {
        let score = score.min(100);
        let late = match (requirement.time_limit_minutes, started_at) {
            (Some(limit), Some(started)) => {
                submitted_at.signed_duration_since(started)
                    > chrono::Duration::minutes(i64::from(limit))
            }
            _ => false,
        };

        Self {
            id: AttemptId::new(),
            assessment_id: requirement.assessment_id.clone(),
            student_id,
            attempt_number,
            score,
            passed: score >= requirement.minimum_passing_score,
            started_at,
            submitted_at,
            late,
            client_token: None,
        }
    }
}
