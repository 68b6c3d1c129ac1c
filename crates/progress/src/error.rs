//! Progression error taxonomy.

use learnpath_core::{AccessResult, ContentId, ContentNode, ContentRef, DenialReason, StudentId, TransitionError};
use learnpath_storage::StorageError;

/// Result type for progression operations.
pub type Result<T> = std::result::Result<T, ProgressionError>;

/// Errors raised by the progression engine.
///
/// Access checks report the first four kinds as data on
/// [`AccessResult`]; only writes raise them.
#[derive(Debug, thiserror::Error)]
pub enum ProgressionError {
    /// Student is not enrolled in the owning course
    #[error("student {student} is not enrolled in course {course}")]
    NotEnrolled {
        /// The learner
        student: StudentId,
        /// The course
        course: ContentId,
    },

    /// Content is not published
    #[error("content {0} is not published")]
    ContentUnpublished(ContentRef),

    /// A direct prerequisite is unmet
    #[error("prerequisites for {content} not met: blocked by {blocked_by}")]
    PrerequisitesNotMet {
        /// Content asked for
        content: ContentRef,
        /// First unmet prerequisite
        blocked_by: ContentRef,
    },

    /// Failed mandatory assessment with no attempts left
    #[error("no attempts left for assessment {assessment} ({used} of {max} used)")]
    AssessmentAttemptsExhausted {
        /// The assessment
        assessment: ContentId,
        /// Attempts used
        used: u32,
        /// Attempt limit
        max: u32,
    },

    /// Progress state machine refused the transition
    #[error(transparent)]
    InvalidStateTransition(#[from] TransitionError),

    /// Prerequisite graph contains a cycle (content authoring defect)
    #[error("prerequisite cycle: {}", format_cycle(.cycle))]
    CyclicPrerequisiteGraph {
        /// Nodes forming the cycle, first node repeated at the end
        cycle: Vec<ContentRef>,
    },

    /// Row changed underneath the update, even after retrying
    #[error("concurrent update conflict: {0}")]
    ConcurrentUpdateConflict(String),

    /// Standing block override
    #[error("content {0} is blocked by an instructor")]
    InstructorBlock(ContentRef),

    /// Unknown content
    #[error("content {0} not found")]
    ContentNotFound(ContentRef),

    /// Malformed request
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistence fault
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ProgressionError {
    /// Stable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ProgressionError::NotEnrolled { .. } => "not_enrolled",
            ProgressionError::ContentUnpublished(_) => "unpublished",
            ProgressionError::PrerequisitesNotMet { .. } => "prerequisites_not_met",
            ProgressionError::AssessmentAttemptsExhausted { .. } => "assessment_attempts_exhausted",
            ProgressionError::InvalidStateTransition(_) => "invalid_state_transition",
            ProgressionError::CyclicPrerequisiteGraph { .. } => "cyclic_prerequisite_graph",
            ProgressionError::ConcurrentUpdateConflict(_) => "concurrent_update_conflict",
            ProgressionError::InstructorBlock(_) => "instructor_block",
            ProgressionError::ContentNotFound(_) => "content_not_found",
            ProgressionError::InvalidInput(_) => "invalid_input",
            ProgressionError::Storage(_) => "storage_error",
        }
    }

    /// Whether the caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProgressionError::ConcurrentUpdateConflict(_)
                | ProgressionError::Storage(StorageError::Conflict(_))
        )
    }

    /// Whether this indicates a system or content defect rather than an
    /// expected denial.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            ProgressionError::CyclicPrerequisiteGraph { .. } | ProgressionError::Storage(_)
        )
    }

    /// Turn a denied access decision into the matching error.
    pub(crate) fn from_denial(access: &AccessResult, student: &StudentId, node: &ContentNode) -> Self {
        match access.reason {
            Some(DenialReason::InstructorBlock) => {
                ProgressionError::InstructorBlock(access.content.clone())
            }
            Some(DenialReason::NotEnrolled) => ProgressionError::NotEnrolled {
                student: student.clone(),
                course: node.course_id.clone(),
            },
            Some(DenialReason::Unpublished) => {
                ProgressionError::ContentUnpublished(access.content.clone())
            }
            Some(DenialReason::PrerequisitesNotMet) | None => {
                ProgressionError::PrerequisitesNotMet {
                    content: access.content.clone(),
                    blocked_by: access
                        .blocked_by
                        .clone()
                        .unwrap_or_else(|| access.content.clone()),
                }
            }
        }
    }
}

fn format_cycle(cycle: &[ContentRef]) -> String {
    cycle
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_nodes() {
        let err = ProgressionError::CyclicPrerequisiteGraph {
            cycle: vec![ContentRef::lesson("a"), ContentRef::lesson("b"), ContentRef::lesson("a")],
        };
        assert_eq!(err.to_string(), "prerequisite cycle: lesson:a -> lesson:b -> lesson:a");
        assert!(err.is_defect());
        assert_eq!(err.code(), "cyclic_prerequisite_graph");
    }

    #[test]
    fn test_conflict_is_retryable() {
        assert!(ProgressionError::Storage(StorageError::Conflict("x".into())).is_retryable());
        assert!(ProgressionError::ConcurrentUpdateConflict("x".into()).is_retryable());
        assert!(!ProgressionError::InvalidInput("x".into()).is_retryable());
    }
}
