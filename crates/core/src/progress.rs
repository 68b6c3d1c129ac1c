//! Progress model - per (student, content) current state and its state machine.

use serde::{Deserialize, Serialize};
use crate::content::ContentRef;
use crate::id::{ContentId, ProgressId, StudentId};
use crate::Time;

/// Progress status of one student on one content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Never touched (initial)
    NotStarted,
    /// Opened, not finished
    InProgress,
    /// Finished; terminal until an explicit reset
    Completed,
    /// Failed a mandatory assessment with no attempts left
    Blocked,
}

/// A transition the state machine refuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid progress transition {from} -> {to}")]
pub struct TransitionError {
    /// Current status
    pub from: ProgressStatus,
    /// Requested status
    pub to: ProgressStatus,
}

impl ProgressStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Blocked => "blocked",
        }
    }

    /// Whether a single step `self -> next` is allowed.
    ///
    /// `blocked -> in_progress` needs `unblocked`: a standing unlock override,
    /// or a gate that no longer reports a terminal failure.
    pub fn can_transition_to(self, next: ProgressStatus, unblocked: bool) -> bool {
        use ProgressStatus::*;
        match (self, next) {
            (NotStarted, InProgress)
            | (InProgress, Completed)
            | (InProgress, Blocked)
            | (Completed, Completed) => true,
            (Blocked, InProgress) => unblocked,
            _ => false,
        }
    }

    /// Steps needed to reach `target`, passing through `in_progress` when the
    /// direct step is not allowed but the two-step route is.
    ///
    /// An empty path means `target` is the current status.
    pub fn path_to(
        self,
        target: ProgressStatus,
        unblocked: bool,
    ) -> Result<Vec<ProgressStatus>, TransitionError> {
        if self == target {
            return Ok(Vec::new());
        }
        if self.can_transition_to(target, unblocked) {
            return Ok(vec![target]);
        }
        let via = ProgressStatus::InProgress;
        if self != via
            && self.can_transition_to(via, unblocked)
            && via.can_transition_to(target, unblocked)
        {
            return Ok(vec![via, target]);
        }
        Err(TransitionError { from: self, to: target })
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_started" => Ok(ProgressStatus::NotStarted),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "blocked" => Ok(ProgressStatus::Blocked),
            other => Err(format!("unknown progress status: {}", other)),
        }
    }
}

/// Current progress of one student on one content node.
///
/// Created lazily on first interaction and never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProgress {
    /// Unique identifier
    pub id: ProgressId,

    /// The learner
    pub student_id: StudentId,

    /// Owning course
    pub course_id: ContentId,

    /// The content this row tracks
    pub content: ContentRef,

    /// Current status
    pub status: ProgressStatus,

    /// Percentage complete (0-100)
    pub completion_percentage: u8,

    /// Number of assessment attempts
    pub attempts_count: u32,

    /// Best assessment score
    pub best_score: Option<u8>,

    /// Time spent, in seconds
    pub time_spent: u64,

    /// Last interaction
    pub last_accessed: Time,

    /// When the row reached `completed`
    #[serde(default)]
    pub completed_at: Option<Time>,

    /// Row version for optimistic concurrency
    #[serde(default)]
    pub version: u64,
}

impl StudentProgress {
    /// Fresh `not_started` row.
    pub fn new(student_id: StudentId, course_id: ContentId, content: ContentRef) -> Self {
        Self {
            id: ProgressId::new(),
            student_id,
            course_id,
            content,
            status: ProgressStatus::NotStarted,
            completion_percentage: 0,
            attempts_count: 0,
            best_score: None,
            time_spent: 0,
            last_accessed: chrono::Utc::now(),
            completed_at: None,
            version: 0,
        }
    }

    /// Whether the row is completed.
    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }

    /// Move to `status`, keeping the completed-means-100% invariant.
    pub fn set_status(&mut self, status: ProgressStatus, at: Time) {
        self.status = status;
        if status == ProgressStatus::Completed {
            self.completion_percentage = 100;
            if self.completed_at.is_none() {
                self.completed_at = Some(at);
            }
        }
    }

    /// Raise percentage and time spent; lower values are ignored.
    pub fn raise(&mut self, completion_percentage: u8, time_spent: u64) {
        self.completion_percentage = self.completion_percentage.max(completion_percentage.min(100));
        self.time_spent = self.time_spent.max(time_spent);
    }
}
