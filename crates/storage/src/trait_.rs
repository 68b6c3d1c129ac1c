//! Collaborator traits the progression engine depends on.

use async_trait::async_trait;
use learnpath_core::{
    AssessmentAttempt, AuditEvent, ContentId, ContentNode, ContentRef, ProgressionOverride,
    StudentId, StudentProgress, Time, UserId,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A row changed between read and commit
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Read-only access to authored course, lesson and assessment records.
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    /// Load one node.
    async fn get_node(&self, node: &ContentRef) -> Result<Option<ContentNode>>;

    /// All nodes owned by a course, the course itself included, ordered by
    /// position then id.
    async fn list_course_content(&self, course_id: &ContentId) -> Result<Vec<ContentNode>>;

    /// Ids of every course in the catalog.
    async fn list_courses(&self) -> Result<Vec<ContentId>>;
}

/// Read-only view of enrollments.
#[async_trait]
pub trait EnrollmentDirectory: Send + Sync {
    /// Whether `student` is enrolled in `course`.
    async fn is_enrolled(&self, student: &StudentId, course: &ContentId) -> Result<bool>;
}

/// Persistence for progress rows, attempts, overrides and audit events.
///
/// Reads outside a transaction may be slightly stale. Progress rows and
/// attempts are only written through [`ProgressTransaction`].
#[async_trait]
pub trait ProgressStore: Send + Sync {
    // === Progress ===

    /// Load the progress row for (student, content).
    async fn load_progress(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Option<StudentProgress>>;

    /// List the student's progress rows within a course.
    async fn list_progress(
        &self,
        student: &StudentId,
        course: &ContentId,
    ) -> Result<Vec<StudentProgress>>;

    // === Attempts ===

    /// List attempts by `student` at `assessment`, oldest first.
    async fn list_attempts(
        &self,
        student: &StudentId,
        assessment: &ContentId,
    ) -> Result<Vec<AssessmentAttempt>>;

    // === Overrides ===

    /// Every override record (standing and cleared) for the pair, oldest first.
    async fn list_overrides(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Vec<ProgressionOverride>>;

    /// Append an override record.
    async fn append_override(&self, record: &ProgressionOverride) -> Result<()>;

    /// Soft-delete every standing override for the pair. Returns the records
    /// that were cleared.
    async fn clear_overrides(
        &self,
        student: &StudentId,
        content: &ContentRef,
        cleared_by: &UserId,
        at: Time,
    ) -> Result<Vec<ProgressionOverride>>;

    // === Audit ===

    /// Append an audit event.
    async fn append_event(&self, event: &AuditEvent) -> Result<()>;

    /// Audit events concerning `student`, oldest first.
    async fn list_events(&self, student: &StudentId) -> Result<Vec<AuditEvent>>;

    // === Transaction support ===

    /// Open a transaction scoped to the (student, content) progress row.
    async fn begin(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Box<dyn ProgressTransaction>>;
}

/// Read-modify-write unit over one progress row and its attempts.
///
/// Nothing staged becomes visible until [`commit`](Self::commit) succeeds.
#[async_trait]
pub trait ProgressTransaction: Send {
    /// The row as read when the transaction began.
    fn progress(&self) -> Option<&StudentProgress>;

    /// Attempts recorded for the row's content when the transaction began.
    fn attempts(&self) -> &[AssessmentAttempt];

    /// Stage a new version of the row.
    fn put_progress(&mut self, row: StudentProgress);

    /// Stage an attempt to append.
    fn append_attempt(&mut self, attempt: AssessmentAttempt);

    /// Apply staged writes atomically. Fails with [`StorageError::Conflict`]
    /// if the row moved since it was read.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard staged writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
