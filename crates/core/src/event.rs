//! Audit event model - append-only record of exceptional actions.

use crate::content::ContentRef;
use crate::id::{EventId, StudentId, UserId};
use crate::Time;
use serde::{Deserialize, Serialize};

/// An audit event records who did what to whose progression, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier
    pub id: EventId,

    /// When it happened
    pub timestamp: Time,

    /// Who performed the action
    pub actor: UserId,

    /// Whose progression was affected
    pub student_id: StudentId,

    /// Content the action applies to
    pub content: ContentRef,

    /// What action was taken
    pub action: AuditAction,

    /// Free-form detail (reason, diagnostic)
    pub detail: String,
}

impl AuditEvent {
    /// Create a new event.
    pub fn new(
        actor: UserId,
        student_id: StudentId,
        content: ContentRef,
        action: AuditAction,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp: chrono::Utc::now(),
            actor,
            student_id,
            content,
            action,
            detail: detail.into(),
        }
    }
}

/// Kinds of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// An unlock or block override was issued
    OverrideGranted,
    /// A standing override was cleared
    OverrideCleared,
    /// A progress row was reset to `not_started`
    ProgressReset,
}

impl AuditAction {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::OverrideGranted => "override_granted",
            AuditAction::OverrideCleared => "override_cleared",
            AuditAction::ProgressReset => "progress_reset",
        }
    }
}
