//! Instructor overrides - audited exceptions to the computed gate.

use serde::{Deserialize, Serialize};
use crate::content::ContentRef;
use crate::id::{OverrideId, StudentId, UserId};
use crate::Time;

/// What an override does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    /// Grant access regardless of prerequisites
    Unlock,
    /// Deny access regardless of prerequisites
    Block,
}

impl OverrideAction {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAction::Unlock => "unlock",
            OverrideAction::Block => "block",
        }
    }
}

impl std::str::FromStr for OverrideAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unlock" => Ok(OverrideAction::Unlock),
            "block" => Ok(OverrideAction::Block),
            other => Err(format!("unknown override action: {}", other)),
        }
    }
}

/// An instructor-issued exception for one (student, content) pair.
///
/// Records are append-only; clearing sets `cleared_at` instead of deleting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionOverride {
    /// Unique identifier
    pub id: OverrideId,

    /// The learner
    pub student_id: StudentId,

    /// The content overridden
    pub content: ContentRef,

    /// Unlock or block
    pub action: OverrideAction,

    /// Why it was issued
    pub reason: String,

    /// Who issued it
    pub issued_by: UserId,

    /// When it was issued
    pub issued_at: Time,

    /// When it was cleared
    #[serde(default)]
    pub cleared_at: Option<Time>,

    /// Who cleared it
    #[serde(default)]
    pub cleared_by: Option<UserId>,
}

impl ProgressionOverride {
    /// Create a standing override issued now.
    pub fn new(
        student_id: StudentId,
        content: ContentRef,
        action: OverrideAction,
        reason: impl Into<String>,
        issued_by: UserId,
    ) -> Self {
        Self {
            id: OverrideId::new(),
            student_id,
            content,
            action,
            reason: reason.into(),
            issued_by,
            issued_at: chrono::Utc::now(),
            cleared_at: None,
            cleared_by: None,
        }
    }

    /// Whether the override still stands.
    pub fn is_active(&self) -> bool {
        self.cleared_at.is_none()
    }
}

/// Most recent standing override among `records`.
pub fn current_override<'a, I>(records: I) -> Option<&'a ProgressionOverride>
where
    I: IntoIterator<Item = &'a ProgressionOverride>,
{
    records
        .into_iter()
        .filter(|o| o.is_active())
        .max_by(|a, b| a.issued_at.cmp(&b.issued_at).then_with(|| a.id.cmp(&b.id)))
}
