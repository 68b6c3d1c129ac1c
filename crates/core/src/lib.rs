//! learnpath core data models.
//!
//! This crate defines the data structures the progression engine reads and
//! writes: content references, per-student progress, assessment attempts,
//! instructor overrides, audit events and access decisions.

#![warn(missing_docs)]

// Core identities
mod id;

// Authored content
mod content;

// Learner state
mod progress;
mod assessment;
mod override_;
mod event;

// Decisions
mod access;

// Re-exports
pub use id::*;

pub use content::{AssessmentRequirement, ContentKind, ContentNode, ContentRef, Enrollment};
pub use progress::{ProgressStatus, StudentProgress, TransitionError};
pub use assessment::AssessmentAttempt;
pub use override_::{current_override, OverrideAction, ProgressionOverride};
pub use event::{AuditAction, AuditEvent};
pub use access::{
    AccessResult, DenialReason, Prerequisite, PrerequisiteStatus, Requirement, UnlockedContent,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
