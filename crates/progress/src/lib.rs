//! Progression control (Layer 3)
//!
//! Access decisions, progress updates with unlock cascades, assessment
//! gating and instructor overrides.

#![warn(missing_docs)]

pub mod api;
pub mod authority;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod overview;
pub mod resolver;

#[cfg(test)]
pub(crate) mod fixtures;

pub use api::{
    ApiError, CheckAccessRequest, ClearOverrideRequest, OverrideRequest, OverrideResponse,
    ProgressionApi, SubmitAttemptRequest, SubmitAttemptResponse, UpdateProgressRequest,
    UpdateProgressResponse,
};
pub use authority::OverrideAuthority;
pub use config::EngineConfig;
pub use engine::{
    AttemptSubmission, ProgressUpdate, ProgressionControlEngine, SubmissionOutcome, UpdateResult,
    UpdateStatus,
};
pub use error::{ProgressionError, Result};
pub use gate::{AssessmentGate, AttemptsRemaining, GateEvaluation};
pub use overview::{CourseOverview, OverviewItem};
pub use resolver::{Dependent, PrerequisiteResolver};
