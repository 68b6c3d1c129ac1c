//! Request/response facade for the UI and API layer.
//!
//! Expected refusals (denials, rejected transitions, exhausted attempts)
//! come back as `success: false` with an error code. Content defects and
//! storage faults stay errors.

use learnpath_core::{
    AccessResult, AssessmentAttempt, ContentId, ContentKind, ContentRef, OverrideAction,
    OverrideId, ProgressStatus, StudentId, StudentProgress, Time, UnlockedContent, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::{
    AttemptSubmission, ProgressUpdate, ProgressionControlEngine, UpdateStatus,
};
use crate::error::{ProgressionError, Result};
use crate::gate::GateEvaluation;
use crate::overview::CourseOverview;

/// `check-access` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAccessRequest {
    /// Content id
    pub content_id: ContentId,
    /// Content kind
    pub content_type: ContentKind,
}

/// `update-progress` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProgressRequest {
    /// Content id
    pub content_id: ContentId,
    /// Content kind
    pub content_type: ContentKind,
    /// Requested status
    pub status: ProgressStatus,
    /// Reported completion
    #[serde(default)]
    pub completion_percentage: u8,
    /// Reported time spent in seconds
    #[serde(default)]
    pub time_spent: u64,
}

/// `submit-attempt` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttemptRequest {
    /// The assessment
    pub assessment_id: ContentId,
    /// Score, 0..=100
    pub score: u8,
    /// When the attempt started
    #[serde(default)]
    pub started_at: Option<Time>,
    /// Idempotency token
    #[serde(default)]
    pub client_token: Option<String>,
}

/// `override` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    /// The learner
    pub student_id: StudentId,
    /// Content id
    pub content_id: ContentId,
    /// Content kind
    pub content_kind: ContentKind,
    /// Unlock or block
    pub action: OverrideAction,
    /// Why the instructor intervened
    pub reason: String,
}

/// `clear-override` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearOverrideRequest {
    /// The learner
    pub student_id: StudentId,
    /// Content id
    pub content_id: ContentId,
    /// Content kind
    pub content_kind: ContentKind,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable code
    pub code: String,
    /// Human readable message
    pub message: String,
}

impl From<&ProgressionError> for ApiError {
    fn from(err: &ProgressionError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// `update-progress` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgressResponse {
    /// Whether the update was accepted
    pub success: bool,
    /// Content the update unlocked
    pub unlocked_content: UnlockedContent,
    /// The row after the update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<StudentProgress>,
    /// Why the update was refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// `submit-attempt` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttemptResponse {
    /// Whether the attempt was recorded (or matched a previous one)
    pub success: bool,
    /// Content the attempt unlocked
    pub unlocked_content: UnlockedContent,
    /// The attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AssessmentAttempt>,
    /// Gate state after the attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<GateEvaluation>,
    /// Why the attempt was refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// `override` / `clear-override` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideResponse {
    /// Whether the request took effect
    pub success: bool,
    /// Records created or cleared
    pub override_ids: Vec<OverrideId>,
    /// Why the request was refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// Thin adapter from wire shapes to engine calls.
#[derive(Clone)]
pub struct ProgressionApi {
    engine: Arc<ProgressionControlEngine>,
}

impl ProgressionApi {
    /// Wrap an engine.
    pub fn new(engine: Arc<ProgressionControlEngine>) -> Self {
        Self { engine }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &ProgressionControlEngine {
        &self.engine
    }

    /// `POST check-access`
    pub async fn check_access(
        &self,
        student: &StudentId,
        request: CheckAccessRequest,
    ) -> Result<AccessResult> {
        let content = ContentRef::new(request.content_id, request.content_type);
        self.engine.can_access_content(student, &content).await
    }

    /// `POST update-progress`
    pub async fn update_progress(
        &self,
        student: &StudentId,
        request: UpdateProgressRequest,
    ) -> Result<UpdateProgressResponse> {
        let update = ProgressUpdate::new(
            student.clone(),
            ContentRef::new(request.content_id, request.content_type),
            request.status,
        )
        .with_percentage(request.completion_percentage)
        .with_time_spent(request.time_spent);

        match self.engine.update_progress(update).await {
            Ok(result) => {
                let error = match &result.status {
                    UpdateStatus::Rejected { code, message } => Some(ApiError {
                        code: code.clone(),
                        message: message.clone(),
                    }),
                    UpdateStatus::Applied | UpdateStatus::Unchanged => None,
                };
                Ok(UpdateProgressResponse {
                    success: error.is_none(),
                    unlocked_content: result.unlocked,
                    progress: result.progress,
                    error,
                })
            }
            Err(e) if e.is_defect() => Err(e),
            Err(e) => Ok(UpdateProgressResponse {
                success: false,
                unlocked_content: UnlockedContent::default(),
                progress: None,
                error: Some(ApiError::from(&e)),
            }),
        }
    }

    /// `POST submit-attempt`
    pub async fn submit_attempt(
        &self,
        student: &StudentId,
        request: SubmitAttemptRequest,
    ) -> Result<SubmitAttemptResponse> {
        let mut submission = AttemptSubmission::new(student.clone(), request.assessment_id, request.score);
        submission.started_at = request.started_at;
        submission.client_token = request.client_token;

        match self.engine.submit_attempt(submission).await {
            Ok(outcome) => Ok(SubmitAttemptResponse {
                success: true,
                unlocked_content: outcome.unlocked,
                attempt: Some(outcome.attempt),
                evaluation: Some(outcome.evaluation),
                error: None,
            }),
            Err(e) if e.is_defect() => Err(e),
            Err(e) => Ok(SubmitAttemptResponse {
                success: false,
                unlocked_content: UnlockedContent::default(),
                attempt: None,
                evaluation: None,
                error: Some(ApiError::from(&e)),
            }),
        }
    }

    /// `POST override`
    pub async fn grant_override(
        &self,
        instructor: &UserId,
        request: OverrideRequest,
    ) -> Result<OverrideResponse> {
        let content = ContentRef::new(request.content_id, request.content_kind);
        let granted = self
            .engine
            .authority()
            .grant(instructor, &request.student_id, &content, request.action, &request.reason)
            .await;

        match granted {
            Ok(record) => Ok(OverrideResponse {
                success: true,
                override_ids: vec![record.id],
                error: None,
            }),
            Err(e) if e.is_defect() => Err(e),
            Err(e) => Ok(OverrideResponse {
                success: false,
                override_ids: Vec::new(),
                error: Some(ApiError::from(&e)),
            }),
        }
    }

    /// `POST clear-override`
    pub async fn clear_override(
        &self,
        instructor: &UserId,
        request: ClearOverrideRequest,
    ) -> Result<OverrideResponse> {
        let content = ContentRef::new(request.content_id, request.content_kind);
        let cleared = self
            .engine
            .authority()
            .clear(instructor, &request.student_id, &content)
            .await?;

        Ok(OverrideResponse {
            success: !cleared.is_empty(),
            override_ids: cleared.into_iter().map(|o| o.id).collect(),
            error: None,
        })
    }

    /// `GET course-progress-overview/{courseId}`
    pub async fn course_progress_overview(
        &self,
        student: &StudentId,
        course_id: &ContentId,
    ) -> Result<CourseOverview> {
        self.engine.course_overview(student, course_id).await
    }
}
