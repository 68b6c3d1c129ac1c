//! The progression control engine.
//!
//! Decides access, applies progress updates and assessment submissions
//! inside per-row transactions, and reports content that an update
//! unlocked.

use chrono::Utc;
use learnpath_core::{
    AccessResult, AssessmentAttempt, AssessmentRequirement, AuditAction, AuditEvent, ContentId,
    ContentKind, ContentNode, ContentRef, DenialReason, OverrideAction, Prerequisite,
    PrerequisiteStatus, ProgressStatus, Requirement, StudentId, StudentProgress, Time,
    UnlockedContent, UserId,
};
use learnpath_storage::{ContentCatalog, EnrollmentDirectory, ProgressStore, StorageError};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::authority::OverrideAuthority;
use crate::config::EngineConfig;
use crate::error::{ProgressionError, Result};
use crate::gate::{AssessmentGate, GateEvaluation};
use crate::resolver::PrerequisiteResolver;

/// Owner-reachability nesting beyond this is treated as a cycle.
const MAX_REACHABLE_DEPTH: usize = 32;

type AccessFuture<'a> = Pin<Box<dyn Future<Output = Result<AccessResult>> + Send + 'a>>;

/// A progress update reported by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// The learner
    pub student_id: StudentId,
    /// Content being progressed
    pub content: ContentRef,
    /// Requested status
    pub status: ProgressStatus,
    /// Reported completion, 0..=100
    pub completion_percentage: u8,
    /// Reported time spent in seconds
    pub time_spent: u64,
}

impl ProgressUpdate {
    /// Create an update with no percentage or time reported.
    pub fn new(student_id: StudentId, content: ContentRef, status: ProgressStatus) -> Self {
        Self {
            student_id,
            content,
            status,
            completion_percentage: 0,
            time_spent: 0,
        }
    }

    /// Set the reported completion percentage.
    pub fn with_percentage(mut self, completion_percentage: u8) -> Self {
        self.completion_percentage = completion_percentage;
        self
    }

    /// Set the reported time spent.
    pub fn with_time_spent(mut self, seconds: u64) -> Self {
        self.time_spent = seconds;
        self
    }
}

/// What an update did to the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Row written
    Applied,
    /// Nothing to write
    Unchanged,
    /// Refused; the row is untouched
    Rejected {
        /// Stable error code
        code: String,
        /// Human readable explanation
        message: String,
    },
}

/// Result of [`ProgressionControlEngine::update_progress`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// What happened
    pub status: UpdateStatus,
    /// The row after the update, if one exists
    pub progress: Option<StudentProgress>,
    /// Content this update unlocked
    pub unlocked: UnlockedContent,
}

impl UpdateResult {
    fn rejected(code: &str, message: impl Into<String>, progress: Option<StudentProgress>) -> Self {
        Self {
            status: UpdateStatus::Rejected {
                code: code.to_string(),
                message: message.into(),
            },
            progress,
            unlocked: UnlockedContent::default(),
        }
    }

    /// Whether the row was written.
    pub fn is_applied(&self) -> bool {
        self.status == UpdateStatus::Applied
    }

    /// Whether the update was refused.
    pub fn is_rejected(&self) -> bool {
        matches!(self.status, UpdateStatus::Rejected { .. })
    }
}

/// A scored attempt at an assessment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSubmission {
    /// The learner
    pub student_id: StudentId,
    /// The assessment
    pub assessment_id: ContentId,
    /// Score, 0..=100
    pub score: u8,
    /// When the student opened the assessment
    pub started_at: Option<Time>,
    /// Client-chosen token that makes re-sends idempotent
    pub client_token: Option<String>,
}

impl AttemptSubmission {
    /// Create a submission.
    pub fn new(student_id: StudentId, assessment_id: impl Into<ContentId>, score: u8) -> Self {
        Self {
            student_id,
            assessment_id: assessment_id.into(),
            score,
            started_at: None,
            client_token: None,
        }
    }

    /// Record when the attempt started.
    pub fn started_at(mut self, at: Time) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Attach an idempotency token.
    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = Some(token.into());
        self
    }
}

/// Result of [`ProgressionControlEngine::submit_attempt`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    /// The recorded attempt
    pub attempt: AssessmentAttempt,
    /// Gate state including this attempt
    pub evaluation: GateEvaluation,
    /// The assessment's progress row
    pub progress: StudentProgress,
    /// Content this submission unlocked
    pub unlocked: UnlockedContent,
    /// The token matched an earlier submission; nothing was written
    pub duplicate: bool,
}

/// A dependent whose accessibility is compared before and after a write.
#[derive(Debug)]
struct CascadeCandidate {
    node: ContentRef,
    accessible_before: bool,
}

/// Decides access to learning content and applies progress updates.
pub struct ProgressionControlEngine {
    pub(crate) catalog: Arc<dyn ContentCatalog>,
    enrollments: Arc<dyn EnrollmentDirectory>,
    pub(crate) store: Arc<dyn ProgressStore>,
    resolver: PrerequisiteResolver,
    gate: AssessmentGate,
    authority: OverrideAuthority,
    config: EngineConfig,
}

impl ProgressionControlEngine {
    /// Create an engine over its collaborators with the default config.
    pub fn new(
        catalog: Arc<dyn ContentCatalog>,
        enrollments: Arc<dyn EnrollmentDirectory>,
        store: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            resolver: PrerequisiteResolver::new(catalog.clone()),
            gate: AssessmentGate::new(catalog.clone(), store.clone()),
            authority: OverrideAuthority::new(catalog.clone(), store.clone()),
            catalog,
            enrollments,
            store,
            config: EngineConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.resolver.set_cache_dependents(config.cache_dependents);
        self.config = config;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The prerequisite resolver.
    pub fn resolver(&self) -> &PrerequisiteResolver {
        &self.resolver
    }

    /// The assessment gate.
    pub fn gate(&self) -> &AssessmentGate {
        &self.gate
    }

    /// The override authority.
    pub fn authority(&self) -> &OverrideAuthority {
        &self.authority
    }

    // ==================== Access ====================

    /// Whether `student` may access `content` right now.
    ///
    /// Denials are data on the result. Errors mean unknown content, a
    /// prerequisite cycle, or a storage fault.
    pub async fn can_access_content(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<AccessResult> {
        let node = self.resolver.node(content).await?;
        let result = self.decide(student, &node, 0).await?;
        debug!(
            student = %student,
            content = %content,
            can_access = result.can_access,
            reason = ?result.reason,
            "Access decided"
        );
        Ok(result)
    }

    fn decide<'a>(
        &'a self,
        student: &'a StudentId,
        node: &'a ContentNode,
        depth: usize,
    ) -> AccessFuture<'a> {
        Box::pin(async move {
            let content = node.reference();
            if depth > MAX_REACHABLE_DEPTH {
                warn!(content = %content, "owner chain too deep, treating as cycle");
                return Err(ProgressionError::CyclicPrerequisiteGraph { cycle: vec![content] });
            }

            // A standing override short-circuits everything else.
            if let Some(standing) = self.authority.current(student, &content).await? {
                let prerequisites = match self.prerequisite_statuses(student, node, depth).await {
                    Ok(prerequisites) => prerequisites,
                    Err(e) => {
                        warn!(content = %content, error = %e, "prerequisites unavailable under override");
                        Vec::new()
                    }
                };
                let mut result = match standing.action {
                    OverrideAction::Unlock => AccessResult::granted(content, prerequisites),
                    OverrideAction::Block => {
                        AccessResult::denied(content, DenialReason::InstructorBlock, prerequisites)
                    }
                };
                result.override_action = Some(standing.action);
                return Ok(result);
            }

            if depth == 0 {
                self.resolver.transitive_closure(node).await?;
            }
            let prerequisites = self.prerequisite_statuses(student, node, depth).await?;

            if !self.enrollments.is_enrolled(student, &node.course_id).await? {
                return Ok(AccessResult::denied(content, DenialReason::NotEnrolled, prerequisites));
            }
            if !node.published {
                return Ok(AccessResult::denied(content, DenialReason::Unpublished, prerequisites));
            }
            if let Some(blocked_by) = prerequisites.iter().find(|p| !p.completed).map(|p| p.node.clone()) {
                let mut result =
                    AccessResult::denied(content, DenialReason::PrerequisitesNotMet, prerequisites);
                result.blocked_by = Some(blocked_by);
                return Ok(result);
            }

            Ok(AccessResult::granted(content, prerequisites))
        })
    }

    async fn prerequisite_statuses(
        &self,
        student: &StudentId,
        node: &ContentNode,
        depth: usize,
    ) -> Result<Vec<PrerequisiteStatus>> {
        let mut statuses = Vec::new();
        for edge in self.resolver.direct_prerequisites(node).await? {
            let completed = self.requirement_met(student, &edge, depth).await?;
            statuses.push(PrerequisiteStatus {
                node: edge.node,
                requirement: edge.requirement,
                completed,
            });
        }
        Ok(statuses)
    }

    async fn requirement_met(
        &self,
        student: &StudentId,
        edge: &Prerequisite,
        depth: usize,
    ) -> Result<bool> {
        let Some(required) = self.catalog.get_node(&edge.node).await? else {
            warn!(student = %student, missing = %edge.node, "prerequisite does not exist");
            return Ok(false);
        };
        if !required.published {
            return Ok(false);
        }

        match edge.requirement {
            Requirement::Completed => Ok(self
                .store
                .load_progress(student, &edge.node)
                .await?
                .map(|row| row.is_completed())
                .unwrap_or(false)),
            Requirement::Passed => {
                let requirement = AssessmentGate::requirement(&required)?;
                let attempts = self.store.list_attempts(student, &required.id).await?;
                Ok(AssessmentGate::evaluate_attempts(requirement, &attempts).passed)
            }
            Requirement::Reachable => {
                Ok(self.decide(student, &required, depth + 1).await?.can_access)
            }
        }
    }

    // ==================== Progress updates ====================

    /// Apply a progress update and report what it unlocked.
    ///
    /// Access denials are errors. A disallowed transition, or completing a
    /// lesson whose mandatory assessment is not passed, is a rejected no-op.
    pub async fn update_progress(&self, update: ProgressUpdate) -> Result<UpdateResult> {
        if update.completion_percentage > 100 {
            return Err(ProgressionError::InvalidInput(format!(
                "completion percentage {} is above 100",
                update.completion_percentage
            )));
        }
        let node = self.resolver.node(&update.content).await?;
        self.with_retries("update progress", || self.apply_update(&update, &node))
            .await
    }

    async fn apply_update(&self, update: &ProgressUpdate, node: &ContentNode) -> Result<UpdateResult> {
        let student = &update.student_id;
        let content = node.reference();

        let access = self.decide(student, node, 0).await?;
        if !access.can_access {
            return Err(ProgressionError::from_denial(&access, student, node));
        }
        let unlock_override = access.override_action == Some(OverrideAction::Unlock);

        let mut tx = self.store.begin(student, &content).await?;
        let current = tx.progress().cloned();

        if update.status == ProgressStatus::Blocked {
            tx.rollback().await?;
            return Ok(UpdateResult::rejected(
                "invalid_state_transition",
                format!(
                    "{} is blocked only by an exhausted assessment or an instructor block",
                    content
                ),
                current,
            ));
        }
        if node.kind == ContentKind::Assessment && update.status == ProgressStatus::Completed {
            tx.rollback().await?;
            return Ok(UpdateResult::rejected(
                "invalid_state_transition",
                format!("{} moves to {} only by submitting attempts", content, update.status),
                current,
            ));
        }

        let mut row = current.clone().unwrap_or_else(|| {
            StudentProgress::new(student.clone(), node.course_id.clone(), content.clone())
        });
        let gate_open = match (&node.requirement, node.kind) {
            (Some(requirement), ContentKind::Assessment) => {
                !AssessmentGate::evaluate_attempts(requirement, tx.attempts()).is_terminal_failure()
            }
            _ => false,
        };

        let path = match row.status.path_to(update.status, unlock_override || gate_open) {
            Ok(path) => path,
            Err(e) => {
                tx.rollback().await?;
                debug!(student = %student, content = %content, error = %e, "Transition rejected");
                return Ok(UpdateResult::rejected("invalid_state_transition", e.to_string(), current));
            }
        };

        if path.contains(&ProgressStatus::Completed) {
            for requirement in self.resolver.completion_requirements(node).await? {
                if !self.requirement_met(student, &requirement, 0).await? {
                    tx.rollback().await?;
                    return Ok(UpdateResult::rejected(
                        "completion_requirements_not_met",
                        format!("{} needs {} passed before completion", content, requirement.node),
                        current,
                    ));
                }
            }
        }

        let previous = row.clone();
        let now = Utc::now();
        for step in &path {
            row.set_status(*step, now);
        }
        row.raise(update.completion_percentage, update.time_spent);

        let changed = current.is_none()
            || row.status != previous.status
            || row.completion_percentage != previous.completion_percentage
            || row.time_spent != previous.time_spent;
        if !changed {
            tx.rollback().await?;
            debug!(student = %student, content = %content, "Update changes nothing");
            return Ok(UpdateResult {
                status: UpdateStatus::Unchanged,
                progress: current,
                unlocked: UnlockedContent::default(),
            });
        }
        row.last_accessed = now;

        let candidates = if row.status != previous.status {
            self.cascade_candidates(student, &content).await
        } else {
            Vec::new()
        };

        tx.put_progress(row.clone());
        tx.commit().await?;
        row.version = previous.version + 1;

        info!(
            student = %student,
            content = %content,
            from = %previous.status,
            to = %row.status,
            completion = row.completion_percentage,
            "Progress updated"
        );

        let unlocked = self.settle_cascade(student, candidates).await;
        Ok(UpdateResult {
            status: UpdateStatus::Applied,
            progress: Some(row),
            unlocked,
        })
    }

    // ==================== Assessment submissions ====================

    /// Record a scored attempt, update the assessment's row and report what
    /// a newly passed gate unlocked.
    pub async fn submit_attempt(&self, submission: AttemptSubmission) -> Result<SubmissionOutcome> {
        if submission.score > 100 {
            return Err(ProgressionError::InvalidInput(format!(
                "score {} is above 100",
                submission.score
            )));
        }
        let reference = ContentRef::assessment(submission.assessment_id.clone());
        let node = self.resolver.node(&reference).await?;
        let requirement = AssessmentGate::requirement(&node)?.clone();

        self.with_retries("submit attempt", || {
            self.apply_submission(&submission, &node, &requirement)
        })
        .await
    }

    async fn apply_submission(
        &self,
        submission: &AttemptSubmission,
        node: &ContentNode,
        requirement: &AssessmentRequirement,
    ) -> Result<SubmissionOutcome> {
        let student = &submission.student_id;
        let content = node.reference();

        let access = self.decide(student, node, 0).await?;
        if !access.can_access {
            return Err(ProgressionError::from_denial(&access, student, node));
        }
        let unlock_override = access.override_action == Some(OverrideAction::Unlock);

        let mut tx = self.store.begin(student, &content).await?;
        let mut attempts = tx.attempts().to_vec();
        let current = tx.progress().cloned();
        let fresh_row =
            || StudentProgress::new(student.clone(), node.course_id.clone(), content.clone());

        if let Some(token) = submission.client_token.as_deref() {
            let existing = attempts
                .iter()
                .find(|a| a.client_token.as_deref() == Some(token))
                .cloned();
            if let Some(existing) = existing {
                tx.rollback().await?;
                debug!(student = %student, assessment = %node.id, token, "Duplicate submission");
                return Ok(SubmissionOutcome {
                    attempt: existing,
                    evaluation: AssessmentGate::evaluate_attempts(requirement, &attempts),
                    progress: current.unwrap_or_else(fresh_row),
                    unlocked: UnlockedContent::default(),
                    duplicate: true,
                });
            }
        }

        let before = AssessmentGate::evaluate_attempts(requirement, &attempts);
        if before.is_terminal_failure() && !unlock_override {
            tx.rollback().await?;
            return Err(ProgressionError::AssessmentAttemptsExhausted {
                assessment: node.id.clone(),
                used: before.attempts_used,
                max: requirement.max_attempts.unwrap_or(before.attempts_used),
            });
        }

        let now = Utc::now();
        let mut attempt = AssessmentAttempt::scored(
            requirement,
            student.clone(),
            before.attempts_used + 1,
            submission.score,
            submission.started_at,
            now,
        );
        attempt.client_token = submission.client_token.clone();
        attempts.push(attempt.clone());
        let after = AssessmentGate::evaluate_attempts(requirement, &attempts);

        let target = if after.passed {
            ProgressStatus::Completed
        } else if after.is_terminal_failure() && !unlock_override {
            ProgressStatus::Blocked
        } else {
            ProgressStatus::InProgress
        };
        let unblocked = unlock_override || !before.is_terminal_failure();

        let mut row = current.clone().unwrap_or_else(fresh_row);
        let previous_status = row.status;
        let previous_version = row.version;
        let path = match row.status.path_to(target, unblocked) {
            Ok(path) => path,
            Err(e) => {
                tx.rollback().await?;
                return Err(e.into());
            }
        };
        for step in &path {
            row.set_status(*step, now);
        }
        row.attempts_count = after.attempts_used;
        row.best_score = Some(after.best_score);
        row.last_accessed = now;

        let candidates = if after.passed != before.passed || row.status != previous_status {
            self.cascade_candidates(student, &content).await
        } else {
            Vec::new()
        };

        tx.append_attempt(attempt.clone());
        tx.put_progress(row.clone());
        tx.commit().await?;
        row.version = previous_version + 1;

        if attempt.late {
            info!(student = %student, assessment = %node.id, attempt = attempt.attempt_number, "Late attempt recorded");
        }
        info!(
            student = %student,
            assessment = %node.id,
            attempt = attempt.attempt_number,
            score = attempt.score,
            best = after.best_score,
            passed = after.passed,
            status = %row.status,
            "Attempt submitted"
        );

        let unlocked = self.settle_cascade(student, candidates).await;
        Ok(SubmissionOutcome {
            attempt,
            evaluation: after,
            progress: row,
            unlocked,
            duplicate: false,
        })
    }

    // ==================== Instructor operations ====================

    /// Return a row to `not_started` so the content can be worked again.
    ///
    /// Attempts are kept. Returns `None` when the student had no row.
    pub async fn reset_progress(
        &self,
        instructor: &UserId,
        student: &StudentId,
        content: &ContentRef,
        reason: &str,
    ) -> Result<Option<StudentProgress>> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ProgressionError::InvalidInput("reset reason is required".into()));
        }
        self.resolver.node(content).await?;

        let reset = self
            .with_retries("reset progress", || self.apply_reset(student, content))
            .await?;

        if let Some(row) = &reset {
            self.authority
                .audit(AuditEvent::new(
                    instructor.clone(),
                    student.clone(),
                    content.clone(),
                    AuditAction::ProgressReset,
                    reason,
                ))
                .await;
            info!(instructor = %instructor, student = %student, content = %content, version = row.version, "Progress reset");
        }
        Ok(reset)
    }

    async fn apply_reset(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Option<StudentProgress>> {
        let mut tx = self.store.begin(student, content).await?;
        let Some(mut row) = tx.progress().cloned() else {
            tx.rollback().await?;
            return Ok(None);
        };

        let version = row.version;
        row.status = ProgressStatus::NotStarted;
        row.completion_percentage = 0;
        row.completed_at = None;
        row.last_accessed = Utc::now();

        tx.put_progress(row.clone());
        tx.commit().await?;
        row.version = version + 1;
        Ok(Some(row))
    }

    /// Every prerequisite cycle among a course's content.
    pub async fn validate_course(&self, course_id: &ContentId) -> Result<Vec<Vec<ContentRef>>> {
        self.resolver.find_cycles(course_id).await
    }

    /// Forget cached graph data for a course after its content changed.
    pub async fn invalidate_course(&self, course_id: &ContentId) {
        self.resolver.invalidate_course(course_id).await;
    }

    // ==================== Internals ====================

    async fn with_retries<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = self.config.conflict_retries;
        loop {
            match attempt().await {
                Err(ProgressionError::Storage(StorageError::Conflict(detail))) => {
                    if retries == 0 {
                        warn!(operation, detail = %detail, "Write conflict, giving up");
                        return Err(ProgressionError::ConcurrentUpdateConflict(detail));
                    }
                    retries -= 1;
                    warn!(operation, detail = %detail, "Write conflict, retrying");
                }
                other => return other,
            }
        }
    }

    /// Dependents of `origin`, plus nodes reachable from them through owner
    /// edges, with their accessibility before the pending write.
    async fn cascade_candidates(
        &self,
        student: &StudentId,
        origin: &ContentRef,
    ) -> Vec<CascadeCandidate> {
        let mut seen: HashSet<ContentRef> = HashSet::from([origin.clone()]);
        let mut queue: VecDeque<(ContentRef, usize)> = VecDeque::new();
        for dependent in self.dependents_quiet(origin).await {
            if seen.insert(dependent.node.clone()) {
                queue.push_back((dependent.node, 1));
            }
        }

        let mut candidates = Vec::new();
        while let Some((node, depth)) = queue.pop_front() {
            if depth < self.config.cascade_depth {
                for dependent in self.dependents_quiet(&node).await {
                    if dependent.requirement == Requirement::Reachable
                        && seen.insert(dependent.node.clone())
                    {
                        queue.push_back((dependent.node, depth + 1));
                    }
                }
            }
            let accessible_before = self.accessible_quiet(student, &node).await;
            candidates.push(CascadeCandidate { node, accessible_before });
        }
        candidates
    }

    /// Candidates that flipped to accessible and were never started.
    async fn settle_cascade(
        &self,
        student: &StudentId,
        candidates: Vec<CascadeCandidate>,
    ) -> UnlockedContent {
        let mut unlocked = UnlockedContent::default();
        for candidate in candidates {
            if candidate.accessible_before || !self.accessible_quiet(student, &candidate.node).await {
                continue;
            }
            match self.store.load_progress(student, &candidate.node).await {
                Ok(None) => unlocked.push(&candidate.node),
                Ok(Some(row)) if row.status == ProgressStatus::NotStarted => {
                    unlocked.push(&candidate.node)
                }
                Ok(Some(row)) => {
                    debug!(content = %candidate.node, status = %row.status, "Already started, not reported")
                }
                Err(e) => warn!(content = %candidate.node, error = %e, "Cascade read failed"),
            }
        }

        if !unlocked.is_empty() {
            info!(student = %student, count = unlocked.len(), "Content unlocked");
        }
        unlocked
    }

    async fn dependents_quiet(&self, node: &ContentRef) -> Vec<crate::resolver::Dependent> {
        match self.resolver.dependents_of(node).await {
            Ok(found) => found,
            Err(e) => {
                warn!(content = %node, error = %e, "Dependents lookup failed");
                Vec::new()
            }
        }
    }

    async fn accessible_quiet(&self, student: &StudentId, content: &ContentRef) -> bool {
        let decision = match self.resolver.node(content).await {
            Ok(node) => self.decide(student, &node, 0).await,
            Err(e) => Err(e),
        };
        match decision {
            Ok(result) => result.can_access,
            Err(e) => {
                warn!(student = %student, content = %content, error = %e, "Access check failed during cascade");
                false
            }
        }
    }
}
