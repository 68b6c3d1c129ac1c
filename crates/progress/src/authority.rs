//! Instructor overrides and the audit trail.

use chrono::Utc;
use learnpath_core::{
    current_override, AuditAction, AuditEvent, ContentRef, OverrideAction, ProgressionOverride,
    StudentId, UserId,
};
use learnpath_storage::{ContentCatalog, ProgressStore};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ProgressionError, Result};

/// Records, clears and looks up instructor overrides. Every change is
/// audited once it is stored; a failed audit write is logged and does not
/// undo the change.
pub struct OverrideAuthority {
    catalog: Arc<dyn ContentCatalog>,
    store: Arc<dyn ProgressStore>,
}

impl OverrideAuthority {
    /// Create an authority.
    pub fn new(catalog: Arc<dyn ContentCatalog>, store: Arc<dyn ProgressStore>) -> Self {
        Self { catalog, store }
    }

    /// The standing override for (student, content), most recent first.
    pub async fn current(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Option<ProgressionOverride>> {
        let records = self.store.list_overrides(student, content).await?;
        Ok(current_override(&records).cloned())
    }

    /// Issue an override. A newer override supersedes older standing ones.
    pub async fn grant(
        &self,
        instructor: &UserId,
        student: &StudentId,
        content: &ContentRef,
        action: OverrideAction,
        reason: &str,
    ) -> Result<ProgressionOverride> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ProgressionError::InvalidInput("override reason is required".into()));
        }
        if self.catalog.get_node(content).await?.is_none() {
            return Err(ProgressionError::ContentNotFound(content.clone()));
        }

        let record = ProgressionOverride::new(
            student.clone(),
            content.clone(),
            action,
            reason,
            instructor.clone(),
        );
        self.store.append_override(&record).await?;
        self.audit(AuditEvent::new(
            instructor.clone(),
            student.clone(),
            content.clone(),
            AuditAction::OverrideGranted,
            format!("{}: {}", action.as_str(), reason),
        ))
        .await;

        info!(
            instructor = %instructor,
            student = %student,
            content = %content,
            action = action.as_str(),
            "Override granted"
        );
        Ok(record)
    }

    /// Clear every standing override for (student, content). Returns the
    /// cleared records; empty when nothing stood.
    pub async fn clear(
        &self,
        instructor: &UserId,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Vec<ProgressionOverride>> {
        let cleared = self
            .store
            .clear_overrides(student, content, instructor, Utc::now())
            .await?;

        for record in &cleared {
            self.audit(AuditEvent::new(
                instructor.clone(),
                student.clone(),
                content.clone(),
                AuditAction::OverrideCleared,
                format!("{} {}", record.action.as_str(), record.id),
            ))
            .await;
        }

        if !cleared.is_empty() {
            info!(
                instructor = %instructor,
                student = %student,
                content = %content,
                count = cleared.len(),
                "Override cleared"
            );
        }
        Ok(cleared)
    }

    /// Every override record for the pair, cleared ones included.
    pub async fn history(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Vec<ProgressionOverride>> {
        Ok(self.store.list_overrides(student, content).await?)
    }

    /// Audit events for `student`, oldest first.
    pub async fn audit_log(&self, student: &StudentId) -> Result<Vec<AuditEvent>> {
        Ok(self.store.list_events(student).await?)
    }

    /// Append an audit event.
    pub async fn record(&self, event: AuditEvent) -> Result<()> {
        self.store.append_event(&event).await?;
        Ok(())
    }

    /// Audit a change that is already stored.
    pub(crate) async fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.record(event.clone()).await {
            warn!(
                actor = %event.actor,
                student = %event.student_id,
                content = %event.content,
                action = ?event.action,
                error = %e,
                "Audit event lost"
            );
        }
    }
}
