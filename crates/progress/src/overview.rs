//! Course progress overview for one student.

use learnpath_core::{
    AccessResult, ContentId, ContentKind, ContentRef, ProgressStatus, StudentId, StudentProgress,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::ProgressionControlEngine;
use crate::error::{ProgressionError, Result};

/// One lesson or assessment in an overview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewItem {
    /// The content
    pub content: ContentRef,
    /// Display title
    pub title: String,
    /// Stored status, `not_started` when there is no row
    pub status: ProgressStatus,
    /// Stored completion percentage
    pub completion_percentage: u8,
    /// Best assessment score, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_score: Option<u8>,
    /// Current access decision
    pub access: AccessResult,
}

/// A student's standing across a course.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOverview {
    /// The course
    pub course_id: ContentId,
    /// The learner
    pub student_id: StudentId,
    /// Published lessons and assessments in course order
    pub items: Vec<OverviewItem>,
    /// Items completed
    pub completed: usize,
    /// Items listed
    pub total: usize,
    /// Completed share, 0.0..=100.0
    pub percentage: f32,
    /// First accessible item not yet completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_up: Option<ContentRef>,
}

impl ProgressionControlEngine {
    /// Access decision and stored progress for every published lesson and
    /// assessment in a course. Read-only.
    pub async fn course_overview(
        &self,
        student: &StudentId,
        course_id: &ContentId,
    ) -> Result<CourseOverview> {
        let nodes = self.catalog.list_course_content(course_id).await?;
        if !nodes.iter().any(|n| n.kind == ContentKind::Course) {
            return Err(ProgressionError::ContentNotFound(ContentRef::course(course_id.clone())));
        }

        let rows: HashMap<ContentRef, StudentProgress> = self
            .store
            .list_progress(student, course_id)
            .await?
            .into_iter()
            .map(|row| (row.content.clone(), row))
            .collect();

        let mut items = Vec::new();
        for node in nodes
            .into_iter()
            .filter(|n| n.published && n.kind != ContentKind::Course)
        {
            let content = node.reference();
            let access = self.can_access_content(student, &content).await?;
            let row = rows.get(&content);
            items.push(OverviewItem {
                title: node.title,
                status: row.map(|r| r.status).unwrap_or(ProgressStatus::NotStarted),
                completion_percentage: row.map(|r| r.completion_percentage).unwrap_or(0),
                best_score: row.and_then(|r| r.best_score),
                access,
                content,
            });
        }

        let total = items.len();
        let completed = items
            .iter()
            .filter(|i| i.status == ProgressStatus::Completed)
            .count();
        let percentage = if total > 0 {
            (completed as f32 / total as f32) * 100.0
        } else {
            0.0
        };
        let next_up = items
            .iter()
            .find(|i| i.access.can_access && i.status != ProgressStatus::Completed)
            .map(|i| i.content.clone());

        Ok(CourseOverview {
            course_id: course_id.clone(),
            student_id: student.clone(),
            items,
            completed,
            total,
            percentage,
            next_up,
        })
    }
}
