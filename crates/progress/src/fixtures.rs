//! Shared test catalog: one course, three lessons and a quiz.
//!
//! ```text
//! l1 -> l2 (owns quiz a1, passing 70) -> a1 passed -> l3
//! ```

use std::sync::Arc;

use learnpath_core::{
    AccessResult, AssessmentRequirement, ContentNode, ContentRef, Enrollment, ProgressStatus,
    StudentId,
};
use learnpath_storage::MemoryStore;

use crate::engine::{
    AttemptSubmission, ProgressUpdate, ProgressionControlEngine, SubmissionOutcome, UpdateResult,
};

pub(crate) struct Scenario {
    pub store: MemoryStore,
    pub engine: ProgressionControlEngine,
    pub student: StudentId,
}

impl Scenario {
    pub async fn new() -> Self {
        Self::with_max_attempts(None).await
    }

    pub async fn with_max_attempts(max_attempts: Option<u32>) -> Self {
        let store = MemoryStore::new();
        store.put_nodes(catalog(max_attempts)).await;
        store.enroll(Enrollment::new("s1", "c1")).await;

        Self {
            engine: engine_over(&store),
            store,
            student: StudentId::new("s1"),
        }
    }

    pub async fn access(&self, content: ContentRef) -> AccessResult {
        self.engine
            .can_access_content(&self.student, &content)
            .await
            .unwrap()
    }

    pub async fn start(&self, lesson: &str) -> UpdateResult {
        self.engine
            .update_progress(ProgressUpdate::new(
                self.student.clone(),
                ContentRef::lesson(lesson),
                ProgressStatus::InProgress,
            ))
            .await
            .unwrap()
    }

    pub async fn complete(&self, lesson: &str) -> UpdateResult {
        self.engine
            .update_progress(
                ProgressUpdate::new(
                    self.student.clone(),
                    ContentRef::lesson(lesson),
                    ProgressStatus::Completed,
                )
                .with_percentage(100),
            )
            .await
            .unwrap()
    }

    pub async fn submit(&self, score: u8) -> SubmissionOutcome {
        self.engine
            .submit_attempt(AttemptSubmission::new(self.student.clone(), "a1", score))
            .await
            .unwrap()
    }
}

pub(crate) fn catalog(max_attempts: Option<u32>) -> Vec<ContentNode> {
    let mut requirement = AssessmentRequirement::mandatory("a1", 70);
    requirement.max_attempts = max_attempts;

    vec![
        ContentNode::course("c1", "Rust Basics"),
        ContentNode::lesson("l1", "c1", "Ownership").at(1),
        ContentNode::lesson("l2", "c1", "Borrowing")
            .at(2)
            .requires(ContentRef::lesson("l1"))
            .with_assessment("a1"),
        ContentNode::assessment("a1", "c1", ContentRef::lesson("l2"), requirement)
            .with_title("Borrowing quiz")
            .at(3),
        ContentNode::lesson("l3", "c1", "Lifetimes")
            .at(4)
            .requires(ContentRef::assessment("a1")),
    ]
}

pub(crate) fn engine_over(store: &MemoryStore) -> ProgressionControlEngine {
    let shared = Arc::new(store.clone());
    ProgressionControlEngine::new(shared.clone(), shared.clone(), shared)
}
