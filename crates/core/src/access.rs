//! Access decisions and unlock results returned to callers.

use serde::{Deserialize, Serialize};
use crate::content::{ContentKind, ContentRef};
use crate::id::ContentId;
use crate::override_::OverrideAction;

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// A standing block override
    InstructorBlock,
    /// Student is not enrolled in the owning course
    NotEnrolled,
    /// The node itself is not published
    Unpublished,
    /// At least one direct prerequisite is unmet
    PrerequisitesNotMet,
}

impl DenialReason {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::InstructorBlock => "instructor_block",
            DenialReason::NotEnrolled => "not_enrolled",
            DenialReason::Unpublished => "unpublished",
            DenialReason::PrerequisitesNotMet => "prerequisites_not_met",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a prerequisite edge demands of the required node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Lesson or course must be `completed`
    Completed,
    /// Mandatory assessment must be passed
    Passed,
    /// Owning lesson or course must be accessible
    Reachable,
}

/// A direct prerequisite edge `dependent -> node`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prerequisite {
    /// Required node
    pub node: ContentRef,

    /// What the node must satisfy
    pub requirement: Requirement,
}

impl Prerequisite {
    /// Create an edge.
    pub fn new(node: ContentRef, requirement: Requirement) -> Self {
        Self { node, requirement }
    }
}

/// One prerequisite and whether the student meets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteStatus {
    /// Required node
    pub node: ContentRef,

    /// What the node must satisfy
    pub requirement: Requirement,

    /// Whether it is met
    pub completed: bool,
}

/// Answer to "can this student access this content?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResult {
    /// Content asked about
    pub content: ContentRef,

    /// The decision
    pub can_access: bool,

    /// Why access was denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,

    /// First unmet prerequisite, in resolution order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<ContentRef>,

    /// Every direct prerequisite, met or not
    pub prerequisites: Vec<PrerequisiteStatus>,

    /// Override that decided the result, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_action: Option<OverrideAction>,
}

impl AccessResult {
    /// Access granted.
    pub fn granted(content: ContentRef, prerequisites: Vec<PrerequisiteStatus>) -> Self {
        Self {
            content,
            can_access: true,
            reason: None,
            blocked_by: None,
            prerequisites,
            override_action: None,
        }
    }

    /// Access denied for `reason`.
    pub fn denied(
        content: ContentRef,
        reason: DenialReason,
        prerequisites: Vec<PrerequisiteStatus>,
    ) -> Self {
        Self {
            content,
            can_access: false,
            reason: Some(reason),
            blocked_by: None,
            prerequisites,
            override_action: None,
        }
    }

    /// Unmet prerequisites in resolution order.
    pub fn unmet(&self) -> impl Iterator<Item = &PrerequisiteStatus> {
        self.prerequisites.iter().filter(|p| !p.completed)
    }
}

/// Content that became reachable as a side effect of one update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockedContent {
    /// Newly unlocked lessons
    pub lessons: Vec<ContentId>,

    /// Newly unlocked assessments
    pub assessments: Vec<ContentId>,

    /// Newly unlocked courses
    pub courses: Vec<ContentId>,
}

impl UnlockedContent {
    /// Record `node` in the partition for its kind. Duplicates are ignored.
    pub fn push(&mut self, node: &ContentRef) {
        let bucket = match node.kind {
            ContentKind::Lesson => &mut self.lessons,
            ContentKind::Assessment => &mut self.assessments,
            ContentKind::Course => &mut self.courses,
        };
        if !bucket.contains(&node.id) {
            bucket.push(node.id.clone());
        }
    }

    /// Whether nothing was unlocked.
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty() && self.assessments.is_empty() && self.courses.is_empty()
    }

    /// Total number of unlocked nodes.
    pub fn len(&self) -> usize {
        self.lessons.len() + self.assessments.len() + self.courses.len()
    }

    /// Whether `node` was unlocked.
    pub fn contains(&self, node: &ContentRef) -> bool {
        match node.kind {
            ContentKind::Lesson => self.lessons.contains(&node.id),
            ContentKind::Assessment => self.assessments.contains(&node.id),
            ContentKind::Course => self.courses.contains(&node.id),
        }
    }
}
