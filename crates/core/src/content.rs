//! Content model - the authored nodes progression is computed over.

use serde::{Deserialize, Serialize};
use crate::id::{ContentId, StudentId};
use crate::Time;

/// Kind of a content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// A course (top-level container)
    Course,
    /// A lesson inside a course
    Lesson,
    /// An assessment attached to a lesson or course
    Assessment,
}

impl ContentKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Course => "course",
            ContentKind::Lesson => "lesson",
            ContentKind::Assessment => "assessment",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "course" => Ok(ContentKind::Course),
            "lesson" => Ok(ContentKind::Lesson),
            "assessment" => Ok(ContentKind::Assessment),
            other => Err(format!("unknown content kind: {}", other)),
        }
    }
}

/// Polymorphic reference to a content node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentRef {
    /// Node id
    pub id: ContentId,

    /// Node kind
    pub kind: ContentKind,
}

impl ContentRef {
    /// Create a reference.
    pub fn new(id: impl Into<ContentId>, kind: ContentKind) -> Self {
        Self { id: id.into(), kind }
    }

    /// Reference a course.
    pub fn course(id: impl Into<ContentId>) -> Self {
        Self::new(id, ContentKind::Course)
    }

    /// Reference a lesson.
    pub fn lesson(id: impl Into<ContentId>) -> Self {
        Self::new(id, ContentKind::Lesson)
    }

    /// Reference an assessment.
    pub fn assessment(id: impl Into<ContentId>) -> Self {
        Self::new(id, ContentKind::Assessment)
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Gating configuration of an assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentRequirement {
    /// Assessment this requirement belongs to
    pub assessment_id: ContentId,

    /// Whether passing is required to progress
    pub is_mandatory: bool,

    /// Minimum best score (0-100) that counts as a pass
    pub minimum_passing_score: u8,

    /// Maximum number of attempts (None = unlimited)
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Advisory time limit per attempt, in minutes
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
}

impl AssessmentRequirement {
    /// Mandatory requirement with the given passing score and unlimited attempts.
    pub fn mandatory(assessment_id: impl Into<ContentId>, minimum_passing_score: u8) -> Self {
        Self {
            assessment_id: assessment_id.into(),
            is_mandatory: true,
            minimum_passing_score: minimum_passing_score.min(100),
            max_attempts: None,
            time_limit_minutes: None,
        }
    }

    /// Limit the number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the advisory time limit.
    pub fn with_time_limit(mut self, minutes: u32) -> Self {
        self.time_limit_minutes = Some(minutes);
        self
    }
}

/// A content node as served by the content catalog.
///
/// Prerequisite edges are not stored separately; they are derived from
/// `prerequisites`, `parent` and `assessment_id` on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentNode {
    /// Node id
    pub id: ContentId,

    /// Node kind
    pub kind: ContentKind,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Only published nodes are reachable by students
    pub published: bool,

    /// Owning course (a course owns itself)
    pub course_id: ContentId,

    /// Ordering inside the course
    #[serde(default)]
    pub position: u32,

    /// Explicitly required nodes, in authored order
    #[serde(default)]
    pub prerequisites: Vec<ContentRef>,

    /// Mandatory assessment attached to this lesson or course
    #[serde(default)]
    pub assessment_id: Option<ContentId>,

    /// Owning lesson or course of an assessment
    #[serde(default)]
    pub parent: Option<ContentRef>,

    /// Gating configuration (assessments only)
    #[serde(default)]
    pub requirement: Option<AssessmentRequirement>,
}

impl ContentNode {
    fn bare(id: ContentId, kind: ContentKind, course_id: ContentId, title: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            published: true,
            course_id,
            position: 0,
            prerequisites: Vec::new(),
            assessment_id: None,
            parent: None,
            requirement: None,
        }
    }

    /// Create a published course.
    pub fn course(id: impl Into<ContentId>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self::bare(id.clone(), ContentKind::Course, id, title)
    }

    /// Create a published lesson.
    pub fn lesson(
        id: impl Into<ContentId>,
        course_id: impl Into<ContentId>,
        title: impl Into<String>,
    ) -> Self {
        Self::bare(id.into(), ContentKind::Lesson, course_id.into(), title)
    }

    /// Create a published assessment owned by `parent`.
    pub fn assessment(
        id: impl Into<ContentId>,
        course_id: impl Into<ContentId>,
        parent: ContentRef,
        requirement: AssessmentRequirement,
    ) -> Self {
        let mut node = Self::bare(id.into(), ContentKind::Assessment, course_id.into(), "");
        node.parent = Some(parent);
        node.requirement = Some(requirement);
        node
    }

    /// Reference to this node.
    pub fn reference(&self) -> ContentRef {
        ContentRef::new(self.id.clone(), self.kind)
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the position inside the course.
    pub fn at(mut self, position: u32) -> Self {
        self.position = position;
        self
    }

    /// Append an explicit prerequisite.
    pub fn requires(mut self, prerequisite: ContentRef) -> Self {
        if !self.prerequisites.contains(&prerequisite) {
            self.prerequisites.push(prerequisite);
        }
        self
    }

    /// Attach a mandatory assessment.
    pub fn with_assessment(mut self, assessment_id: impl Into<ContentId>) -> Self {
        self.assessment_id = Some(assessment_id.into());
        self
    }

    /// Set the published flag.
    pub fn with_published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    /// Whether this node is an assessment that gates progression.
    pub fn is_gating_assessment(&self) -> bool {
        self.kind == ContentKind::Assessment
            && self.requirement.as_ref().map(|r| r.is_mandatory).unwrap_or(false)
    }
}

/// A student's enrollment in a course. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    /// Enrolled student
    pub student_id: StudentId,

    /// Course enrolled in
    pub course_id: ContentId,

    /// When the enrollment was created
    pub enrolled_at: Time,

    /// When the course was completed
    #[serde(default)]
    pub completed_at: Option<Time>,
}

impl Enrollment {
    /// Create an enrollment starting now.
    pub fn new(student_id: impl Into<StudentId>, course_id: impl Into<ContentId>) -> Self {
        Self {
            student_id: student_id.into(),
            course_id: course_id.into(),
            enrolled_at: chrono::Utc::now(),
            completed_at: None,
        }
    }
}
