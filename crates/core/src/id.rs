//! Unique identifiers for learnpath entities.
//!
//! Records owned by the engine (progress rows, attempts, overrides, audit
//! events) get ULIDs. Identifiers owned by external systems (students,
//! instructors, authored content) are opaque strings.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier.
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an externally issued identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for a StudentProgress row
    ProgressId
);

ulid_id!(
    /// Unique identifier for an AssessmentAttempt
    AttemptId
);

ulid_id!(
    /// Unique identifier for a ProgressionOverride record
    OverrideId
);

ulid_id!(
    /// Unique identifier for an AuditEvent
    EventId
);

string_id!(
    /// Identifier of a learner, issued by the identity provider
    StudentId
);

string_id!(
    /// Identifier of a course, lesson or assessment, issued by the authoring system
    ContentId
);

string_id!(
    /// Identifier of the person (or system) acting on progression state
    UserId
);

impl UserId {
    /// The engine itself.
    pub fn system() -> Self {
        Self("system".to_string())
    }
}
