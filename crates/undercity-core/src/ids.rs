//! Validated newtype identifiers.
//!
//! Grounded on `bobisme-maw`'s `WorkspaceId`/`EpochId` pattern
//! (`crates/maw-core/src/model/types.rs`): an id is never a bare `String`
//! past its constructor, so a caller can't accidentally pass a raw objective
//! string where an id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a proposed id string was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub value: String,
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid id '{}': {}", self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

macro_rules! validated_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Construct a new id. Must be non-empty, at most 128 bytes,
            /// and contain no ASCII whitespace (ids are used as path
            /// components and JSON keys).
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(ValidationError {
                        value,
                        reason: "must not be empty".to_owned(),
                    });
                }
                if value.len() > 128 {
                    return Err(ValidationError {
                        value,
                        reason: "must be at most 128 bytes".to_owned(),
                    });
                }
                if value.chars().any(char::is_whitespace) {
                    return Err(ValidationError {
                        value,
                        reason: "must not contain whitespace".to_owned(),
                    });
                }
                Ok(Self(value))
            }

            /// Generate a fresh random id with the given prefix.
            pub fn generate(prefix: &str) -> Self {
                use rand::Rng;
                let suffix: u64 = rand::thread_rng().gen();
                Self(format!("{prefix}-{suffix:016x}"))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_id!(TaskId, "Unique, immutable identifier for a Task.");
validated_id!(LearningId, "Unique identifier for a Learning.");
validated_id!(SessionId, "Identifier for one Worker's model session.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(TaskId::new("").is_err());
    }

    #[test]
    fn rejects_whitespace() {
        assert!(TaskId::new("a b").is_err());
    }

    #[test]
    fn accepts_reasonable_id() {
        assert_eq!(TaskId::new("task-123").unwrap().as_str(), "task-123");
    }

    #[test]
    fn generate_has_prefix() {
        let id = TaskId::generate("task");
        assert!(id.as_str().starts_with("task-"));
    }

    #[test]
    fn display_matches_as_str() {
        let id = TaskId::new("x").unwrap();
        assert_eq!(format!("{id}"), "x");
    }
}
