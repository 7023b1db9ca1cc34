//! Validated strong names.
//!
//! Type names and keys are wrapped in distinct newtypes so an event type can
//! never be passed where an aggregate type is expected. Every name is
//! validated once, at construction.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest accepted name, in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// Result type for name construction.
pub type Result<T> = std::result::Result<T, NameError>;

/// Errors raised when constructing a strong name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    #[error("{kind} exceeds {max} characters (got {length})")]
    TooLong {
        kind: &'static str,
        length: usize,
        max: usize,
    },
}

fn validate(kind: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(NameError::Empty { kind });
    }
    let length = value.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(NameError::TooLong {
            kind,
            length,
            max: MAX_NAME_LENGTH,
        });
    }
    Ok(())
}

macro_rules! strong_name {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Human-readable label used in validation errors.
            pub const KIND: &'static str = $kind;

            /// Validate and wrap a name.
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                validate(Self::KIND, &value)?;
                Ok(Self(value))
            }

            /// The underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Unwrap into the underlying string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = NameError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = NameError;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> String {
                name.0
            }
        }
    };
}

strong_name!(
    /// Category of aggregate, e.g. `User`.
    AggregateType,
    "aggregate type"
);

strong_name!(
    /// Category of event, e.g. `user.registered`.
    EventType,
    "event type"
);

strong_name!(
    /// Category of agent, e.g. `UserService`.
    AgentType,
    "agent type"
);

strong_name!(
    /// Caller-supplied unique key of an aggregate within its type.
    NaturalKey,
    "natural key"
);

strong_name!(
    /// External key distinguishing agents of the same type.
    AgentKey,
    "agent key"
);

impl From<Uuid> for NaturalKey {
    fn from(value: Uuid) -> Self {
        // A hyphenated UUID is always 36 characters.
        Self(value.to_string())
    }
}
