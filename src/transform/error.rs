//! Per-event transform errors
//!
//! None of these abort a run. The dispatcher logs them, bumps a counter and
//! moves on to the next event.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// A field the matched handler cannot do without is missing
    #[error("incomplete {kind} event: missing `{field}`")]
    IncompleteEvent { kind: String, field: String },

    /// The kind discriminator is not in the dispatch table
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// A defining field is present but could not be parsed
    #[error("malformed `{field}`: {raw:?}")]
    MalformedIdentityInput { field: String, raw: String },
}

impl TransformError {
    pub fn incomplete(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self::IncompleteEvent {
            kind: kind.into(),
            field: field.into(),
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::IncompleteEvent { .. })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::UnknownEventKind(_))
    }
}
