//! Error types for the ian event store.

use std::fmt;

use thiserror::Error;

/// The recurrence field a parse failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceField {
    RRule,
    RDate,
    ExDate,
}

impl fmt::Display for RecurrenceField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecurrenceField::RRule => write!(f, "RRULE"),
            RecurrenceField::RDate => write!(f, "RDATE"),
            RecurrenceField::ExDate => write!(f, "EXDATE"),
        }
    }
}

/// Errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum IanError {
    #[error("Invalid event path: {0}")]
    InvalidPath(String),

    #[error("Failed validation: {0}")]
    Validation(String),

    #[error("{field} parse failed: {message}")]
    Recurrence {
        field: RecurrenceField,
        message: String,
    },

    #[error("Invalid duration '{input}': {reason}")]
    Duration { input: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event '{0}' is constant and cannot be modified")]
    ConstantEvent(String),

    #[error("Collision with {} event(s): {}", .0.len(), .0.join(", "))]
    Collision(Vec<String>),

    #[error("Calendar source type '{0}' is not supported yet")]
    UnsupportedSource(String),

    #[error("Failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("Cannot find a free file name for '{0}'")]
    NoFreeName(String),

    #[error("No such event '{0}'")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for store operations.
pub type IanResult<T> = Result<T, IanError>;
