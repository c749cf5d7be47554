//! Why a timecode label or frame rate was rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for timecode operations.
pub type Result<T> = std::result::Result<T, TimecodeError>;

/// One of the four fields of a timecode label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    /// `HH`
    Hours,
    /// `MM`
    Minutes,
    /// `SS`
    Seconds,
    /// `FF`
    Frames,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hours => "hours",
            Self::Minutes => "minutes",
            Self::Seconds => "seconds",
            Self::Frames => "frames",
        })
    }
}

/// A rejected label, rate or frame offset.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimecodeError {
    /// The text is not shaped like `HH:MM:SS:FF` or `HH:MM:SS;FF`.
    #[error("malformed timecode {input:?}: {reason}")]
    Malformed {
        /// The rejected text, trimmed.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A field is larger than the label allows.
    #[error("{field} {value} out of range (0-{max})")]
    OutOfRange {
        /// Offending field.
        field: Field,
        /// Value found in the label.
        value: u8,
        /// Largest legal value at the frame rate in use.
        max: u32,
    },

    /// Not a usable frame rate (zero, negative or not finite).
    #[error("unusable frame rate {0}")]
    BadFrameRate(String),

    /// Offsetting would move before `00:00:00:00`.
    #[error("offset moves before 00:00:00:00")]
    Underflow,

    /// The label is one drop-frame counting never produces.
    #[error("{label} is skipped by drop-frame counting")]
    DroppedLabel {
        /// The skipped label, e.g. `00:01:00;00`.
        label: String,
    },
}

impl TimecodeError {
    pub(crate) fn malformed(input: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(field: Field, value: u8, max: u32) -> Self {
        Self::OutOfRange { field, value, max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_messages_name_the_problem() {
        let err = TimecodeError::malformed("01:02", "expected 11 characters");
        assert_eq!(
            err.to_string(),
            "malformed timecode \"01:02\": expected 11 characters"
        );

        let err = TimecodeError::out_of_range(Field::Frames, 25, 24);
        assert_eq!(err.to_string(), "frames 25 out of range (0-24)");

        let err = TimecodeError::DroppedLabel {
            label: "00:01:00;01".into(),
        };
        assert_eq!(
            err.to_string(),
            "00:01:00;01 is skipped by drop-frame counting"
        );
    }

    #[test]
    fn test_field_serializes_lowercase() {
        let err = TimecodeError::out_of_range(Field::Minutes, 61, 59);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["OutOfRange"]["field"], "minutes");
    }
}
