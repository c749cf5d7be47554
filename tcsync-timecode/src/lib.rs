//! Timecode labels and frame arithmetic for tcsync.
//!
//! Everything here is pure: no clocks, no sockets. A label is converted to an
//! elapsed frame count, moved, and converted back, so arithmetic is exact at
//! every rate including the drop-frame ones.
//!
//! ```rust
//! use tcsync_timecode::{parse_timecode, FrameRate, Timecode};
//!
//! let tc = parse_timecode("01:00:00:00", FrameRate::Fps25).unwrap();
//! assert_eq!(tc.to_frames(FrameRate::Fps25), 90_000);
//! assert_eq!(Timecode::from_frames(90_000, FrameRate::Fps25, false), tc);
//! ```
//!
//! At 29.97 drop-frame the labels `;00` and `;01` of most minutes are never
//! used:
//!
//! ```rust
//! use tcsync_timecode::{add_frames, FrameRate};
//!
//! let next = add_frames("00:00:59;29", 1, FrameRate::Fps29_97).unwrap();
//! assert_eq!(next, "00:01:00;02");
//! ```
//!
//! Pairing the drop-frame flag with a rate other than 29.97 or 59.94 is a
//! configuration mistake for the caller to reject (see
//! [`FrameRate::supports_drop_frame`]). Such labels are counted without drops.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod dropframe;
pub mod error;
pub mod smpte;

pub use dropframe::{frame_duration_seconds, frames_dropped_until, is_dropped_frame};
pub use error::{Field, Result, TimecodeError};
pub use smpte::{
    add_frames, format_timecode, parse_timecode, validate, FrameRate, Timecode,
    FRAME_RATE_TOLERANCE, MAX_NOMINAL_FPS,
};

/// Frames from `start` to `end`; negative when `end` comes first.
#[must_use]
pub fn duration_frames(start: &Timecode, end: &Timecode, frame_rate: FrameRate) -> i64 {
    end.difference(start, frame_rate)
}
