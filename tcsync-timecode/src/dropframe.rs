//! Drop-frame label counting for 29.97 and 59.94 fps.
//!
//! At 30000/1001 fps a 30-label second runs slightly long, so drop-frame
//! timecode skips labels `;00` and `;01` (`;00`..`;03` at 59.94) at the start
//! of every minute not divisible by ten. Labels are skipped; frames are not.
//!
//! Counting works in ten-minute blocks. The first minute of a block keeps all
//! its labels and the other nine lose `drop` labels each.

use crate::error::{Result, TimecodeError};
use crate::smpte::{FrameRate, Timecode};

/// Block arithmetic for one drop-frame rate.
#[derive(Debug, Clone, Copy)]
struct Blocks {
    drop: u64,
    fps: u64,
    /// Frames in a minute that starts with skipped labels.
    short_minute: u64,
    /// Frames in ten minutes.
    block: u64,
}

impl Blocks {
    fn for_rate(frame_rate: FrameRate) -> Option<Self> {
        let drop = frame_rate.drop_rate() as u64;
        if drop == 0 {
            return None;
        }
        let fps = frame_rate.nominal_fps() as u64;
        let short_minute = fps * 60 - drop;
        Some(Self {
            drop,
            fps,
            short_minute,
            block: short_minute * 10 + drop,
        })
    }

    fn day(&self) -> u64 {
        self.block * 6 * 24
    }
}

/// Label for elapsed frame `frame_number`, wrapping at 24 hours.
pub(crate) fn label_for_frame(frame_number: u64, frame_rate: FrameRate) -> Timecode {
    let Some(blocks) = Blocks::for_rate(frame_rate) else {
        return Timecode::from_frames(frame_number, frame_rate, false);
    };

    let n = frame_number % blocks.day();
    let whole_blocks = n / blocks.block;
    let into_block = n % blocks.block;

    // Minutes inside the block that have already skipped their labels.
    let short_minutes = into_block.saturating_sub(blocks.drop) / blocks.short_minute;
    let labelled = n + blocks.drop * (9 * whole_blocks + short_minutes);

    let total_seconds = labelled / blocks.fps;
    Timecode {
        hours: (total_seconds / 3600 % 24) as u8,
        minutes: (total_seconds / 60 % 60) as u8,
        seconds: (total_seconds % 60) as u8,
        frames: (labelled % blocks.fps) as u8,
        drop_frame: true,
    }
}

/// Elapsed frame count for a drop-frame label.
pub(crate) fn frame_for_label(tc: &Timecode, frame_rate: FrameRate) -> u64 {
    let fps = frame_rate.nominal_fps() as u64;
    let seconds = (tc.hours as u64 * 60 + tc.minutes as u64) * 60 + tc.seconds as u64;
    let labelled = seconds * fps + tc.frames as u64;

    labelled.saturating_sub(frames_dropped_until(tc.hours, tc.minutes, frame_rate))
}

/// Rejects labels drop-frame counting never produces.
pub(crate) fn check_label(tc: &Timecode, frame_rate: FrameRate) -> Result<()> {
    if tc.drop_frame && is_dropped_frame(tc.minutes, tc.seconds, tc.frames, frame_rate) {
        return Err(TimecodeError::DroppedLabel {
            label: tc.to_string(),
        });
    }
    Ok(())
}

/// Labels skipped between `00:00:00;00` and the start of `hours:minutes`.
///
/// Always zero for rates without drop-frame counting.
#[must_use]
pub fn frames_dropped_until(hours: u8, minutes: u8, frame_rate: FrameRate) -> u64 {
    let total_minutes = hours as u64 * 60 + minutes as u64;
    frame_rate.drop_rate() as u64 * (total_minutes - total_minutes / 10)
}

/// Whether `MM:SS;FF` is one of the skipped labels at `frame_rate`.
#[must_use]
pub fn is_dropped_frame(minutes: u8, seconds: u8, frames: u8, frame_rate: FrameRate) -> bool {
    seconds == 0 && minutes % 10 != 0 && (frames as u32) < frame_rate.drop_rate()
}

/// Real duration of one frame in seconds.
#[must_use]
pub fn frame_duration_seconds(frame_rate: FrameRate) -> f64 {
    1.0 / frame_rate.as_f64()
}
