//! SMPTE 12M timecode labels.
//!
//! A [`Timecode`] is only the four labelled fields plus the drop-frame flag.
//! The frame rate is supplied to every operation that needs it, because the
//! same label means a different frame count at 25 fps than at 29.97 fps.

use crate::dropframe;
use crate::error::{Field, Result, TimecodeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tolerance used when matching a floating point rate to a standard rate.
pub const FRAME_RATE_TOLERANCE: f64 = 0.01;

/// Most labels per second a two-digit frames field can count.
pub const MAX_NOMINAL_FPS: u32 = 100;

/// Frame rates seen on recorders and in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameRate {
    /// 24000/1001
    Fps23_976,
    /// 24
    Fps24,
    /// 25
    Fps25,
    /// 30000/1001
    Fps29_97,
    /// 30
    Fps30,
    /// 48
    Fps48,
    /// 50
    Fps50,
    /// 60000/1001
    Fps59_94,
    /// 60
    Fps60,
    /// Anything else, as an exact ratio.
    Custom {
        /// Frames.
        numerator: u32,
        /// Per this many seconds.
        denominator: u32,
    },
}

impl FrameRate {
    /// Named rates, slowest first.
    pub const STANDARD: [FrameRate; 9] = [
        Self::Fps23_976,
        Self::Fps24,
        Self::Fps25,
        Self::Fps29_97,
        Self::Fps30,
        Self::Fps48,
        Self::Fps50,
        Self::Fps59_94,
        Self::Fps60,
    ];

    /// Exact rate as `(numerator, denominator)`.
    #[must_use]
    pub fn as_rational(&self) -> (u32, u32) {
        match *self {
            Self::Fps23_976 => (24_000, 1001),
            Self::Fps24 => (24, 1),
            Self::Fps25 => (25, 1),
            Self::Fps29_97 => (30_000, 1001),
            Self::Fps30 => (30, 1),
            Self::Fps48 => (48, 1),
            Self::Fps50 => (50, 1),
            Self::Fps59_94 => (60_000, 1001),
            Self::Fps60 => (60, 1),
            Self::Custom {
                numerator,
                denominator,
            } => (numerator, denominator),
        }
    }

    /// Labels per second, `ceil(rate)`. 29.97 counts 30 labels.
    #[must_use]
    pub fn nominal_fps(&self) -> u32 {
        let (num, den) = self.as_rational();
        num.div_ceil(den.max(1))
    }

    /// Exact rate as a float.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        let (num, den) = self.as_rational();
        num as f64 / den as f64
    }

    /// Labels skipped at the start of each non-tenth minute; zero when the
    /// rate has no drop-frame counting.
    #[must_use]
    pub fn drop_rate(&self) -> u32 {
        match self {
            Self::Fps29_97 => 2,
            Self::Fps59_94 => 4,
            _ => 0,
        }
    }

    /// Whether `drop_frame = true` is a legal pairing with this rate.
    #[must_use]
    pub fn supports_drop_frame(&self) -> bool {
        self.drop_rate() > 0
    }

    /// Named rate for an exact ratio, or [`FrameRate::Custom`].
    #[must_use]
    pub fn from_rational(numerator: u32, denominator: u32) -> Self {
        Self::STANDARD
            .into_iter()
            .find(|rate| rate.as_rational() == (numerator, denominator))
            .unwrap_or(Self::Custom {
                numerator,
                denominator,
            })
    }

    /// Rate for a configured value such as `29.97`.
    ///
    /// Named rates match within [`FRAME_RATE_TOLERANCE`] of how they are
    /// usually written; anything else becomes a millisecond-precision ratio.
    /// Rates needing more than [`MAX_NOMINAL_FPS`] labels are rejected.
    pub fn from_fps(fps: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(TimecodeError::BadFrameRate(fps.to_string()));
        }

        if let Some(named) = Self::STANDARD
            .into_iter()
            .find(|rate| (rate.written() - fps).abs() <= FRAME_RATE_TOLERANCE)
        {
            return Ok(named);
        }

        let millis = (fps * 1000.0).round();
        if millis < 1.0 || millis > (MAX_NOMINAL_FPS * 1000) as f64 {
            return Err(TimecodeError::BadFrameRate(fps.to_string()));
        }
        Ok(Self::from_rational(millis as u32, 1000))
    }

    /// The rate as people write it (29.97 rather than 29.97002997).
    fn written(&self) -> f64 {
        match self {
            Self::Fps23_976 => 23.976,
            Self::Fps29_97 => 29.97,
            Self::Fps59_94 => 59.94,
            other => other.as_f64(),
        }
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom {
                numerator,
                denominator,
            } => write!(f, "{}/{}", numerator, denominator),
            Self::Fps23_976 | Self::Fps29_97 | Self::Fps59_94 => write!(f, "{}", self.written()),
            other => write!(f, "{}", other.nominal_fps()),
        }
    }
}

/// A timecode label.
///
/// Field order makes the derived ordering chronological for labels that share
/// a frame rate and drop-frame flag.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timecode {
    /// 0-23
    pub hours: u8,
    /// 0-59
    pub minutes: u8,
    /// 0-59
    pub seconds: u8,
    /// 0 to `nominal_fps - 1`
    pub frames: u8,
    /// Written with `;` before the frames field.
    pub drop_frame: bool,
}

impl Timecode {
    /// Build a label and check it against `frame_rate`.
    pub fn new(
        hours: u8,
        minutes: u8,
        seconds: u8,
        frames: u8,
        drop_frame: bool,
        frame_rate: FrameRate,
    ) -> Result<Self> {
        let tc = Self {
            hours,
            minutes,
            seconds,
            frames,
            drop_frame,
        };
        match validate(&tc, frame_rate).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(tc),
        }
    }

    /// Label for an elapsed frame count. Counts past 24 hours wrap.
    #[must_use]
    pub fn from_frames(frames: u64, frame_rate: FrameRate, drop_frame: bool) -> Self {
        if drop_frame && frame_rate.supports_drop_frame() {
            return dropframe::label_for_frame(frames, frame_rate);
        }

        let fps = frame_rate.nominal_fps() as u64;
        let n = frames % (fps * 86_400);
        let secs = n / fps;
        Self {
            hours: (secs / 3600) as u8,
            minutes: (secs / 60 % 60) as u8,
            seconds: (secs % 60) as u8,
            frames: (n % fps) as u8,
            drop_frame,
        }
    }

    /// Elapsed frames from `00:00:00:00` to this label.
    #[must_use]
    pub fn to_frames(&self, frame_rate: FrameRate) -> u64 {
        if self.drop_frame && frame_rate.supports_drop_frame() {
            return dropframe::frame_for_label(self, frame_rate);
        }
        let secs = self.hours as u64 * 3600 + self.minutes as u64 * 60 + self.seconds as u64;
        secs * frame_rate.nominal_fps() as u64 + self.frames as u64
    }

    /// Elapsed real time at the exact (fractional) rate.
    #[must_use]
    pub fn to_seconds(&self, frame_rate: FrameRate) -> f64 {
        self.to_frames(frame_rate) as f64 * dropframe::frame_duration_seconds(frame_rate)
    }

    /// Move by `delta` frames, keeping the drop-frame flag.
    pub fn add_frames(&self, delta: i64, frame_rate: FrameRate) -> Result<Self> {
        let target = i64::try_from(self.to_frames(frame_rate))
            .ok()
            .and_then(|now| now.checked_add(delta))
            .filter(|target| *target >= 0)
            .ok_or(TimecodeError::Underflow)?;
        Ok(Self::from_frames(target as u64, frame_rate, self.drop_frame))
    }

    /// `self - other` in frames.
    #[must_use]
    pub fn difference(&self, other: &Self, frame_rate: FrameRate) -> i64 {
        self.to_frames(frame_rate) as i64 - other.to_frames(frame_rate) as i64
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.frames
        )
    }
}

/// Checks the label shape and the hour, minute and second ranges.
///
/// Frames are not range checked because that needs a frame rate; use
/// [`parse_timecode`] when the rate is known.
impl FromStr for Timecode {
    type Err = TimecodeError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let bytes = text.as_bytes();

        if bytes.len() != 11 {
            return Err(TimecodeError::malformed(text, "expected HH:MM:SS:FF or HH:MM:SS;FF"));
        }
        if bytes[2] != b':' || bytes[5] != b':' {
            return Err(TimecodeError::malformed(text, "fields must be separated by ':'"));
        }
        let drop_frame = match bytes[8] {
            b':' => false,
            b';' => true,
            other => {
                return Err(TimecodeError::malformed(
                    text,
                    format!("{:?} before frames", other as char),
                ))
            }
        };

        let two_digits = |at: usize| -> Result<u8> {
            match bytes[at..at + 2] {
                [hi @ b'0'..=b'9', lo @ b'0'..=b'9'] => Ok((hi - b'0') * 10 + (lo - b'0')),
                _ => Err(TimecodeError::malformed(
                    text,
                    format!("non-digit at column {}", at + 1),
                )),
            }
        };

        let tc = Self {
            hours: two_digits(0)?,
            minutes: two_digits(3)?,
            seconds: two_digits(6)?,
            frames: two_digits(9)?,
            drop_frame,
        };
        if let Some(err) = clock_fields(&tc).next() {
            return Err(err);
        }
        Ok(tc)
    }
}

/// Range errors for the hour, minute and second fields.
fn clock_fields(tc: &Timecode) -> impl Iterator<Item = TimecodeError> {
    [
        (Field::Hours, tc.hours, 23),
        (Field::Minutes, tc.minutes, 59),
        (Field::Seconds, tc.seconds, 59),
    ]
    .into_iter()
    .filter(|(_, value, max)| *value > *max)
    .map(|(field, value, max)| TimecodeError::out_of_range(field, value, max as u32))
}

fn frames_field(tc: &Timecode, frame_rate: FrameRate) -> Option<TimecodeError> {
    let fps = frame_rate.nominal_fps();
    (tc.frames as u32 >= fps)
        .then(|| TimecodeError::out_of_range(Field::Frames, tc.frames, fps.saturating_sub(1)))
}

/// Parse a label for a known frame rate.
///
/// `;` before the frames field marks drop-frame. Skipped labels such as
/// `00:01:00;00` parse; [`validate`] reports them.
pub fn parse_timecode(s: &str, frame_rate: FrameRate) -> Result<Timecode> {
    let tc: Timecode = s.parse()?;
    match frames_field(&tc, frame_rate) {
        Some(err) => Err(err),
        None => Ok(tc),
    }
}

/// Format a label (`;` separator iff drop-frame).
#[must_use]
pub fn format_timecode(tc: &Timecode) -> String {
    tc.to_string()
}

/// Every rule `tc` breaks at `frame_rate`. Empty means valid.
#[must_use]
pub fn validate(tc: &Timecode, frame_rate: FrameRate) -> Vec<TimecodeError> {
    let mut problems: Vec<_> = clock_fields(tc).collect();
    problems.extend(frames_field(tc, frame_rate));
    if let Err(err) = dropframe::check_label(tc, frame_rate) {
        problems.push(err);
    }
    problems
}

/// Offset a label by `delta` frames, keeping its drop-frame flag.
pub fn add_frames(tc: &str, delta: i64, frame_rate: FrameRate) -> Result<String> {
    let parsed = parse_timecode(tc, frame_rate)?;
    Ok(parsed.add_frames(delta, frame_rate)?.to_string())
}
