//! Timecode snapshots: one immutable reading of timecode plus metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Where the timecode in a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimecodeSource {
    /// Recorder timecode locked to an external (SDI/reference) input.
    DeviceExternal,
    /// Recorder timecode generated internally by the device.
    DeviceInternal,
    /// Recorder timecode of unknown origin.
    DeviceUnknown,
    /// Generated from the local system clock.
    SystemClock,
}

impl TimecodeSource {
    /// Whether this value was read from a recorder.
    pub fn is_device(&self) -> bool {
        !matches!(self, Self::SystemClock)
    }
}

impl fmt::Display for TimecodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceExternal => write!(f, "DEVICE_EXTERNAL"),
            Self::DeviceInternal => write!(f, "DEVICE_INTERNAL"),
            Self::DeviceUnknown => write!(f, "DEVICE_UNKNOWN"),
            Self::SystemClock => write!(f, "SYSTEM_CLOCK"),
        }
    }
}

/// Health of the signal a snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    /// Valid timecode from the expected origin.
    Ok,
    /// Valid timecode, but not from the origin the configuration asks for.
    Degraded,
    /// Connected, but no valid timecode is being reported.
    NoSignal,
    /// Connection in progress.
    Connecting,
    /// Not connected.
    Disconnected,
    /// The last acquisition failed.
    Error,
}

impl SignalStatus {
    /// Whether a snapshot with this status carries a usable timecode.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ok | Self::Degraded)
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::NoSignal => write!(f, "NO_SIGNAL"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Recorder transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// Showing the input, not playing or recording.
    Preview,
    /// Stopped on a clip.
    Stopped,
    /// Playing back.
    Play,
    /// Fast forward.
    Forward,
    /// Rewind.
    Rewind,
    /// Jogging frame by frame.
    Jog,
    /// Shuttling at variable speed.
    Shuttle,
    /// Recording.
    Record,
    /// A state this crate does not know about.
    Unknown,
}

impl TransportState {
    /// Parse the lower-case name recorders report.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "preview" => Self::Preview,
            "stopped" => Self::Stopped,
            "play" => Self::Play,
            "forward" => Self::Forward,
            "rewind" => Self::Rewind,
            "jog" => Self::Jog,
            "shuttle" => Self::Shuttle,
            "record" => Self::Record,
            _ => Self::Unknown,
        }
    }
}

/// Transport details carried alongside recorder timecode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportInfo {
    /// Transport mode.
    pub state: TransportState,
    /// Playback speed in percent (100 = realtime).
    pub speed: i32,
    /// Active slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<u32>,
    /// Active clip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_id: Option<u32>,
}

/// Identity of the recorder a snapshot was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Display name (host or configured label).
    pub name: String,
    /// Model reported by the device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Firmware / software version reported by the device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// One reading of timecode.
///
/// Snapshots are never mutated after they are published; a newer reading
/// replaces the old one. A snapshot without a timecode always carries one of
/// `NoSignal`, `Connecting`, `Disconnected` or `Error`, which the constructors
/// guarantee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimecodeSnapshot {
    /// Monotonic time of the reading.
    #[serde(skip)]
    pub read_at: Instant,
    /// Wall-clock time of the reading.
    pub captured_at: DateTime<Utc>,
    /// Current timecode label.
    pub timecode: Option<String>,
    /// Position on the recorder's clip timeline, when it differs from `timecode`.
    pub timeline_timecode: Option<String>,
    /// Origin of the timecode.
    pub source: TimecodeSource,
    /// Signal health.
    pub status: SignalStatus,
    /// Frame rate the label is counted in.
    pub frame_rate: f64,
    /// Whether the label uses drop-frame counting.
    pub drop_frame: bool,
    /// Recorder transport details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportInfo>,
    /// Recorder identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    /// Description of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TimecodeSnapshot {
    fn base(
        source: TimecodeSource,
        status: SignalStatus,
        frame_rate: f64,
        drop_frame: bool,
    ) -> Self {
        Self {
            read_at: Instant::now(),
            captured_at: Utc::now(),
            timecode: None,
            timeline_timecode: None,
            source,
            status,
            frame_rate,
            drop_frame,
            transport: None,
            device: None,
            error: None,
        }
    }

    /// A reading that carries a timecode.
    pub fn live(
        source: TimecodeSource,
        status: SignalStatus,
        timecode: impl Into<String>,
        frame_rate: f64,
        drop_frame: bool,
    ) -> Self {
        let mut snapshot = Self::base(source, status, frame_rate, drop_frame);
        snapshot.timecode = Some(timecode.into());
        snapshot
    }

    /// A reading without a timecode.
    ///
    /// Usable statuses are replaced by `NoSignal`.
    pub fn without_timecode(
        source: TimecodeSource,
        status: SignalStatus,
        frame_rate: f64,
        drop_frame: bool,
    ) -> Self {
        let status = if status.is_usable() {
            SignalStatus::NoSignal
        } else {
            status
        };
        Self::base(source, status, frame_rate, drop_frame)
    }

    /// The initial value of every source before its first reading.
    pub fn disconnected(source: TimecodeSource, frame_rate: f64, drop_frame: bool) -> Self {
        Self::without_timecode(source, SignalStatus::Disconnected, frame_rate, drop_frame)
    }

    /// Snapshot describing a connection attempt in progress.
    pub fn connecting(source: TimecodeSource, frame_rate: f64, drop_frame: bool) -> Self {
        Self::without_timecode(source, SignalStatus::Connecting, frame_rate, drop_frame)
    }

    /// Snapshot describing a failed acquisition.
    pub fn failed(
        source: TimecodeSource,
        frame_rate: f64,
        drop_frame: bool,
        error: impl Into<String>,
    ) -> Self {
        Self::without_timecode(source, SignalStatus::Error, frame_rate, drop_frame)
            .with_error(error)
    }

    /// Attach the recorder's timeline position.
    pub fn with_timeline(mut self, timeline_timecode: Option<String>) -> Self {
        self.timeline_timecode = timeline_timecode;
        self
    }

    /// Attach transport details.
    pub fn with_transport(mut self, transport: Option<TransportInfo>) -> Self {
        self.transport = transport;
        self
    }

    /// Attach recorder identity.
    pub fn with_device(mut self, device: Option<DeviceInfo>) -> Self {
        self.device = device;
        self
    }

    /// Attach an error description.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether the snapshot carries a timecode consumers can use.
    pub fn is_usable(&self) -> bool {
        self.timecode.is_some() && self.status.is_usable()
    }

    /// Whether the no-timecode ⇒ non-usable-status rule holds.
    pub fn is_consistent(&self) -> bool {
        self.timecode.is_some()
            || matches!(
                self.status,
                SignalStatus::NoSignal
                    | SignalStatus::Disconnected
                    | SignalStatus::Error
                    | SignalStatus::Connecting
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_without_timecode_never_claims_ok() {
        let snapshot =
            TimecodeSnapshot::without_timecode(
                TimecodeSource::DeviceExternal,
                SignalStatus::Ok,
                25.0,
                false,
            );
        assert_eq!(snapshot.status, SignalStatus::NoSignal);
        assert!(snapshot.is_consistent());
        assert!(!snapshot.is_usable());
    }

    #[test]
    fn test_constructors_are_consistent() {
        let samples = [
            TimecodeSnapshot::disconnected(TimecodeSource::SystemClock, 25.0, false),
            TimecodeSnapshot::connecting(TimecodeSource::DeviceUnknown, 29.97, true),
            TimecodeSnapshot::failed(TimecodeSource::DeviceUnknown, 29.97, true, "timeout"),
            TimecodeSnapshot::live(
                TimecodeSource::SystemClock,
                SignalStatus::Ok,
                "01:00:00:00",
                25.0,
                false,
            ),
        ];
        for snapshot in samples {
            assert!(snapshot.is_consistent(), "{:?}", snapshot);
        }
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = TimecodeSnapshot::live(
            TimecodeSource::DeviceExternal,
            SignalStatus::Degraded,
            "10:00:00;02",
            29.97,
            true,
        )
        .with_transport(Some(TransportInfo {
            state: TransportState::Record,
            speed: 100,
            slot_id: Some(1),
            clip_id: None,
        }));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["source"], "DEVICE_EXTERNAL");
        assert_eq!(json["status"], "DEGRADED");
        assert_eq!(json["timecode"], "10:00:00;02");
        assert_eq!(json["transport"]["state"], "record");
        assert!(json.get("read_at").is_none());
        assert!(json["transport"].get("clip_id").is_none());
    }

    #[test]
    fn test_transport_state_names() {
        assert_eq!(TransportState::from_name("record"), TransportState::Record);
        assert_eq!(TransportState::from_name(" Play "), TransportState::Play);
        assert_eq!(TransportState::from_name("scrub"), TransportState::Unknown);
    }
}
