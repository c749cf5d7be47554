//! Recorder link boundary.
//!
//! A [`RecorderConnector`] opens a persistent session to a recorder and hands
//! back a [`RecorderLink`] for request/response calls plus a channel of
//! unsolicited [`LinkEvent`]s. Device sources only talk to recorders through
//! these traits, so the wire protocol can be swapped (or mocked in tests).

pub mod hyperdeck;

use crate::error::Result;
use crate::snapshot::{DeviceInfo, TransportInfo, TransportState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use hyperdeck::HyperDeckConnector;

/// Transport state as reported by a recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReport {
    /// Transport mode.
    pub status: TransportState,
    /// Playback speed in percent.
    pub speed: i32,
    /// Active slot.
    pub slot_id: Option<u32>,
    /// Active clip.
    pub clip_id: Option<u32>,
    /// Timecode shown on the device (the live label).
    pub display_timecode: Option<String>,
    /// Position on the clip timeline.
    pub timeline_timecode: Option<String>,
    /// Format of the video input; `Some("none")` when nothing is connected.
    pub input_video_format: Option<String>,
}

impl Default for TransportReport {
    fn default() -> Self {
        Self {
            status: TransportState::Unknown,
            speed: 0,
            slot_id: None,
            clip_id: None,
            display_timecode: None,
            timeline_timecode: None,
            input_video_format: None,
        }
    }
}

impl TransportReport {
    /// Transport details for a snapshot.
    pub fn transport_info(&self) -> TransportInfo {
        TransportInfo {
            state: self.status,
            speed: self.speed,
            slot_id: self.slot_id,
            clip_id: self.clip_id,
        }
    }
}

/// Unsolicited message from a recorder session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Transport state changed (push notification).
    Transport(TransportReport),
    /// The session ended.
    Closed {
        /// Why the session ended.
        reason: String,
    },
}

/// Request/response half of a recorder session.
#[async_trait]
pub trait RecorderLink: Send + Sync {
    /// Query device identity.
    async fn device_info(&self) -> Result<DeviceInfo>;

    /// Query current transport state.
    async fn transport_info(&self) -> Result<TransportReport>;

    /// Ask the recorder to push transport changes as [`LinkEvent::Transport`].
    async fn subscribe_transport(&self) -> Result<()>;

    /// End the session. Safe to call more than once.
    async fn close(&self);
}

/// An open recorder session.
pub struct RecorderConnection {
    /// Request/response handle.
    pub link: Arc<dyn RecorderLink>,
    /// Notifications and close events.
    pub events: mpsc::Receiver<LinkEvent>,
}

impl std::fmt::Debug for RecorderConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderConnection").finish_non_exhaustive()
    }
}

/// Opens recorder sessions.
#[async_trait]
pub trait RecorderConnector: Send + Sync {
    /// Open a session, failing if it cannot be established within `timeout`.
    async fn open(&self, host: &str, port: u16, timeout: Duration) -> Result<RecorderConnection>;
}
