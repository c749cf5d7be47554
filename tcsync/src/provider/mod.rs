//! Timecode sources.
//!
//! Both variants sit behind [`TimecodeProvider`] and are driven the same way:
//! `connect`, read snapshots (pull) or subscribe to [`ProviderEvent`]s (push),
//! `disconnect`.

pub mod clock;
pub mod device;

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::link::HyperDeckConnector;
use crate::snapshot::TimecodeSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

pub use clock::{ClockProvider, DriftMonitor, DRIFT_THRESHOLD_MS};
pub use device::{DeviceProvider, InputFormatClassifier, OriginClassifier};

/// Capacity of each source's event channel.
pub const PROVIDER_EVENT_CAPACITY: usize = 256;

/// Which variant a source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Networked recorder.
    Device,
    /// Local clock.
    Clock,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Clock => write!(f, "clock"),
        }
    }
}

/// Notification from a source.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// A new snapshot was published.
    Update(TimecodeSnapshot),
    /// The source became connected.
    Connected,
    /// The source lost its connection.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// The source failed in a way it will not recover from on its own.
    Error {
        /// Error description.
        message: String,
    },
    /// Wall clock and monotonic clock diverged (advisory).
    Drift {
        /// Accumulated divergence in milliseconds.
        drift_ms: f64,
    },
}

/// A source of timecode.
#[async_trait]
pub trait TimecodeProvider: Send + Sync {
    /// Begin acquiring. Returns immediately if already connected.
    async fn connect(&self) -> Result<()>;

    /// Stop acquiring and release timers and sockets.
    async fn disconnect(&self);

    /// Last published snapshot.
    fn snapshot(&self) -> TimecodeSnapshot;

    /// Acquire a fresh snapshot now. Failures are reported in the snapshot.
    async fn read_timecode(&self) -> TimecodeSnapshot;

    /// Subscribe to notifications.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Whether the source is currently connected.
    fn is_connected(&self) -> bool;

    /// Which variant this is.
    fn kind(&self) -> ProviderKind;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Builds sources from configuration.
pub trait ProviderFactory: Send + Sync {
    /// Create a source; configuration errors are reported here.
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn TimecodeProvider>>;
}

/// Builds HyperDeck device sources and clock sources.
#[derive(Debug, Default, Clone)]
pub struct DefaultProviderFactory;

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn TimecodeProvider>> {
        match config {
            ProviderConfig::Device(device) => {
                let connector = Arc::new(HyperDeckConnector::new(device.request_timeout));
                Ok(Arc::new(DeviceProvider::new(device.clone(), connector)?))
            }
            ProviderConfig::Clock(clock) => Ok(Arc::new(ClockProvider::new(clock.clone())?)),
        }
    }
}
