//! # tcsync
//!
//! Frame-accurate SMPTE timecode acquisition with automatic source failover.
//!
//! ## Features
//!
//! - One [`TimecodeProvider`] trait over networked recorders ([`DeviceProvider`])
//!   and a free-running local clock ([`ClockProvider`])
//! - HyperDeck-compatible TCP recorder link with push notifications and polling
//! - [`TimecodeManager`] with delayed failover, periodic restoration and a
//!   bounded emit rate
//! - Immutable, serializable [`TimecodeSnapshot`]s for consumers
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tcsync::{ClockConfig, DeviceConfig, ManagerConfig, ManagerEvent, TimecodeManager};
//!
//! #[tokio::main]
//! async fn main() -> tcsync::Result<()> {
//!     let config = ManagerConfig::builder()
//!         .primary(DeviceConfig::new("192.168.1.50").with_frame_rate(29.97, true))
//!         .fallback(ClockConfig::new(29.97, true))
//!         .fallback_delay(Duration::from_secs(3))
//!         .build();
//!
//!     let manager = TimecodeManager::new(config)?;
//!     let mut events = manager.subscribe();
//!     manager.start().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ManagerEvent::Update(snapshot) = event {
//!             println!("{:?} {}", snapshot.timecode, snapshot.status);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod config;
pub mod error;
pub mod gate;
pub mod link;
pub mod manager;
pub mod provider;
pub mod snapshot;

pub use backoff::Backoff;
pub use config::{
    ClockConfig, ClockMode, DeviceConfig, ManagerConfig, ManagerConfigBuilder, ProviderConfig,
    ReconnectPolicy, DEFAULT_DEVICE_PORT,
};
pub use error::{Result, SyncError};
pub use gate::EmitGate;
pub use link::{
    HyperDeckConnector, LinkEvent, RecorderConnection, RecorderConnector, RecorderLink,
    TransportReport,
};
pub use manager::{ManagerEvent, ManagerPhase, ProviderRole, TimecodeManager};
pub use provider::{
    ClockProvider, DefaultProviderFactory, DeviceProvider, DriftMonitor, InputFormatClassifier,
    OriginClassifier, ProviderEvent, ProviderFactory, ProviderKind, TimecodeProvider,
};
pub use snapshot::{
    DeviceInfo, SignalStatus, TimecodeSnapshot, TimecodeSource, TransportInfo, TransportState,
};

/// Re-export of the timecode algebra crate.
pub use tcsync_timecode as timecode;
