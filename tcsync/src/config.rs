//! Source and manager configuration.
//!
//! Every type here is created once at startup and read-only afterwards. All
//! durations serialize as integer milliseconds under a `*_ms` key.

use crate::error::{Result, SyncError};
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tcsync_timecode::{parse_timecode, validate, FrameRate};

/// Default recorder control port.
pub const DEFAULT_DEVICE_PORT: u16 = 9993;

/// Poll rate bounds for device sources, in Hz.
pub const MIN_POLL_RATE_HZ: u32 = 1;
/// See [`MIN_POLL_RATE_HZ`].
pub const MAX_POLL_RATE_HZ: u32 = 25;

/// Upper bound on clock source tick rate, in Hz.
pub const MAX_CLOCK_UPDATE_RATE_HZ: f64 = 30.0;

/// Slowest clock tick or snapshot forwarding rate accepted, in Hz.
pub const MIN_RATE_HZ: f64 = 0.001;

/// Spacing for a rate in Hz; rates below [`MIN_RATE_HZ`] use the floor.
fn interval_for(hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / hz.max(MIN_RATE_HZ))
}

fn check_rate_hz(name: &str, hz: f64) -> Result<()> {
    if !(hz.is_finite() && hz >= MIN_RATE_HZ) {
        return Err(SyncError::Config(format!(
            "{} must be at least {} Hz, got {}",
            name, MIN_RATE_HZ, hz
        )));
    }
    Ok(())
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Resolve a configured frame rate and check its drop-frame pairing.
fn checked_rate(frame_rate: f64, drop_frame: bool) -> Result<FrameRate> {
    let rate = FrameRate::from_fps(frame_rate).map_err(|e| SyncError::Config(e.to_string()))?;
    if drop_frame && !rate.supports_drop_frame() {
        return Err(SyncError::Config(format!(
            "drop-frame is only valid at 29.97 or 59.94 fps, not {}",
            rate
        )));
    }
    Ok(rate)
}

/// Exponential reconnect schedule for device sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Attempts before giving up; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(SyncError::Config(format!(
                "reconnect multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(SyncError::Config(
                "reconnect max_delay must not be shorter than initial_delay".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of a networked recorder source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Recorder host name or address.
    pub host: String,
    /// Recorder control port.
    pub port: u16,
    /// Poll rate when push notifications are unavailable.
    pub poll_rate_hz: u32,
    /// Deadline for the connection handshake.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Deadline for a single request round trip.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Frame rate the recorder runs at.
    pub frame_rate: f64,
    /// Whether the recorder counts drop-frame.
    pub drop_frame: bool,
    /// Report internally generated timecode as degraded.
    pub require_external: bool,
    /// Subscribe to push notifications instead of polling.
    pub use_notifications: bool,
    /// Reconnect schedule after link loss.
    pub reconnect: ReconnectPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_DEVICE_PORT,
            poll_rate_hz: 10,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
            frame_rate: 29.97,
            drop_frame: true,
            require_external: false,
            use_notifications: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl DeviceConfig {
    /// Device configuration for a host with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the control port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set frame rate and drop-frame counting.
    pub fn with_frame_rate(mut self, frame_rate: f64, drop_frame: bool) -> Self {
        self.frame_rate = frame_rate;
        self.drop_frame = drop_frame;
        self
    }

    /// Set the polling rate.
    pub fn with_poll_rate(mut self, hz: u32) -> Self {
        self.poll_rate_hz = hz;
        self
    }

    /// Require timecode from an external input.
    pub fn with_require_external(mut self, require: bool) -> Self {
        self.require_external = require;
        self
    }

    /// Enable or disable push notifications.
    pub fn with_notifications(mut self, enable: bool) -> Self {
        self.use_notifications = enable;
        self
    }

    /// Set the handshake deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnect schedule.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Poll rate clamped to the supported range.
    pub fn effective_poll_rate_hz(&self) -> u32 {
        self.poll_rate_hz.clamp(MIN_POLL_RATE_HZ, MAX_POLL_RATE_HZ)
    }

    /// Interval between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.effective_poll_rate_hz() as f64)
    }

    /// The configured frame rate.
    pub fn rate(&self) -> Result<FrameRate> {
        checked_rate(self.frame_rate, self.drop_frame)
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SyncError::Config("device host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(SyncError::Config("device port must not be 0".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(SyncError::Config("device connect timeout must be positive".into()));
        }
        self.rate()?;
        self.reconnect.validate()
    }
}

/// How a clock source derives its timecode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Timecode equals local time of day, wrapping at midnight.
    #[default]
    TimeOfDay,
    /// Timecode starts at a fixed label on connect and counts elapsed frames.
    FixedStart {
        /// Label at the moment of connect.
        start_timecode: String,
    },
}

/// Configuration of a free-running local clock source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Frame rate to count in.
    pub frame_rate: f64,
    /// Whether to count drop-frame.
    pub drop_frame: bool,
    /// Tick rate; defaults to the frame rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_rate_hz: Option<f64>,
    /// Time-of-day or fixed-start counting.
    pub mode: ClockMode,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            frame_rate: 29.97,
            drop_frame: true,
            update_rate_hz: None,
            mode: ClockMode::TimeOfDay,
        }
    }
}

impl ClockConfig {
    /// Clock configuration at a frame rate.
    pub fn new(frame_rate: f64, drop_frame: bool) -> Self {
        Self {
            frame_rate,
            drop_frame,
            ..Default::default()
        }
    }

    /// Count from a fixed label instead of time of day.
    pub fn with_fixed_start(mut self, start_timecode: impl Into<String>) -> Self {
        self.mode = ClockMode::FixedStart {
            start_timecode: start_timecode.into(),
        };
        self
    }

    /// Set the tick rate.
    pub fn with_update_rate(mut self, hz: f64) -> Self {
        self.update_rate_hz = Some(hz);
        self
    }

    /// Tick rate after applying the default and the cap.
    pub fn effective_update_rate_hz(&self) -> f64 {
        self.update_rate_hz
            .unwrap_or(self.frame_rate)
            .min(MAX_CLOCK_UPDATE_RATE_HZ)
    }

    /// Interval between ticks.
    pub fn update_interval(&self) -> Duration {
        interval_for(self.effective_update_rate_hz())
    }

    /// The configured frame rate.
    pub fn rate(&self) -> Result<FrameRate> {
        checked_rate(self.frame_rate, self.drop_frame)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let rate = self.rate()?;
        check_rate_hz("clock update rate", self.effective_update_rate_hz())?;
        if let ClockMode::FixedStart { start_timecode } = &self.mode {
            let tc = parse_timecode(start_timecode, rate)?;
            if let Some(err) = validate(&tc, rate).into_iter().next() {
                return Err(SyncError::Config(format!(
                    "invalid start timecode {}: {}",
                    start_timecode, err
                )));
            }
            if tc.drop_frame != self.drop_frame {
                return Err(SyncError::Config(format!(
                    "start timecode {} does not match drop_frame = {}",
                    start_timecode, self.drop_frame
                )));
            }
        }
        Ok(())
    }
}

/// Configuration of one timecode source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Networked recorder.
    Device(DeviceConfig),
    /// Local clock.
    Clock(ClockConfig),
}

impl ProviderConfig {
    /// The kind of source this configures.
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Device(_) => ProviderKind::Device,
            Self::Clock(_) => ProviderKind::Clock,
        }
    }

    /// Configured frame rate in fps.
    pub fn frame_rate(&self) -> f64 {
        match self {
            Self::Device(c) => c.frame_rate,
            Self::Clock(c) => c.frame_rate,
        }
    }

    /// Configured drop-frame flag.
    pub fn drop_frame(&self) -> bool {
        match self {
            Self::Device(c) => c.drop_frame,
            Self::Clock(c) => c.drop_frame,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Device(c) => c.validate(),
            Self::Clock(c) => c.validate(),
        }
    }
}

impl From<DeviceConfig> for ProviderConfig {
    fn from(config: DeviceConfig) -> Self {
        Self::Device(config)
    }
}

impl From<ClockConfig> for ProviderConfig {
    fn from(config: ClockConfig) -> Self {
        Self::Clock(config)
    }
}

/// Configuration of the timecode manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Preferred source.
    pub primary: ProviderConfig,
    /// Backup source.
    pub fallback: ProviderConfig,
    /// How long a primary outage must last before failing over.
    #[serde(rename = "fallback_delay_ms", with = "duration_ms", default = "default_fallback_delay")]
    pub fallback_delay: Duration,
    /// Maximum rate of forwarded snapshots.
    #[serde(default = "default_max_emit_rate")]
    pub max_emit_rate_hz: f64,
    /// Interval between primary restoration attempts.
    #[serde(
        rename = "restore_interval_ms",
        with = "duration_ms",
        default = "default_restore_interval"
    )]
    pub restore_interval: Duration,
}

fn default_fallback_delay() -> Duration {
    Duration::from_millis(3000)
}

fn default_max_emit_rate() -> f64 {
    10.0
}

fn default_restore_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig::Device(DeviceConfig::default()),
            fallback: ProviderConfig::Clock(ClockConfig::default()),
            fallback_delay: default_fallback_delay(),
            max_emit_rate_hz: default_max_emit_rate(),
            restore_interval: default_restore_interval(),
        }
    }
}

impl ManagerConfig {
    /// Create a builder.
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// Minimum spacing between forwarded snapshots.
    pub fn emit_interval(&self) -> Duration {
        interval_for(self.max_emit_rate_hz)
    }

    /// How often a pending failover is re-evaluated.
    pub fn failover_check_interval(&self) -> Duration {
        self.fallback_delay
            .min(Duration::from_secs(1))
            .max(Duration::from_millis(1))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        check_rate_hz("max_emit_rate_hz", self.max_emit_rate_hz)?;
        if self.restore_interval.is_zero() {
            return Err(SyncError::Config("restore_interval must be positive".into()));
        }
        self.primary
            .validate()
            .map_err(|e| SyncError::Config(format!("primary: {}", e)))?;
        self.fallback
            .validate()
            .map_err(|e| SyncError::Config(format!("fallback: {}", e)))?;
        Ok(())
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builder for [`ManagerConfig`].
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Set the primary source.
    pub fn primary(mut self, primary: impl Into<ProviderConfig>) -> Self {
        self.config.primary = primary.into();
        self
    }

    /// Set the fallback source.
    pub fn fallback(mut self, fallback: impl Into<ProviderConfig>) -> Self {
        self.config.fallback = fallback.into();
        self
    }

    /// Set the failover delay.
    pub fn fallback_delay(mut self, delay: Duration) -> Self {
        self.config.fallback_delay = delay;
        self
    }

    /// Set the maximum emit rate.
    pub fn max_emit_rate_hz(mut self, hz: f64) -> Self {
        self.config.max_emit_rate_hz = hz;
        self
    }

    /// Set the restoration interval.
    pub fn restore_interval(mut self, interval: Duration) -> Self {
        self.config.restore_interval = interval;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ManagerConfig {
        self.config
    }
}
