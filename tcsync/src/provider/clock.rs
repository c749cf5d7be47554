//! Free-running local clock source.

use super::{ProviderEvent, ProviderKind, TimecodeProvider, PROVIDER_EVENT_CAPACITY};
use crate::config::{ClockConfig, ClockMode};
use crate::error::Result;
use crate::snapshot::{SignalStatus, TimecodeSnapshot, TimecodeSource};
use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tcsync_timecode::{parse_timecode, FrameRate, Timecode};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Accumulated clock divergence that triggers a drift warning.
pub const DRIFT_THRESHOLD_MS: f64 = 100.0;

/// Compares wall-clock progress with monotonic progress between observations.
///
/// The signed difference is accumulated; once its magnitude exceeds the
/// threshold the accumulated value is reported and the accumulator resets.
#[derive(Debug, Clone)]
pub struct DriftMonitor {
    threshold_ms: f64,
    last: Option<(Instant, DateTime<Utc>)>,
    accumulated_ms: f64,
}

impl DriftMonitor {
    /// Monitor with a reporting threshold in milliseconds.
    pub fn new(threshold_ms: f64) -> Self {
        Self {
            threshold_ms,
            last: None,
            accumulated_ms: 0.0,
        }
    }

    /// Record one observation; returns the drift when it crosses the threshold.
    pub fn observe(&mut self, monotonic: Instant, wall: DateTime<Utc>) -> Option<f64> {
        let previous = self.last.replace((monotonic, wall));
        let (last_monotonic, last_wall) = previous?;

        let monotonic_ms = monotonic
            .saturating_duration_since(last_monotonic)
            .as_secs_f64()
            * 1000.0;
        let wall_ms = (wall - last_wall)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(monotonic_ms);

        self.accumulated_ms += wall_ms - monotonic_ms;
        if self.accumulated_ms.abs() > self.threshold_ms {
            let drift = self.accumulated_ms;
            self.accumulated_ms = 0.0;
            Some(drift)
        } else {
            None
        }
    }

    /// Divergence accumulated since the last report.
    pub fn accumulated_ms(&self) -> f64 {
        self.accumulated_ms
    }

    /// Forget all observations.
    pub fn reset(&mut self) {
        self.last = None;
        self.accumulated_ms = 0.0;
    }
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self::new(DRIFT_THRESHOLD_MS)
    }
}

/// Frames since midnight for a time of day.
///
/// Drop-frame labels track real time, so they count at the true rate; other
/// labels count at the nominal rate so that `HH:MM:SS` reads as the clock.
fn time_of_day_frames(ms_since_midnight: u64, rate: FrameRate, drop_frame: bool) -> u64 {
    if drop_frame && rate.supports_drop_frame() {
        let (num, den) = rate.as_rational();
        (ms_since_midnight as u128 * num as u128 / (den as u128 * 1000)) as u64
    } else {
        ms_since_midnight * rate.nominal_fps() as u64 / 1000
    }
}

/// Whole frames elapsed at the true rate.
fn elapsed_frames(elapsed: Duration, rate: FrameRate) -> u64 {
    let (num, den) = rate.as_rational();
    (elapsed.as_nanos() * num as u128 / (den as u128 * 1_000_000_000)) as u64
}

fn local_ms_since_midnight() -> u64 {
    let now = Local::now();
    let millis = now.nanosecond().min(999_999_999) / 1_000_000;
    now.num_seconds_from_midnight() as u64 * 1000 + millis as u64
}

struct ClockState {
    connected: bool,
    base: Option<Instant>,
    snapshot: TimecodeSnapshot,
    drift: DriftMonitor,
    ticker: Option<JoinHandle<()>>,
}

struct ClockInner {
    config: ClockConfig,
    rate: FrameRate,
    start_frame: Option<u64>,
    events: broadcast::Sender<ProviderEvent>,
    state: Mutex<ClockState>,
}

impl ClockInner {
    fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    fn disconnected_snapshot(&self) -> TimecodeSnapshot {
        TimecodeSnapshot::disconnected(
            TimecodeSource::SystemClock,
            self.config.frame_rate,
            self.config.drop_frame,
        )
    }

    fn current_frames(&self, base: Instant) -> u64 {
        match self.start_frame {
            Some(start) => start + elapsed_frames(base.elapsed(), self.rate),
            None => {
                time_of_day_frames(local_ms_since_midnight(), self.rate, self.config.drop_frame)
            }
        }
    }

    /// Compute, store and return a fresh snapshot. `None` when not connected.
    fn refresh(&self) -> Option<TimecodeSnapshot> {
        let mut state = self.state.lock();
        let base = state.base.filter(|_| state.connected)?;
        let frames = self.current_frames(base);
        let tc = Timecode::from_frames(frames, self.rate, self.config.drop_frame);
        let snapshot = TimecodeSnapshot::live(
            TimecodeSource::SystemClock,
            SignalStatus::Ok,
            tc.to_string(),
            self.config.frame_rate,
            self.config.drop_frame,
        );
        state.snapshot = snapshot.clone();
        Some(snapshot)
    }

    fn tick(&self) {
        let Some(snapshot) = self.refresh() else {
            return;
        };
        let drift = self.state.lock().drift.observe(snapshot.read_at, snapshot.captured_at);
        self.emit(ProviderEvent::Update(snapshot));

        if let Some(drift_ms) = drift {
            error!(
                drift_ms,
                threshold_ms = DRIFT_THRESHOLD_MS,
                "System clock drift detected"
            );
            self.emit(ProviderEvent::Drift { drift_ms });
        }
    }
}

/// Generates timecode from the local clock.
///
/// A running clock always reports `Ok`. Drift between wall clock and
/// monotonic clock is reported through [`ProviderEvent::Drift`] and logged,
/// but does not change the status.
pub struct ClockProvider {
    inner: Arc<ClockInner>,
}

impl ClockProvider {
    /// Create a clock source; rejects drop-frame at non-drop rates.
    pub fn new(config: ClockConfig) -> Result<Self> {
        config.validate()?;
        let rate = config.rate()?;
        let start_frame = match &config.mode {
            ClockMode::TimeOfDay => None,
            ClockMode::FixedStart { start_timecode } => {
                Some(parse_timecode(start_timecode, rate)?.to_frames(rate))
            }
        };

        let (events, _) = broadcast::channel(PROVIDER_EVENT_CAPACITY);
        let snapshot = TimecodeSnapshot::disconnected(
            TimecodeSource::SystemClock,
            config.frame_rate,
            config.drop_frame,
        );

        Ok(Self {
            inner: Arc::new(ClockInner {
                config,
                rate,
                start_frame,
                events,
                state: Mutex::new(ClockState {
                    connected: false,
                    base: None,
                    snapshot,
                    drift: DriftMonitor::default(),
                    ticker: None,
                }),
            }),
        })
    }

    /// The source configuration.
    pub fn config(&self) -> &ClockConfig {
        &self.inner.config
    }

    /// Divergence accumulated by the drift monitor.
    pub fn accumulated_drift_ms(&self) -> f64 {
        self.inner.state.lock().drift.accumulated_ms()
    }
}

#[async_trait]
impl TimecodeProvider for ClockProvider {
    async fn connect(&self) -> Result<()> {
        let period = self.inner.config.update_interval();
        {
            let mut state = self.inner.state.lock();
            if state.connected {
                return Ok(());
            }
            state.connected = true;
            state.base = Some(Instant::now());
            state.drift.reset();

            // `ticker` is set whenever `connected` is.
            let inner = Arc::clone(&self.inner);
            state.ticker = Some(tokio::spawn(async move {
                let mut ticks = interval(period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticks.tick().await;
                loop {
                    ticks.tick().await;
                    inner.tick();
                }
            }));
        }

        self.inner.tick();

        info!(
            source = %self.describe(),
            update_rate_hz = self.inner.config.effective_update_rate_hz(),
            "Clock source started"
        );
        self.inner.emit(ProviderEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        let ticker = {
            let mut state = self.inner.state.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            state.base = None;
            state.snapshot = self.inner.disconnected_snapshot();
            state.ticker.take()
        };
        if let Some(ticker) = ticker {
            ticker.abort();
        }

        debug!(source = %self.describe(), "Clock source stopped");
        self.inner.emit(ProviderEvent::Disconnected {
            reason: "disconnected".into(),
        });
    }

    fn snapshot(&self) -> TimecodeSnapshot {
        self.inner.state.lock().snapshot.clone()
    }

    async fn read_timecode(&self) -> TimecodeSnapshot {
        self.inner
            .refresh()
            .unwrap_or_else(|| self.inner.disconnected_snapshot())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Clock
    }

    fn describe(&self) -> String {
        let mode = match &self.inner.config.mode {
            ClockMode::TimeOfDay => "time-of-day".to_string(),
            ClockMode::FixedStart { start_timecode } => format!("from {}", start_timecode),
        };
        let counting = if self.inner.config.drop_frame { " DF" } else { "" };
        format!("clock {} {}{}", self.inner.rate, mode, counting)
    }
}

impl Drop for ClockProvider {
    fn drop(&mut self) {
        if let Some(ticker) = self.inner.state.lock().ticker.take() {
            ticker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rejects_drop_frame_at_25() {
        let result = ClockProvider::new(ClockConfig::new(25.0, true));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_rejects_update_rate_below_floor() {
        let config = ClockConfig::new(25.0, false).with_update_rate(1e-30);
        assert!(matches!(ClockProvider::new(config), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_time_of_day_frames() {
        let one_hour = 3_600_000;
        let frames = time_of_day_frames(one_hour, FrameRate::Fps25, false);
        let tc = Timecode::from_frames(frames, FrameRate::Fps25, false);
        assert_eq!(tc.to_string(), "01:00:00:00");

        let frames = time_of_day_frames(one_hour, FrameRate::Fps29_97, true);
        assert_eq!(
            Timecode::from_frames(frames, FrameRate::Fps29_97, true).to_string(),
            "01:00:00;00"
        );

        let frames = time_of_day_frames(one_hour + 500, FrameRate::Fps30, false);
        let tc = Timecode::from_frames(frames, FrameRate::Fps30, false);
        assert_eq!(tc.to_string(), "01:00:00:15");
    }

    #[test]
    fn test_elapsed_frames() {
        assert_eq!(elapsed_frames(Duration::from_secs(2), FrameRate::Fps25), 50);
        assert_eq!(elapsed_frames(Duration::from_secs(1001), FrameRate::Fps29_97), 30_000);
        assert_eq!(elapsed_frames(Duration::from_millis(39), FrameRate::Fps25), 0);
    }

    #[test]
    fn test_drift_monitor_reports_once_and_resets() {
        let mut monitor = DriftMonitor::default();
        let t0 = Instant::now();
        let w0 = Utc::now();
        assert_eq!(monitor.observe(t0, w0), None);

        // Wall clock runs 60ms fast per second.
        let step = |n: u64| {
            (
                t0 + Duration::from_secs(n),
                w0 + chrono::Duration::milliseconds(n as i64 * 1060),
            )
        };
        let (t1, w1) = step(1);
        assert_eq!(monitor.observe(t1, w1), None);
        assert!((monitor.accumulated_ms() - 60.0).abs() < 1e-6);

        let (t2, w2) = step(2);
        let drift = monitor.observe(t2, w2).unwrap();
        assert!((drift - 120.0).abs() < 1e-6);
        assert_eq!(monitor.accumulated_ms(), 0.0);

        let (t3, w3) = step(3);
        assert_eq!(monitor.observe(t3, w3), None);
    }

    #[test]
    fn test_drift_monitor_detects_backward_jump() {
        let mut monitor = DriftMonitor::default();
        let t0 = Instant::now();
        let w0 = Utc::now();
        monitor.observe(t0, w0);
        let drift = monitor
            .observe(t0 + Duration::from_secs(1), w0 - chrono::Duration::seconds(5))
            .unwrap();
        assert!(drift < -100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_start_counts_elapsed_frames() {
        let config = ClockConfig::new(25.0, false).with_fixed_start("01:00:00:00");
        let clock = ClockProvider::new(config).unwrap();
        assert_eq!(clock.snapshot().status, SignalStatus::Disconnected);

        clock.connect().await.unwrap();
        assert!(clock.is_connected());
        assert_eq!(clock.snapshot().timecode.as_deref(), Some("01:00:00:00"));

        tokio::time::advance(Duration::from_secs(2)).await;
        let snapshot = clock.read_timecode().await;
        assert_eq!(snapshot.timecode.as_deref(), Some("01:00:02:00"));
        assert_eq!(snapshot.status, SignalStatus::Ok);
        assert_eq!(snapshot.source, TimecodeSource::SystemClock);

        clock.disconnect().await;
        assert!(!clock.is_connected());
        assert_eq!(clock.read_timecode().await.timecode, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_publishes_updates() {
        let clock = ClockProvider::new(
            ClockConfig::new(25.0, false)
                .with_fixed_start("00:00:00:00")
                .with_update_rate(10.0),
        )
        .unwrap();
        let mut events = clock.subscribe();

        clock.connect().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), ProviderEvent::Update(_)));
        assert!(matches!(events.recv().await.unwrap(), ProviderEvent::Connected));

        let mut updates = 0;
        while updates < 3 {
            if let ProviderEvent::Update(snapshot) = events.recv().await.unwrap() {
                assert!(snapshot.is_usable());
                updates += 1;
            }
        }
        clock.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let clock = ClockProvider::new(ClockConfig::new(30.0, false)).unwrap();
        clock.connect().await.unwrap();
        clock.connect().await.unwrap();
        assert!(clock.is_connected());
        assert!(clock.snapshot().is_usable());
        assert!(clock.describe().contains("time-of-day"));
        clock.disconnect().await;
        clock.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_ticker() {
        let clock = ClockProvider::new(
            ClockConfig::new(25.0, false)
                .with_fixed_start("00:00:00:00")
                .with_update_rate(10.0),
        )
        .unwrap();
        let mut events = clock.subscribe();

        clock.connect().await.unwrap();
        assert!(clock.inner.state.lock().ticker.is_some());

        clock.disconnect().await;
        assert!(clock.inner.state.lock().ticker.is_none());
        while events.try_recv().is_ok() {}

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
    }
}
