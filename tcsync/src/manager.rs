//! Timecode manager: primary/fallback supervision.
//!
//! The manager owns one primary and one fallback source. It forwards
//! snapshots from whichever is active (rate limited), fails over when the
//! primary stays down for `fallback_delay`, and periodically tries to
//! restore the primary while running on the fallback.
//!
//! ```text
//! Stopped ──start()──▶ Starting ──primary ok──▶ PrimaryActive ◀─┐
//!    ▲                    │                        │ outage ≥ delay
//!    │                    └──primary failed──▶ FallbackActive ──┘ restored
//!    └──────────── stop() from any phase
//! ```

use crate::config::{ManagerConfig, ProviderConfig};
use crate::error::{Result, SyncError};
use crate::gate::EmitGate;
use crate::provider::{DefaultProviderFactory, ProviderEvent, ProviderFactory, TimecodeProvider};
use crate::snapshot::{TimecodeSnapshot, TimecodeSource};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Capacity of the manager event channel.
pub const MANAGER_EVENT_CAPACITY: usize = 1024;

/// Reason attached to operator-initiated failover.
pub const MANUAL_OVERRIDE_REASON: &str = "manual override";

/// Lifecycle phase of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerPhase {
    /// Not running.
    Stopped,
    /// `start()` in progress.
    Starting,
    /// Forwarding the primary source.
    PrimaryActive,
    /// Forwarding the fallback source.
    FallbackActive,
}

impl fmt::Display for ManagerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::PrimaryActive => write!(f, "primary_active"),
            Self::FallbackActive => write!(f, "fallback_active"),
        }
    }
}

/// Which of the two sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    /// Preferred source.
    Primary,
    /// Backup source.
    Fallback,
}

impl fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Notification published by the manager.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// Newest snapshot of the active source (rate limited).
    Update(TimecodeSnapshot),
    /// The manager started with a source connected.
    Connected,
    /// The manager stopped.
    Disconnected,
    /// The active source changed away from the primary.
    Failover {
        /// Previous active source.
        from: ProviderRole,
        /// New active source.
        to: ProviderRole,
        /// What caused the failover.
        reason: String,
    },
    /// The primary is active again.
    Restored {
        /// The restored source.
        provider: ProviderRole,
    },
    /// A supervisory action failed.
    Error {
        /// Error description.
        message: String,
    },
}

fn initial_snapshot(config: &ManagerConfig) -> TimecodeSnapshot {
    let source = match &config.primary {
        ProviderConfig::Device(_) => TimecodeSource::DeviceUnknown,
        ProviderConfig::Clock(_) => TimecodeSource::SystemClock,
    };
    TimecodeSnapshot::disconnected(
        source,
        config.primary.frame_rate(),
        config.primary.drop_frame(),
    )
}

struct ManagerState {
    phase: ManagerPhase,
    generation: u64,
    primary: Option<Arc<dyn TimecodeProvider>>,
    fallback: Option<Arc<dyn TimecodeProvider>>,
    active: Option<ProviderRole>,
    snapshot: TimecodeSnapshot,
    gate: EmitGate,
    outage_started: Option<Instant>,
    outage_reason: Option<String>,
    listeners: Vec<JoinHandle<()>>,
    failover_check: Option<JoinHandle<()>>,
    restoration: Option<JoinHandle<()>>,
}

impl ManagerState {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.phase != ManagerPhase::Stopped
    }

    fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        let mut tasks: Vec<_> = self.listeners.drain(..).collect();
        tasks.extend(self.failover_check.take());
        tasks.extend(self.restoration.take());
        tasks
    }

    fn provider(&self, role: ProviderRole) -> Option<Arc<dyn TimecodeProvider>> {
        match role {
            ProviderRole::Primary => self.primary.clone(),
            ProviderRole::Fallback => self.fallback.clone(),
        }
    }
}

struct ManagerInner {
    config: ManagerConfig,
    factory: Arc<dyn ProviderFactory>,
    events: broadcast::Sender<ManagerEvent>,
    state: Mutex<ManagerState>,
}

impl ManagerInner {
    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    /// Store a snapshot as current and forward it if the gate allows.
    fn offer(&self, state: &mut ManagerState, snapshot: TimecodeSnapshot) {
        state.snapshot = snapshot.clone();
        if state.gate.admit(Instant::now()) {
            self.emit(ManagerEvent::Update(snapshot));
        }
    }

    fn clear_outage(&self, state: &mut ManagerState) {
        if let Some(started) = state.outage_started.take() {
            state.outage_reason = None;
            info!(
                outage_ms = started.elapsed().as_millis() as u64,
                "Primary recovered before failover"
            );
        }
    }

    fn handle(self: &Arc<Self>, role: ProviderRole, event: ProviderEvent, generation: u64) {
        let mut state = self.state.lock();
        if !state.is_current(generation) {
            return;
        }

        match event {
            ProviderEvent::Update(snapshot) => {
                if role == ProviderRole::Primary
                    && state.phase == ManagerPhase::PrimaryActive
                    && snapshot.is_usable()
                {
                    self.clear_outage(&mut state);
                }
                if state.active == Some(role) {
                    self.offer(&mut state, snapshot);
                }
            }
            ProviderEvent::Connected => {
                if role == ProviderRole::Primary && state.phase == ManagerPhase::PrimaryActive {
                    self.clear_outage(&mut state);
                }
            }
            ProviderEvent::Disconnected { reason } | ProviderEvent::Error { message: reason } => {
                if state.active != Some(role) {
                    debug!(%role, reason = %reason, "Inactive source reported a fault");
                    return;
                }
                match role {
                    ProviderRole::Primary if state.phase == ManagerPhase::PrimaryActive => {
                        if state.outage_started.is_none() {
                            warn!(
                                reason = %reason,
                                fallback_delay_ms = self.config.fallback_delay.as_millis() as u64,
                                "Primary source outage"
                            );
                            state.outage_started = Some(Instant::now());
                            state.outage_reason = Some(reason);
                        }
                        let armed = state
                            .failover_check
                            .as_ref()
                            .is_some_and(|task| !task.is_finished());
                        if !armed {
                            state.failover_check =
                                Some(tokio::spawn(failover_check(Arc::clone(self), generation)));
                        }
                    }
                    ProviderRole::Fallback => {
                        error!(reason = %reason, "Fallback source lost while active");
                        self.emit(ManagerEvent::Error {
                            message: format!("fallback source lost: {}", reason),
                        });
                    }
                    ProviderRole::Primary => {}
                }
            }
            ProviderEvent::Drift { drift_ms } => {
                debug!(%role, drift_ms, "Source reported clock drift");
            }
        }
    }

    /// Switch to the fallback, connecting it first if needed.
    async fn fail_over(self: &Arc<Self>, reason: String, generation: u64) -> Result<()> {
        let fallback = {
            let state = self.state.lock();
            if !state.is_current(generation) {
                return Err(SyncError::NotRunning);
            }
            state.fallback.clone().ok_or(SyncError::NotRunning)?
        };

        if !fallback.is_connected() {
            if let Err(e) = fallback.connect().await {
                error!(error = %e, "Fallback source unavailable");
                self.emit(ManagerEvent::Error {
                    message: format!("fallback connect failed: {}", e),
                });
                return Err(e);
            }
        }

        let mut state = self.state.lock();
        if !state.is_current(generation) {
            return Err(SyncError::NotRunning);
        }
        if state.phase != ManagerPhase::PrimaryActive {
            return Ok(());
        }

        state.phase = ManagerPhase::FallbackActive;
        state.active = Some(ProviderRole::Fallback);
        state.failover_check.take();
        state.restoration = Some(tokio::spawn(restoration(Arc::clone(self), generation)));

        warn!(
            reason = %reason,
            fallback = %fallback.describe(),
            "Failed over to fallback source"
        );
        self.emit(ManagerEvent::Failover {
            from: ProviderRole::Primary,
            to: ProviderRole::Fallback,
            reason,
        });
        state.gate.reset();
        self.offer(&mut state, fallback.snapshot());
        Ok(())
    }

    /// Switch back to the primary. Returns whether the switch happened.
    fn restore(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if !state.is_current(generation) || state.phase != ManagerPhase::FallbackActive {
            return false;
        }
        let Some(primary) = state.primary.clone() else {
            return false;
        };

        let outage = state.outage_started.take().map(|started| started.elapsed());
        state.outage_reason = None;
        state.phase = ManagerPhase::PrimaryActive;
        state.active = Some(ProviderRole::Primary);
        state.restoration.take();

        info!(
            primary = %primary.describe(),
            outage_ms = outage.map(|d| d.as_millis() as u64),
            "Primary source restored"
        );
        self.emit(ManagerEvent::Restored {
            provider: ProviderRole::Primary,
        });
        state.gate.reset();
        self.offer(&mut state, primary.snapshot());
        true
    }
}

async fn listen(
    inner: Arc<ManagerInner>,
    role: ProviderRole,
    mut events: broadcast::Receiver<ProviderEvent>,
    generation: u64,
) {
    loop {
        match events.recv().await {
            Ok(event) => inner.handle(role, event, generation),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%role, skipped, "Manager fell behind source events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn failover_check(inner: Arc<ManagerInner>, generation: u64) {
    let period = inner.config.failover_check_interval();
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;
        let reason = {
            let state = inner.state.lock();
            if !state.is_current(generation) || state.phase != ManagerPhase::PrimaryActive {
                return;
            }
            match state.outage_started {
                None => return,
                Some(started) if started.elapsed() >= inner.config.fallback_delay => state
                    .outage_reason
                    .clone()
                    .unwrap_or_else(|| "primary unavailable".into()),
                Some(_) => continue,
            }
        };

        match inner.fail_over(reason, generation).await {
            Ok(()) => return,
            Err(SyncError::NotRunning) => return,
            Err(e) => debug!(error = %e, "Failover attempt failed, retrying"),
        }
    }
}

async fn restoration(inner: Arc<ManagerInner>, generation: u64) {
    let period = inner.config.restore_interval;
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;
        let primary = {
            let state = inner.state.lock();
            if !state.is_current(generation) || state.phase != ManagerPhase::FallbackActive {
                return;
            }
            match state.primary.clone() {
                Some(primary) => primary,
                None => return,
            }
        };

        let ready = primary.is_connected()
            || match primary.connect().await {
                Ok(()) => true,
                Err(e) => {
                    info!(error = %e, "Primary source still unavailable");
                    false
                }
            };

        if ready && inner.restore(generation) {
            return;
        }
    }
}

/// Supervises a primary and a fallback timecode source.
pub struct TimecodeManager {
    inner: Arc<ManagerInner>,
}

impl TimecodeManager {
    /// Create a manager using the default source factory.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(DefaultProviderFactory))
    }

    /// Create a manager with a custom source factory.
    pub fn with_factory(config: ManagerConfig, factory: Arc<dyn ProviderFactory>) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(MANAGER_EVENT_CAPACITY);
        let gate = EmitGate::new(config.emit_interval());
        let snapshot = initial_snapshot(&config);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                factory,
                events,
                state: Mutex::new(ManagerState {
                    phase: ManagerPhase::Stopped,
                    generation: 0,
                    primary: None,
                    fallback: None,
                    active: None,
                    snapshot,
                    gate,
                    outage_started: None,
                    outage_reason: None,
                    listeners: Vec::new(),
                    failover_check: None,
                    restoration: None,
                }),
            }),
        })
    }

    /// Start both sources' supervision.
    ///
    /// Connects the primary; if that fails, fails over to the fallback
    /// immediately. Fails only when neither source can be connected. Calling
    /// `start` while running does nothing.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let generation = {
            let mut state = inner.state.lock();
            if state.phase != ManagerPhase::Stopped {
                debug!(phase = %state.phase, "Timecode manager already running");
                return Ok(());
            }
            state.phase = ManagerPhase::Starting;
            state.generation += 1;
            state.generation
        };

        let created = inner
            .factory
            .create(&inner.config.primary)
            .and_then(|primary| Ok((primary, inner.factory.create(&inner.config.fallback)?)));
        let (primary, fallback) = match created {
            Ok(pair) => pair,
            Err(e) => {
                let mut state = inner.state.lock();
                if state.generation == generation {
                    state.phase = ManagerPhase::Stopped;
                }
                return Err(e);
            }
        };

        {
            let mut state = inner.state.lock();
            if !state.is_current(generation) {
                return Err(SyncError::NotRunning);
            }
            for (role, provider) in [
                (ProviderRole::Primary, &primary),
                (ProviderRole::Fallback, &fallback),
            ] {
                let events = provider.subscribe();
                state
                    .listeners
                    .push(tokio::spawn(listen(Arc::clone(inner), role, events, generation)));
            }
            state.primary = Some(Arc::clone(&primary));
            state.fallback = Some(Arc::clone(&fallback));
        }

        info!(
            primary = %primary.describe(),
            fallback = %fallback.describe(),
            "Starting timecode manager"
        );

        let primary_error = match primary.connect().await {
            Ok(()) => {
                let activated = {
                    let mut state = inner.state.lock();
                    if state.is_current(generation) {
                        state.phase = ManagerPhase::PrimaryActive;
                        state.active = Some(ProviderRole::Primary);
                        inner.offer(&mut state, primary.snapshot());
                        info!(source = %primary.describe(), "Primary source active");
                        inner.emit(ManagerEvent::Connected);
                        true
                    } else {
                        false
                    }
                };
                if !activated {
                    primary.disconnect().await;
                    return Err(SyncError::NotRunning);
                }
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(error = %primary_error, "Primary source unavailable at start, using fallback");

        if let Err(fallback_error) = fallback.connect().await {
            error!(
                primary = %primary_error,
                fallback = %fallback_error,
                "No timecode source available"
            );
            let tasks = {
                let mut state = inner.state.lock();
                if state.generation == generation {
                    state.phase = ManagerPhase::Stopped;
                    state.active = None;
                    state.primary = None;
                    state.fallback = None;
                    state.take_tasks()
                } else {
                    Vec::new()
                }
            };
            for task in tasks {
                task.abort();
            }
            return Err(SyncError::NoSourceAvailable {
                primary: primary_error.to_string(),
                fallback: fallback_error.to_string(),
            });
        }

        let activated = {
            let mut state = inner.state.lock();
            if state.is_current(generation) {
                let reason = primary_error.to_string();
                state.phase = ManagerPhase::FallbackActive;
                state.active = Some(ProviderRole::Fallback);
                state.outage_started = Some(Instant::now());
                state.outage_reason = Some(reason.clone());
                state.restoration =
                    Some(tokio::spawn(restoration(Arc::clone(inner), generation)));
                inner.offer(&mut state, fallback.snapshot());
                info!(source = %fallback.describe(), "Fallback source active");
                inner.emit(ManagerEvent::Connected);
                inner.emit(ManagerEvent::Failover {
                    from: ProviderRole::Primary,
                    to: ProviderRole::Fallback,
                    reason,
                });
                true
            } else {
                false
            }
        };
        if !activated {
            fallback.disconnect().await;
            return Err(SyncError::NotRunning);
        }
        Ok(())
    }

    /// Stop supervision and disconnect both sources.
    pub async fn stop(&self) {
        let (primary, fallback, tasks) = {
            let mut state = self.inner.state.lock();
            if state.phase == ManagerPhase::Stopped && state.primary.is_none() {
                return;
            }
            state.generation += 1;
            state.phase = ManagerPhase::Stopped;
            state.active = None;
            state.outage_started = None;
            state.outage_reason = None;
            state.snapshot = initial_snapshot(&self.inner.config);
            state.gate.reset();
            (state.primary.take(), state.fallback.take(), state.take_tasks())
        };

        for task in tasks {
            task.abort();
        }

        let disconnect = |provider: Option<Arc<dyn TimecodeProvider>>| async move {
            if let Some(provider) = provider {
                provider.disconnect().await;
            }
        };
        tokio::join!(disconnect(primary), disconnect(fallback));

        info!("Timecode manager stopped");
        self.inner.emit(ManagerEvent::Disconnected);
    }

    /// Fail over to the fallback now, regardless of timers.
    pub async fn switch_to_fallback(&self) -> Result<()> {
        let generation = {
            let mut state = self.inner.state.lock();
            match state.phase {
                ManagerPhase::Stopped | ManagerPhase::Starting => return Err(SyncError::NotRunning),
                ManagerPhase::FallbackActive => return Ok(()),
                ManagerPhase::PrimaryActive => {}
            }
            if let Some(check) = state.failover_check.take() {
                check.abort();
            }
            if state.outage_started.is_none() {
                state.outage_started = Some(Instant::now());
                state.outage_reason = Some(MANUAL_OVERRIDE_REASON.into());
            }
            state.generation
        };
        info!("Manual failover requested");
        self.inner
            .fail_over(MANUAL_OVERRIDE_REASON.into(), generation)
            .await
    }

    /// Force a fresh reading from the active source.
    pub async fn read_timecode(&self) -> Result<TimecodeSnapshot> {
        let provider = {
            let state = self.inner.state.lock();
            state
                .active
                .and_then(|role| state.provider(role))
                .ok_or(SyncError::NotRunning)?
        };
        Ok(provider.read_timecode().await)
    }

    /// Newest snapshot of the active source.
    pub fn snapshot(&self) -> TimecodeSnapshot {
        self.inner.state.lock().snapshot.clone()
    }

    /// Subscribe to manager events.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> ManagerPhase {
        self.inner.state.lock().phase
    }

    /// Which source is being forwarded.
    pub fn active_role(&self) -> Option<ProviderRole> {
        self.inner.state.lock().active
    }

    /// How long the primary has been out, if it is.
    pub fn outage_duration(&self) -> Option<Duration> {
        self.inner
            .state
            .lock()
            .outage_started
            .map(|started| started.elapsed())
    }

    /// Whether the manager is running.
    pub fn is_running(&self) -> bool {
        self.phase() != ManagerPhase::Stopped
    }

    /// The manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }
}

impl Drop for TimecodeManager {
    fn drop(&mut self) {
        for task in self.inner.state.lock().take_tasks() {
            task.abort();
        }
    }
}
