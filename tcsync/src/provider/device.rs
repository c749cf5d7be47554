//! Networked recorder source.

use super::{ProviderEvent, ProviderKind, TimecodeProvider, PROVIDER_EVENT_CAPACITY};
use crate::backoff::Backoff;
use crate::config::DeviceConfig;
use crate::error::{Result, SyncError};
use crate::link::{LinkEvent, RecorderConnector, RecorderLink, TransportReport};
use crate::snapshot::{DeviceInfo, SignalStatus, TimecodeSnapshot, TimecodeSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tcsync_timecode::{parse_timecode, validate, FrameRate};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Decides where a recorder's timecode comes from.
pub trait OriginClassifier: Send + Sync {
    /// Classify a transport report.
    fn classify(&self, report: &TransportReport) -> TimecodeSource;
}

/// Classifies by the reported input video format: any format means the
/// recorder is locked to an external input, `none` means it generates
/// timecode itself, and a missing field is unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputFormatClassifier;

impl OriginClassifier for InputFormatClassifier {
    fn classify(&self, report: &TransportReport) -> TimecodeSource {
        match report.input_video_format.as_deref().map(str::trim) {
            None => TimecodeSource::DeviceUnknown,
            Some(format) if format.is_empty() || format.eq_ignore_ascii_case("none") => {
                TimecodeSource::DeviceInternal
            }
            Some(_) => TimecodeSource::DeviceExternal,
        }
    }
}

/// Map a transport report to a snapshot.
///
/// A display timecode that does not parse or validate at the configured rate,
/// or that uses the drop-frame separator at a rate without drop-frame
/// counting, yields `NoSignal` without a timecode. Valid internal timecode is `Degraded`
/// when the configuration requires an external source.
pub fn snapshot_from_report(
    config: &DeviceConfig,
    rate: FrameRate,
    report: &TransportReport,
    origin: TimecodeSource,
    device: Option<DeviceInfo>,
) -> TimecodeSnapshot {
    let timecode = report
        .display_timecode
        .as_deref()
        .and_then(|label| parse_timecode(label, rate).ok())
        .filter(|tc| validate(tc, rate).is_empty())
        .filter(|tc| !tc.drop_frame || rate.supports_drop_frame());

    let snapshot = match timecode {
        Some(tc) => {
            let status = if config.require_external && origin == TimecodeSource::DeviceInternal {
                SignalStatus::Degraded
            } else {
                SignalStatus::Ok
            };
            TimecodeSnapshot::live(origin, status, tc.to_string(), config.frame_rate, tc.drop_frame)
        }
        None => TimecodeSnapshot::without_timecode(
            origin,
            SignalStatus::NoSignal,
            config.frame_rate,
            config.drop_frame,
        ),
    };

    snapshot
        .with_timeline(report.timeline_timecode.clone())
        .with_transport(Some(report.transport_info()))
        .with_device(device)
}

struct Session {
    link: Arc<dyn RecorderLink>,
    events: mpsc::Receiver<LinkEvent>,
    device: DeviceInfo,
    report: TransportReport,
    push: bool,
}

struct DeviceState {
    connected: bool,
    generation: u64,
    link: Option<Arc<dyn RecorderLink>>,
    device: Option<DeviceInfo>,
    origin: TimecodeSource,
    snapshot: TimecodeSnapshot,
    session: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl DeviceState {
    fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        [self.session.take(), self.poller.take(), self.reconnect.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

struct DeviceInner {
    config: DeviceConfig,
    rate: FrameRate,
    connector: Arc<dyn RecorderConnector>,
    classifier: Arc<dyn OriginClassifier>,
    events: broadcast::Sender<ProviderEvent>,
    state: Mutex<DeviceState>,
}

impl DeviceInner {
    fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    fn label(&self) -> String {
        self.config.address()
    }

    fn disconnected_snapshot(&self, origin: TimecodeSource) -> TimecodeSnapshot {
        TimecodeSnapshot::disconnected(origin, self.config.frame_rate, self.config.drop_frame)
    }

    async fn open_session(&self) -> Result<Session> {
        let connection = self
            .connector
            .open(&self.config.host, self.config.port, self.config.connect_timeout)
            .await?;
        let link = connection.link;

        let device = match link.device_info().await {
            Ok(device) => device,
            Err(SyncError::Protocol(message)) => {
                warn!(recorder = %self.label(), error = %message, "Device info unavailable");
                DeviceInfo {
                    name: self.config.host.clone(),
                    ..Default::default()
                }
            }
            Err(e) => return Err(e),
        };

        let report = link.transport_info().await?;

        let push = if self.config.use_notifications {
            match link.subscribe_transport().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        recorder = %self.label(),
                        error = %e,
                        "Notifications unavailable, polling instead"
                    );
                    false
                }
            }
        } else {
            false
        };

        Ok(Session {
            link,
            events: connection.events,
            device,
            report,
            push,
        })
    }

    /// Open a session and make it current, unless a newer connect or a
    /// disconnect happened in the meantime.
    async fn establish(self: &Arc<Self>) -> Result<()> {
        let expected = self.state.lock().generation;
        let session = tokio::time::timeout(self.config.connect_timeout, self.open_session())
            .await
            .map_err(|_| SyncError::Timeout(format!("connecting to {}", self.label())))??;

        let (snapshot, push) = {
            let mut state = self.state.lock();
            if state.generation != expected || state.connected {
                drop(state);
                let link = session.link;
                tokio::spawn(async move { link.close().await });
                return Err(SyncError::Connection("connection attempt superseded".into()));
            }

            state.generation += 1;
            let generation = state.generation;
            let origin = self.classifier.classify(&session.report);
            let snapshot = snapshot_from_report(
                &self.config,
                self.rate,
                &session.report,
                origin,
                Some(session.device.clone()),
            );

            state.connected = true;
            state.origin = origin;
            state.device = Some(session.device);
            state.link = Some(Arc::clone(&session.link));
            state.snapshot = snapshot.clone();
            state.session = Some(tokio::spawn(run_session(
                Arc::clone(self),
                session.events,
                generation,
            )));
            if !session.push {
                state.poller = Some(tokio::spawn(run_poller(
                    Arc::clone(self),
                    session.link,
                    generation,
                )));
            }
            (snapshot, session.push)
        };

        info!(
            recorder = %self.label(),
            source = %snapshot.source,
            status = %snapshot.status,
            mode = if push { "notify" } else { "poll" },
            "Recorder connected"
        );
        self.emit(ProviderEvent::Update(snapshot));
        self.emit(ProviderEvent::Connected);
        Ok(())
    }

    /// Store and publish a report from the current session.
    fn publish_report(
        &self,
        report: &TransportReport,
        generation: u64,
    ) -> Option<TimecodeSnapshot> {
        let snapshot = {
            let mut state = self.state.lock();
            if state.generation != generation || !state.connected {
                return None;
            }
            let origin = self.classifier.classify(report);
            state.origin = origin;
            let snapshot =
                snapshot_from_report(&self.config, self.rate, report, origin, state.device.clone());
            state.snapshot = snapshot.clone();
            snapshot
        };
        debug!(
            recorder = %self.label(),
            timecode = ?snapshot.timecode,
            status = %snapshot.status,
            "Transport update"
        );
        self.emit(ProviderEvent::Update(snapshot.clone()));
        Some(snapshot)
    }

    /// Store and publish a failed request on the current session.
    fn publish_failure(&self, err: &SyncError, generation: u64) -> Option<TimecodeSnapshot> {
        let snapshot = {
            let mut state = self.state.lock();
            if state.generation != generation || !state.connected {
                return None;
            }
            let snapshot = TimecodeSnapshot::failed(
                state.origin,
                self.config.frame_rate,
                self.config.drop_frame,
                err.to_string(),
            )
            .with_device(state.device.clone());
            state.snapshot = snapshot.clone();
            snapshot
        };
        debug!(recorder = %self.label(), error = %err, "Transport query failed");
        self.emit(ProviderEvent::Update(snapshot.clone()));
        Some(snapshot)
    }

    async fn on_link_lost(self: &Arc<Self>, reason: String, generation: u64) {
        let (link, snapshot) = {
            let mut state = self.state.lock();
            if state.generation != generation || !state.connected {
                return;
            }
            state.connected = false;
            state.generation += 1;
            if let Some(poller) = state.poller.take() {
                poller.abort();
            }
            state.session.take();
            let snapshot = self.disconnected_snapshot(state.origin).with_error(reason.clone());
            state.snapshot = snapshot.clone();
            state.reconnect = Some(tokio::spawn(reconnect_loop(Arc::clone(self))));
            (state.link.take(), snapshot)
        };

        warn!(recorder = %self.label(), reason = %reason, "Recorder connection lost");
        self.emit(ProviderEvent::Update(snapshot));
        self.emit(ProviderEvent::Disconnected { reason });

        if let Some(link) = link {
            link.close().await;
        }
    }
}

async fn run_session(
    inner: Arc<DeviceInner>,
    mut events: mpsc::Receiver<LinkEvent>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Transport(report) => {
                inner.publish_report(&report, generation);
            }
            LinkEvent::Closed { reason } => {
                inner.on_link_lost(reason, generation).await;
                return;
            }
        }
    }
    inner
        .on_link_lost("recorder link dropped".into(), generation)
        .await;
}

async fn run_poller(inner: Arc<DeviceInner>, link: Arc<dyn RecorderLink>, generation: u64) {
    let mut ticks = interval(inner.config.poll_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticks.tick().await;

    loop {
        ticks.tick().await;
        let published = match link.transport_info().await {
            Ok(report) => inner.publish_report(&report, generation),
            Err(e) => inner.publish_failure(&e, generation),
        };
        if published.is_none() {
            break;
        }
    }
}

// Boxed so the reconnect -> establish -> session -> reconnect chain has a nameable type.
fn reconnect_loop(inner: Arc<DeviceInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let mut backoff = Backoff::new(inner.config.reconnect.clone());
        loop {
            let Some(delay) = backoff.next_delay() else {
                let message = format!(
                    "giving up on {} after {} reconnect attempts",
                    inner.label(),
                    backoff.attempts()
                );
                error!(
                    recorder = %inner.label(),
                    attempts = backoff.attempts(),
                    "Reconnect attempts exhausted"
                );
                inner.emit(ProviderEvent::Error { message });
                return;
            };

            debug!(
                recorder = %inner.label(),
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            tokio::time::sleep(delay).await;

            match inner.establish().await {
                Ok(()) => {
                    info!(
                        recorder = %inner.label(),
                        attempts = backoff.attempts(),
                        "Recorder reconnected"
                    );
                    return;
                }
                Err(e) if !e.is_transient() => {
                    error!(recorder = %inner.label(), error = %e, "Reconnect failed permanently");
                    inner.emit(ProviderEvent::Error {
                        message: format!("cannot reconnect to {}: {}", inner.label(), e),
                    });
                    return;
                }
                Err(e) => warn!(recorder = %inner.label(), error = %e, "Reconnect failed"),
            }
        }
    })
}

/// Timecode from a networked recorder.
///
/// Connects through a [`RecorderConnector`], subscribes to transport
/// notifications when possible and polls otherwise. After losing an
/// established link it reconnects on its own following the configured
/// [`ReconnectPolicy`](crate::config::ReconnectPolicy). A failed explicit
/// [`connect`](TimecodeProvider::connect) is returned to the caller and not
/// retried.
pub struct DeviceProvider {
    inner: Arc<DeviceInner>,
}

impl DeviceProvider {
    /// Create a device source that classifies origin by input video format.
    pub fn new(config: DeviceConfig, connector: Arc<dyn RecorderConnector>) -> Result<Self> {
        Self::with_classifier(config, connector, Arc::new(InputFormatClassifier))
    }

    /// Create a device source with a custom origin classifier.
    pub fn with_classifier(
        config: DeviceConfig,
        connector: Arc<dyn RecorderConnector>,
        classifier: Arc<dyn OriginClassifier>,
    ) -> Result<Self> {
        config.validate()?;
        let rate = config.rate()?;
        let (events, _) = broadcast::channel(PROVIDER_EVENT_CAPACITY);
        let snapshot = TimecodeSnapshot::disconnected(
            TimecodeSource::DeviceUnknown,
            config.frame_rate,
            config.drop_frame,
        );

        Ok(Self {
            inner: Arc::new(DeviceInner {
                config,
                rate,
                connector,
                classifier,
                events,
                state: Mutex::new(DeviceState {
                    connected: false,
                    generation: 0,
                    link: None,
                    device: None,
                    origin: TimecodeSource::DeviceUnknown,
                    snapshot,
                    session: None,
                    poller: None,
                    reconnect: None,
                }),
            }),
        })
    }

    /// The source configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Whether a reconnect schedule is running.
    pub fn is_reconnecting(&self) -> bool {
        self.inner
            .state
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

#[async_trait]
impl TimecodeProvider for DeviceProvider {
    async fn connect(&self) -> Result<()> {
        let connecting = {
            let mut state = self.inner.state.lock();
            if state.connected {
                return Ok(());
            }
            if let Some(pending) = state.reconnect.take() {
                pending.abort();
                debug!(
                    recorder = %self.inner.label(),
                    "Pending reconnect replaced by explicit connect"
                );
            }
            let snapshot = TimecodeSnapshot::connecting(
                state.origin,
                self.inner.config.frame_rate,
                self.inner.config.drop_frame,
            );
            state.snapshot = snapshot.clone();
            snapshot
        };
        self.inner.emit(ProviderEvent::Update(connecting));

        match self.inner.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let failed = {
                    let mut state = self.inner.state.lock();
                    if state.connected {
                        return Ok(());
                    }
                    let snapshot = TimecodeSnapshot::failed(
                        state.origin,
                        self.inner.config.frame_rate,
                        self.inner.config.drop_frame,
                        e.to_string(),
                    );
                    state.snapshot = snapshot.clone();
                    snapshot
                };
                warn!(recorder = %self.inner.label(), error = %e, "Recorder connect failed");
                self.inner.emit(ProviderEvent::Update(failed));
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let (was_connected, link, tasks) = {
            let mut state = self.inner.state.lock();
            let was_connected = state.connected;
            state.connected = false;
            state.generation += 1;
            state.snapshot = self.inner.disconnected_snapshot(state.origin);
            (was_connected, state.link.take(), state.take_tasks())
        };

        for task in tasks {
            task.abort();
        }
        if let Some(link) = link {
            link.close().await;
        }

        if was_connected {
            info!(recorder = %self.inner.label(), "Recorder disconnected");
            self.inner.emit(ProviderEvent::Disconnected {
                reason: "disconnected".into(),
            });
        }
    }

    fn snapshot(&self) -> TimecodeSnapshot {
        self.inner.state.lock().snapshot.clone()
    }

    async fn read_timecode(&self) -> TimecodeSnapshot {
        let (link, generation) = {
            let state = self.inner.state.lock();
            match (&state.link, state.connected) {
                (Some(link), true) => (Arc::clone(link), state.generation),
                _ => return state.snapshot.clone(),
            }
        };

        let published = match link.transport_info().await {
            Ok(report) => self.inner.publish_report(&report, generation),
            Err(e) => self.inner.publish_failure(&e, generation),
        };
        published.unwrap_or_else(|| self.snapshot())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Device
    }

    fn describe(&self) -> String {
        format!("device {}", self.inner.label())
    }
}

impl Drop for DeviceProvider {
    fn drop(&mut self) {
        for task in self.inner.state.lock().take_tasks() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::link::RecorderConnection;
    use crate::snapshot::TransportState;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedLink {
        report: Mutex<TransportReport>,
        notifications: bool,
        closed: AtomicBool,
    }

    #[async_trait]
    impl RecorderLink for ScriptedLink {
        async fn device_info(&self) -> Result<DeviceInfo> {
            Ok(DeviceInfo {
                name: "deck".into(),
                model: Some("Scripted Deck".into()),
                firmware_version: Some("1.0".into()),
            })
        }

        async fn transport_info(&self) -> Result<TransportReport> {
            Ok(self.report.lock().clone())
        }

        async fn subscribe_transport(&self) -> Result<()> {
            if self.notifications {
                Ok(())
            } else {
                Err(SyncError::Protocol("102 unsupported parameter".into()))
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedConnector {
        link: Arc<ScriptedLink>,
        sender: Mutex<Option<mpsc::Sender<LinkEvent>>>,
        refuse: AtomicBool,
        opens: AtomicU32,
    }

    impl ScriptedConnector {
        fn new(report: TransportReport, notifications: bool) -> Arc<Self> {
            Arc::new(Self {
                link: Arc::new(ScriptedLink {
                    report: Mutex::new(report),
                    notifications,
                    closed: AtomicBool::new(false),
                }),
                sender: Mutex::new(None),
                refuse: AtomicBool::new(false),
                opens: AtomicU32::new(0),
            })
        }

        fn sender(&self) -> mpsc::Sender<LinkEvent> {
            self.sender.lock().clone().expect("not connected")
        }
    }

    #[async_trait]
    impl RecorderConnector for ScriptedConnector {
        async fn open(
            &self,
            _host: &str,
            _port: u16,
            _timeout: Duration,
        ) -> Result<RecorderConnection> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(SyncError::Connection("connection refused".into()));
            }
            let (tx, rx) = mpsc::channel(16);
            *self.sender.lock() = Some(tx);
            Ok(RecorderConnection {
                link: self.link.clone(),
                events: rx,
            })
        }
    }

    fn report(timecode: &str, input: Option<&str>) -> TransportReport {
        TransportReport {
            status: TransportState::Record,
            speed: 100,
            slot_id: Some(1),
            clip_id: Some(3),
            display_timecode: Some(timecode.to_string()),
            timeline_timecode: Some("00:00:01;00".to_string()),
            input_video_format: input.map(str::to_string),
        }
    }

    fn config() -> DeviceConfig {
        DeviceConfig::new("deck.local").with_frame_rate(29.97, true)
    }

    async fn wait_for<F>(
        events: &mut broadcast::Receiver<ProviderEvent>,
        mut predicate: F,
    ) -> ProviderEvent
    where
        F: FnMut(&ProviderEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                let event = events.recv().await.unwrap();
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not received")
    }

    #[test]
    fn test_input_format_classifier() {
        let classifier = InputFormatClassifier;
        assert_eq!(
            classifier.classify(&report("01:00:00;00", Some("1080i5994"))),
            TimecodeSource::DeviceExternal
        );
        assert_eq!(
            classifier.classify(&report("01:00:00;00", Some("none"))),
            TimecodeSource::DeviceInternal
        );
        assert_eq!(
            classifier.classify(&report("01:00:00;00", None)),
            TimecodeSource::DeviceUnknown
        );
    }

    #[test]
    fn test_status_mapping() {
        let rate = FrameRate::Fps29_97;
        let external = config().with_require_external(true);

        let map = |config: &DeviceConfig, label: &str, origin: TimecodeSource| {
            snapshot_from_report(config, rate, &report(label, None), origin, None)
        };

        let ok = map(&external, "01:00:00;00", TimecodeSource::DeviceExternal);
        assert_eq!(ok.status, SignalStatus::Ok);
        assert_eq!(ok.timecode.as_deref(), Some("01:00:00;00"));
        assert_eq!(ok.timeline_timecode.as_deref(), Some("00:00:01;00"));
        assert_eq!(ok.transport.as_ref().map(|t| t.state), Some(TransportState::Record));

        let degraded = map(&external, "01:00:00;00", TimecodeSource::DeviceInternal);
        assert_eq!(degraded.status, SignalStatus::Degraded);
        assert!(degraded.is_usable());

        let relaxed = map(&config(), "01:00:00;00", TimecodeSource::DeviceInternal);
        assert_eq!(relaxed.status, SignalStatus::Ok);

        for bad in ["--:--:--:--", "00:01:00;00", "01:00:00;30", ""] {
            let snapshot = map(&config(), bad, TimecodeSource::DeviceExternal);
            assert_eq!(snapshot.status, SignalStatus::NoSignal, "{}", bad);
            assert_eq!(snapshot.timecode, None);
            assert!(snapshot.is_consistent());
        }

        // A drop-frame label from a deck configured for 25 fps.
        let pal = config().with_frame_rate(25.0, false);
        let semicolon = report("01:00:00;00", None);
        let origin = TimecodeSource::DeviceExternal;
        let snapshot = snapshot_from_report(&pal, FrameRate::Fps25, &semicolon, origin, None);
        assert_eq!(snapshot.status, SignalStatus::NoSignal);
        assert_eq!(snapshot.timecode, None);
        assert!(!snapshot.drop_frame);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_notifications() {
        let connector = ScriptedConnector::new(report("10:00:00;00", Some("1080i5994")), true);
        let device = DeviceProvider::new(config(), connector.clone()).unwrap();
        let mut events = device.subscribe();

        device.connect().await.unwrap();
        assert!(device.is_connected());
        let snapshot = device.snapshot();
        assert_eq!(snapshot.status, SignalStatus::Ok);
        assert_eq!(snapshot.source, TimecodeSource::DeviceExternal);
        assert_eq!(
            snapshot.device.as_ref().and_then(|d| d.model.as_deref()),
            Some("Scripted Deck")
        );
        wait_for(&mut events, |e| matches!(e, ProviderEvent::Connected)).await;

        connector
            .sender()
            .send(LinkEvent::Transport(report("10:00:00;15", Some("1080i5994"))))
            .await
            .unwrap();
        let event = wait_for(&mut events, |e| {
            matches!(e, ProviderEvent::Update(s) if s.timecode.as_deref() == Some("10:00:00;15"))
        })
        .await;
        assert!(matches!(event, ProviderEvent::Update(_)));

        // Idempotent.
        device.connect().await.unwrap();
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);

        device.disconnect().await;
        assert!(!device.is_connected());
        assert!(connector.link.closed.load(Ordering::SeqCst));
        assert_eq!(device.snapshot().status, SignalStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_when_notifications_unsupported() {
        let connector = ScriptedConnector::new(report("10:00:00;00", Some("1080i5994")), false);
        let device = DeviceProvider::new(config().with_poll_rate(10), connector.clone()).unwrap();
        let mut events = device.subscribe();

        device.connect().await.unwrap();
        *connector.link.report.lock() = report("10:00:05;00", Some("1080i5994"));

        wait_for(&mut events, |e| {
            matches!(e, ProviderEvent::Update(s) if s.timecode.as_deref() == Some("10:00:05;00"))
        })
        .await;
        device.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_link_loss() {
        let connector = ScriptedConnector::new(report("10:00:00;00", Some("none")), true);
        let device = DeviceProvider::new(config(), connector.clone()).unwrap();
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        connector
            .sender()
            .send(LinkEvent::Closed { reason: "connection reset".into() })
            .await
            .unwrap();

        let lost = wait_for(&mut events, |e| matches!(e, ProviderEvent::Disconnected { .. })).await;
        assert!(matches!(
            lost,
            ProviderEvent::Disconnected { reason } if reason == "connection reset"
        ));
        assert!(!device.is_connected());
        assert_eq!(device.snapshot().status, SignalStatus::Disconnected);
        assert!(device.is_reconnecting());

        wait_for(&mut events, |e| matches!(e, ProviderEvent::Connected)).await;
        assert!(device.is_connected());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
        assert_eq!(device.snapshot().source, TimecodeSource::DeviceInternal);
        device.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let connector = ScriptedConnector::new(report("10:00:00;00", None), true);
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_attempts: 3,
        };
        let device =
            DeviceProvider::new(config().with_reconnect(policy), connector.clone()).unwrap();
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        connector.refuse.store(true, Ordering::SeqCst);
        connector
            .sender()
            .send(LinkEvent::Closed { reason: "eof".into() })
            .await
            .unwrap();

        let error = wait_for(&mut events, |e| matches!(e, ProviderEvent::Error { .. })).await;
        assert!(matches!(
            error,
            ProviderEvent::Error { message } if message.contains("3 reconnect attempts")
        ));
        assert_eq!(connector.opens.load(Ordering::SeqCst), 4);
        assert!(!device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_reports_error() {
        let connector = ScriptedConnector::new(report("10:00:00;00", None), true);
        connector.refuse.store(true, Ordering::SeqCst);
        let device = DeviceProvider::new(config(), connector.clone()).unwrap();

        let result = device.connect().await;
        assert!(matches!(result, Err(SyncError::Connection(_))));
        let snapshot = device.snapshot();
        assert_eq!(snapshot.status, SignalStatus::Error);
        assert_eq!(snapshot.timecode, None);
        assert!(snapshot.error.is_some());
        assert!(!device.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timecode_when_disconnected() {
        let connector = ScriptedConnector::new(report("10:00:00;00", None), true);
        let device = DeviceProvider::new(config(), connector).unwrap();
        let snapshot = device.read_timecode().await;
        assert_eq!(snapshot.status, SignalStatus::Disconnected);
        assert_eq!(snapshot.timecode, None);
    }

    #[test]
    fn test_rejects_drop_frame_at_25() {
        let connector = ScriptedConnector::new(report("10:00:00:00", None), true);
        let config = DeviceConfig::new("deck").with_frame_rate(25.0, true);
        let result = DeviceProvider::new(config, connector);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
