//! Integration tests for the device source over a real TCP recorder session
//!
//! A small in-process recorder speaks enough of the HyperDeck protocol to
//! exercise handshake, queries, notifications and reconnects.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use tcsync::{
    DeviceConfig, DeviceProvider, HyperDeckConnector, ProviderEvent, ReconnectPolicy,
    SignalStatus, SyncError, TimecodeProvider, TimecodeSource, TransportState,
};

/// Test helper to find an available port
async fn get_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// =============================================================================
// Mock recorder
// =============================================================================

#[derive(Debug, Clone)]
struct DeckState {
    display_timecode: String,
    input_video_format: String,
    notifications: bool,
    reject: bool,
    silent: bool,
    sessions: u32,
    commands: Vec<String>,
}

impl Default for DeckState {
    fn default() -> Self {
        Self {
            display_timecode: "01:00:00:00".into(),
            input_video_format: "1080p25".into(),
            notifications: true,
            reject: false,
            silent: false,
            sessions: 0,
            commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Hangup,
}

struct MockDeck {
    port: u16,
    state: Arc<Mutex<DeckState>>,
    control: broadcast::Sender<Control>,
}

impl MockDeck {
    async fn start(state: DeckState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(state));
        let (control, _) = broadcast::channel(16);

        let accept_state = state.clone();
        let accept_control = control.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    accept_state.clone(),
                    accept_control.subscribe(),
                ));
            }
        });

        Self {
            port,
            state,
            control,
        }
    }

    fn config(&self) -> DeviceConfig {
        DeviceConfig::new("127.0.0.1")
            .with_port(self.port)
            .with_frame_rate(25.0, false)
            .with_poll_rate(20)
            .with_connect_timeout(Duration::from_secs(2))
    }

    fn update(&self, change: impl FnOnce(&mut DeckState)) {
        change(&mut self.state.lock());
    }

    fn snapshot(&self) -> DeckState {
        self.state.lock().clone()
    }

    fn push(&self, timecode: &str) {
        let _ = self.control.send(Control::Push(timecode.to_string()));
    }

    fn hangup(&self) {
        let _ = self.control.send(Control::Hangup);
    }
}

fn respond(command: &str, state: &Mutex<DeckState>) -> String {
    let state = state.lock();
    match command {
        "device info" => "204 device info:\r\n\
            protocol version: 1.11\r\n\
            model: Mock Deck\r\n\
            software version: 8.0\r\n\r\n"
            .to_string(),
        "transport info" => format!(
            "208 transport info:\r\n\
            status: play\r\n\
            speed: 100\r\n\
            slot id: 1\r\n\
            clip id: 2\r\n\
            display timecode: {}\r\n\
            timecode: 00:00:10:00\r\n\
            input video format: {}\r\n\r\n",
            state.display_timecode, state.input_video_format
        ),
        "notify: transport: true" if state.notifications => "200 ok\r\n".to_string(),
        _ => "100 syntax error\r\n".to_string(),
    }
}

async fn serve(
    stream: TcpStream,
    state: Arc<Mutex<DeckState>>,
    mut control: broadcast::Receiver<Control>,
) {
    let (reject, silent) = {
        let mut deck = state.lock();
        deck.sessions += 1;
        (deck.reject, deck.silent)
    };
    let (read_half, mut write_half) = stream.into_split();

    if silent {
        tokio::time::sleep(Duration::from_secs(30)).await;
        return;
    }
    if reject {
        let _ = write_half.write_all(b"120 connection rejected\r\n").await;
        return;
    }

    let greeting = "500 connection info:\r\nprotocol version: 1.11\r\nmodel: Mock Deck\r\n\r\n";
    if write_half.write_all(greeting.as_bytes()).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { return };
                let command = line.trim().to_string();
                state.lock().commands.push(command.clone());
                if command == "quit" {
                    return;
                }
                let reply = respond(&command, &state);
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
            ctl = control.recv() => match ctl {
                Ok(Control::Push(timecode)) => {
                    let notify = format!(
                        "508 transport info:\r\ndisplay timecode: {}\r\n\r\n",
                        timecode
                    );
                    if write_half.write_all(notify.as_bytes()).await.is_err() {
                        return;
                    }
                }
                Ok(Control::Hangup) | Err(_) => return,
            }
        }
    }
}

fn provider(config: DeviceConfig) -> DeviceProvider {
    DeviceProvider::new(config, Arc::new(HyperDeckConnector::default())).unwrap()
}

async fn wait_for<F>(
    events: &mut broadcast::Receiver<ProviderEvent>,
    mut predicate: F,
) -> ProviderEvent
where
    F: FnMut(&ProviderEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event not received")
}

fn update_with(timecode: &'static str) -> impl FnMut(&ProviderEvent) -> bool {
    move |event: &ProviderEvent| match event {
        ProviderEvent::Update(snapshot) => snapshot.timecode.as_deref() == Some(timecode),
        _ => false,
    }
}

// =============================================================================
// Session setup
// =============================================================================

#[tokio::test]
async fn test_connect_reads_device_and_transport() {
    let deck = MockDeck::start(DeckState::default()).await;
    let source = provider(deck.config());

    source.connect().await.unwrap();
    assert!(source.is_connected());

    let snapshot = source.snapshot();
    assert_eq!(snapshot.timecode.as_deref(), Some("01:00:00:00"));
    assert_eq!(snapshot.timeline_timecode.as_deref(), Some("00:00:10:00"));
    assert_eq!(snapshot.source, TimecodeSource::DeviceExternal);
    assert_eq!(snapshot.status, SignalStatus::Ok);
    assert!(!snapshot.drop_frame);

    let device = snapshot.device.unwrap();
    assert_eq!(device.name, "127.0.0.1");
    assert_eq!(device.model.as_deref(), Some("Mock Deck"));
    assert_eq!(device.firmware_version.as_deref(), Some("8.0"));

    let transport = snapshot.transport.unwrap();
    assert_eq!(transport.state, TransportState::Play);
    assert_eq!(transport.speed, 100);
    assert_eq!(transport.slot_id, Some(1));
    assert_eq!(transport.clip_id, Some(2));

    let commands = deck.snapshot().commands;
    assert_eq!(
        &commands[..3],
        &["device info", "transport info", "notify: transport: true"]
    );

    source.disconnect().await;
}

#[tokio::test]
async fn test_internal_timecode_degraded_when_external_required() {
    let deck = MockDeck::start(DeckState {
        input_video_format: "none".into(),
        ..Default::default()
    })
    .await;
    let source = provider(deck.config().with_require_external(true));

    source.connect().await.unwrap();
    let snapshot = source.snapshot();
    assert_eq!(snapshot.source, TimecodeSource::DeviceInternal);
    assert_eq!(snapshot.status, SignalStatus::Degraded);
    assert_eq!(snapshot.timecode.as_deref(), Some("01:00:00:00"));

    source.disconnect().await;
}

#[tokio::test]
async fn test_unparseable_label_reports_no_signal() {
    let deck = MockDeck::start(DeckState {
        display_timecode: "--:--:--:--".into(),
        ..Default::default()
    })
    .await;
    let source = provider(deck.config());

    source.connect().await.unwrap();
    let snapshot = source.snapshot();
    assert_eq!(snapshot.status, SignalStatus::NoSignal);
    assert_eq!(snapshot.timecode, None);

    source.disconnect().await;
}

// =============================================================================
// Updates
// =============================================================================

#[tokio::test]
async fn test_push_notifications_update_snapshot() {
    let deck = MockDeck::start(DeckState::default()).await;
    let source = provider(deck.config());
    source.connect().await.unwrap();
    let mut events = source.subscribe();

    deck.push("01:00:05:12");
    wait_for(&mut events, update_with("01:00:05:12")).await;

    // Fields absent from the notification keep their last value.
    let snapshot = source.snapshot();
    assert_eq!(snapshot.timecode.as_deref(), Some("01:00:05:12"));
    assert_eq!(snapshot.source, TimecodeSource::DeviceExternal);
    assert_eq!(snapshot.transport.unwrap().state, TransportState::Play);

    source.disconnect().await;
}

#[tokio::test]
async fn test_polls_when_notifications_refused() {
    let deck = MockDeck::start(DeckState {
        notifications: false,
        ..Default::default()
    })
    .await;
    let source = provider(deck.config());
    source.connect().await.unwrap();
    let mut events = source.subscribe();

    deck.update(|state| state.display_timecode = "02:30:00:00".into());
    wait_for(&mut events, update_with("02:30:00:00")).await;

    let polls = deck
        .snapshot()
        .commands
        .iter()
        .filter(|c| c.as_str() == "transport info")
        .count();
    assert!(polls >= 2, "only {} transport queries", polls);

    source.disconnect().await;
}

#[tokio::test]
async fn test_read_timecode_queries_recorder() {
    let deck = MockDeck::start(DeckState::default()).await;
    let source = provider(deck.config());
    source.connect().await.unwrap();

    deck.update(|state| state.display_timecode = "03:00:00:00".into());
    let snapshot = source.read_timecode().await;
    assert_eq!(snapshot.timecode.as_deref(), Some("03:00:00:00"));
    assert_eq!(source.snapshot().timecode.as_deref(), Some("03:00:00:00"));

    source.disconnect().await;
}

// =============================================================================
// Failures and reconnects
// =============================================================================

#[tokio::test]
async fn test_reconnects_after_recorder_hangs_up() {
    let deck = MockDeck::start(DeckState::default()).await;
    let policy = ReconnectPolicy {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
        max_attempts: 0,
    };
    let source = provider(deck.config().with_reconnect(policy));
    source.connect().await.unwrap();
    let mut events = source.subscribe();

    deck.hangup();
    wait_for(&mut events, |e| matches!(e, ProviderEvent::Disconnected { .. })).await;
    assert!(!source.is_connected());
    assert_eq!(source.snapshot().status, SignalStatus::Disconnected);

    wait_for(&mut events, |e| matches!(e, ProviderEvent::Connected)).await;
    assert!(source.is_connected());
    assert_eq!(source.snapshot().status, SignalStatus::Ok);
    assert_eq!(deck.snapshot().sessions, 2);

    source.disconnect().await;
}

#[tokio::test]
async fn test_rejected_connection() {
    let deck = MockDeck::start(DeckState {
        reject: true,
        ..Default::default()
    })
    .await;
    let source = provider(deck.config());

    let result = source.connect().await;
    assert!(matches!(result, Err(SyncError::Connection(_))), "{:?}", result);
    assert!(!source.is_connected());
    assert!(!source.is_reconnecting());

    let snapshot = source.snapshot();
    assert_eq!(snapshot.status, SignalStatus::Error);
    assert!(snapshot.error.unwrap().contains("rejected"));
}

#[tokio::test]
async fn test_connect_times_out_on_silent_recorder() {
    let deck = MockDeck::start(DeckState {
        silent: true,
        ..Default::default()
    })
    .await;
    let source = provider(deck.config().with_connect_timeout(Duration::from_millis(200)));

    let result = timeout(Duration::from_secs(5), source.connect())
        .await
        .expect("connect should give up on its own");
    assert!(matches!(result, Err(SyncError::Timeout(_))), "{:?}", result);
    assert!(!source.is_connected());
}

#[tokio::test]
async fn test_connect_refused_when_nothing_listens() {
    let port = get_available_port().await;
    let source = provider(
        DeviceConfig::new("127.0.0.1")
            .with_port(port)
            .with_frame_rate(25.0, false),
    );

    assert!(source.connect().await.is_err());
    let snapshot = source.read_timecode().await;
    assert_eq!(snapshot.status, SignalStatus::Error);
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn test_disconnect_sends_quit() {
    let deck = MockDeck::start(DeckState::default()).await;
    let source = provider(deck.config());
    source.connect().await.unwrap();
    let mut events = source.subscribe();

    source.disconnect().await;
    assert!(!source.is_connected());
    assert_eq!(source.snapshot().status, SignalStatus::Disconnected);
    wait_for(&mut events, |e| matches!(e, ProviderEvent::Disconnected { .. })).await;

    timeout(Duration::from_secs(5), async {
        while !deck.snapshot().commands.iter().any(|c| c == "quit") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recorder never saw quit");
    assert!(!source.is_reconnecting());
}
