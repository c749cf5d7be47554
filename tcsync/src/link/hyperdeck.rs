//! HyperDeck Ethernet protocol client.
//!
//! Line-oriented text over TCP (port 9993 by default). Every response starts
//! with `NNN text`; when the text ends in `:` a body of `key: value` lines
//! follows, terminated by a blank line. Codes 1xx are failures, 2xx are
//! successes, and 5xx are asynchronous notifications that may arrive between
//! any two responses. Responses are matched to requests in FIFO order.

use super::{LinkEvent, RecorderConnection, RecorderConnector, RecorderLink, TransportReport};
use crate::error::{Result, SyncError};
use crate::snapshot::{DeviceInfo, TransportState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Greeting sent by the recorder when a session opens.
pub const CODE_CONNECTION_INFO: u16 = 500;
/// Greeting sent when another client already holds the session.
pub const CODE_CONNECTION_REJECTED: u16 = 120;
/// Asynchronous transport change notification.
pub const CODE_TRANSPORT_NOTIFY: u16 = 508;

/// One response or notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Three-digit status code.
    pub code: u16,
    /// Text after the code, without a trailing `:`.
    pub text: String,
    /// Body lines, in order.
    pub fields: Vec<(String, String)>,
}

impl Message {
    /// Whether this is an asynchronous notification.
    pub fn is_async(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Whether this is a failure response.
    pub fn is_failure(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Look up a body field.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse `NNN text[:]` into code, text and whether a body follows.
fn parse_header(line: &str) -> Result<(u16, String, bool)> {
    let line = line.trim();
    let (code, text) = line.split_once(' ').unwrap_or((line, ""));
    let code: u16 = code
        .parse()
        .map_err(|_| SyncError::Protocol(format!("malformed response line: {:?}", line)))?;
    let has_body = text.ends_with(':');
    Ok((code, text.trim_end_matches(':').to_string(), has_body))
}

/// Splits a byte stream into [`Message`]s.
pub struct MessageReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    /// Read the next message; `None` on a clean end of stream.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        let header = loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
                None => return Ok(None),
            }
        };
        let (code, text, has_body) = parse_header(&header)?;

        let mut fields = Vec::new();
        if has_body {
            loop {
                let line = self.lines.next_line().await?.ok_or_else(|| {
                    SyncError::Protocol(format!("stream ended inside {} response", code))
                })?;
                if line.trim().is_empty() {
                    break;
                }
                match line.split_once(':') {
                    Some((key, value)) => {
                        fields.push((key.trim().to_string(), value.trim().to_string()))
                    }
                    None => debug!(code, line = %line, "Ignoring body line without key"),
                }
            }
        }

        Ok(Some(Message { code, text, fields }))
    }
}

fn parse_id(value: &str) -> Option<u32> {
    value.parse().ok()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Merge transport body fields into a report; notifications carry only the
/// fields that changed.
pub fn apply_transport_fields(report: &mut TransportReport, fields: &[(String, String)]) {
    for (key, value) in fields {
        match key.as_str() {
            "status" => report.status = TransportState::from_name(value),
            "speed" => report.speed = value.parse().unwrap_or(0),
            "slot id" => report.slot_id = parse_id(value),
            "clip id" => report.clip_id = parse_id(value),
            "display timecode" => report.display_timecode = non_empty(value),
            "timecode" => report.timeline_timecode = non_empty(value),
            "input video format" => report.input_video_format = non_empty(value),
            _ => {}
        }
    }
}

/// Opens sessions to HyperDeck-compatible recorders.
#[derive(Debug, Clone)]
pub struct HyperDeckConnector {
    request_timeout: Duration,
}

impl HyperDeckConnector {
    /// Connector with a per-request deadline.
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for HyperDeckConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl RecorderConnector for HyperDeckConnector {
    async fn open(&self, host: &str, port: u16, timeout: Duration) -> Result<RecorderConnection> {
        let address = format!("{}:{}", host, port);

        let handshake = async {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            let (read_half, write_half) = stream.into_split();
            let mut reader = MessageReader::new(read_half);
            let greeting = reader.read_message().await?.ok_or_else(|| {
                SyncError::Connection("recorder closed the connection during handshake".into())
            })?;
            let opened: Result<_> = match greeting.code {
                CODE_CONNECTION_INFO => Ok((reader, write_half, greeting)),
                CODE_CONNECTION_REJECTED => Err(SyncError::Connection(
                    "recorder rejected the connection (another client is connected)".into(),
                )),
                code => Err(SyncError::Protocol(format!(
                    "unexpected greeting: {} {}",
                    code, greeting.text
                ))),
            };
            opened
        };

        let (reader, writer, greeting) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| SyncError::Timeout(format!("connecting to {}", address)))??;

        info!(
            address = %address,
            model = greeting.field("model").unwrap_or("unknown"),
            protocol = greeting.field("protocol version").unwrap_or("unknown"),
            "Connected to recorder"
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let transport = Arc::new(Mutex::new(TransportReport::default()));

        let reader_task = tokio::spawn(run_reader(
            reader,
            Arc::clone(&pending),
            Arc::clone(&transport),
            events_tx.clone(),
        ));

        let link = HyperDeckLink {
            name: host.to_string(),
            model: greeting.field("model").map(str::to_string),
            writer: tokio::sync::Mutex::new(writer),
            pending,
            transport,
            events: events_tx,
            reader: Mutex::new(Some(reader_task)),
            request_timeout: self.request_timeout,
        };

        Ok(RecorderConnection {
            link: Arc::new(link),
            events: events_rx,
        })
    }
}

type Waiters = Arc<Mutex<VecDeque<oneshot::Sender<Message>>>>;

async fn run_reader(
    mut reader: MessageReader<OwnedReadHalf>,
    pending: Waiters,
    transport: Arc<Mutex<TransportReport>>,
    events: mpsc::Sender<LinkEvent>,
) {
    let reason = loop {
        match reader.read_message().await {
            Ok(Some(message)) if message.is_async() => {
                if message.code != CODE_TRANSPORT_NOTIFY {
                    debug!(code = message.code, text = %message.text, "Ignoring notification");
                    continue;
                }
                let report = {
                    let mut current = transport.lock();
                    apply_transport_fields(&mut current, &message.fields);
                    current.clone()
                };
                if events.send(LinkEvent::Transport(report)).await.is_err() {
                    break "event receiver dropped".to_string();
                }
            }
            Ok(Some(message)) => {
                let waiter = pending.lock().pop_front();
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(message);
                    }
                    None => debug!(code = message.code, "Response without a pending request"),
                }
            }
            Ok(None) => break "connection closed by recorder".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    debug!(reason = %reason, "Recorder reader stopped");
    pending.lock().clear();
    let _ = events.send(LinkEvent::Closed { reason }).await;
}

/// An open HyperDeck session.
pub struct HyperDeckLink {
    name: String,
    model: Option<String>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Waiters,
    transport: Arc<Mutex<TransportReport>>,
    events: mpsc::Sender<LinkEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl HyperDeckLink {
    async fn request(&self, command: &str) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        {
            let mut writer = self.writer.lock().await;
            self.pending.lock().push_back(tx);
            let line = format!("{}\r\n", command);
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                self.pending.lock().pop_back();
                return Err(e.into());
            }
        }

        let message = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(received) => received?,
            Err(_) => {
                // The FIFO can no longer be trusted once a response goes missing.
                warn!(recorder = %self.name, command, "Recorder did not answer; closing session");
                self.shutdown("request timed out").await;
                return Err(SyncError::Timeout(format!("no response to '{}'", command)));
            }
        };

        if message.is_failure() {
            return Err(SyncError::Protocol(format!(
                "'{}' failed: {} {}",
                command, message.code, message.text
            )));
        }
        Ok(message)
    }

    async fn shutdown(&self, reason: &str) {
        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            handle.abort();
            self.pending.lock().clear();
            let _ = self.events.try_send(LinkEvent::Closed {
                reason: reason.to_string(),
            });
        }
        let _ = self.writer.lock().await.shutdown().await;
    }
}

#[async_trait]
impl RecorderLink for HyperDeckLink {
    async fn device_info(&self) -> Result<DeviceInfo> {
        let message = self.request("device info").await?;
        Ok(DeviceInfo {
            name: self.name.clone(),
            model: message
                .field("model")
                .map(str::to_string)
                .or_else(|| self.model.clone()),
            firmware_version: message.field("software version").map(str::to_string),
        })
    }

    async fn transport_info(&self) -> Result<TransportReport> {
        let message = self.request("transport info").await?;
        let mut report = TransportReport::default();
        apply_transport_fields(&mut report, &message.fields);
        *self.transport.lock() = report.clone();
        Ok(report)
    }

    async fn subscribe_transport(&self) -> Result<()> {
        self.request("notify: transport: true").await?;
        Ok(())
    }

    async fn close(&self) {
        if self.reader.lock().is_none() {
            return;
        }
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.write_all(b"quit\r\n").await;
        }
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.pending.lock().clear();
        let _ = self.writer.lock().await.shutdown().await;
        debug!(recorder = %self.name, "Recorder session closed");
    }
}

impl Drop for HyperDeckLink {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}
