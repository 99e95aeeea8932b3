//! WebSocket session with the live voice endpoint.
//!
//! `TransportSession::connect` sends the setup message on the raw socket
//! before any task is spawned, so it is always the first frame on the wire.
//! After that a writer task owns the sink and a reader task decodes inbound
//! frames into `TransportEvent`s.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{decode_server_message, ClientContentMessage, RealtimeInputMessage, ServerEvent, SetupMessage};
use crate::audio::pcm::encode_base64_pcm;
use crate::audio::AudioFrame;
use crate::config::EndpointConfig;
use crate::error::{CallError, CallResult};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;

/// Event surfaced by the reader task
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Server(ServerEvent),
    /// Socket closed; `abnormal` when the close code was not a normal shutdown
    Closed { abnormal: bool, reason: String },
    /// Socket error
    Failed(String),
}

enum Outbound {
    Frame(Message),
    Close,
}

/// Cloneable sending half of the transport
#[derive(Clone)]
pub struct TransportSender {
    tx: mpsc::Sender<Outbound>,
}

impl TransportSender {
    /// Send one capture frame as a realtime-input audio chunk
    pub async fn send_audio(&self, frame: &AudioFrame) -> CallResult<()> {
        let msg = RealtimeInputMessage::pcm(frame.sample_rate, encode_base64_pcm(&frame.samples));
        self.send_json(&msg).await
    }

    /// Send a complete user turn as text
    pub async fn send_turn(&self, text: &str) -> CallResult<()> {
        self.send_json(&ClientContentMessage::user_turn(text)).await
    }

    /// Ask the writer to close the socket; safe to call more than once
    pub async fn close(&self) {
        let _ = self.tx.send(Outbound::Close).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send_json<T: serde::Serialize>(&self, msg: &T) -> CallResult<()> {
        let text = serde_json::to_string(msg).map_err(|e| CallError::Connection(e.to_string()))?;
        self.tx
            .send(Outbound::Frame(Message::Text(text)))
            .await
            .map_err(|_| CallError::Connection("transport is closed".to_string()))
    }
}

/// One open connection to the endpoint
pub struct TransportSession {
    sender: TransportSender,
    events: Option<mpsc::Receiver<TransportEvent>>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    shut_down: bool,
}

impl TransportSession {
    /// Open the socket and send `setup` before anything else
    pub async fn connect(endpoint: &EndpointConfig, setup: &SetupMessage) -> CallResult<Self> {
        let url = endpoint.socket_url()?;
        let timeout = Duration::from_secs(endpoint.connect_timeout_secs.max(1));

        info!("Connecting to voice endpoint (model {})", setup.setup.model);

        let (socket, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| CallError::Connection(format!("connect timed out after {:?}", timeout)))??;

        let (mut sink, stream) = socket.split();

        let setup_json = serde_json::to_string(setup).map_err(|e| CallError::Connection(e.to_string()))?;
        sink.send(Message::Text(setup_json)).await?;
        debug!("Sent setup message");

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        let writer = tokio::spawn(write_loop(sink, out_rx));
        let reader = tokio::spawn(read_loop(stream, event_tx));

        info!("Voice endpoint connected");

        Ok(Self {
            sender: TransportSender { tx: out_tx },
            events: Some(event_rx),
            writer,
            reader,
            shut_down: false,
        })
    }

    pub fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    /// Take the inbound event stream; returns `None` after the first call
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    /// Close the socket and stop both tasks
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.sender.close().await;
        // Give the writer a moment to flush the close frame
        if tokio::time::timeout(Duration::from_millis(500), &mut self.writer)
            .await
            .is_err()
        {
            self.writer.abort();
        }
        self.reader.abort();
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

async fn write_loop(mut sink: SplitSink<Socket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(msg) => {
                if let Err(e) = sink.send(msg).await {
                    warn!("Failed to send to voice endpoint: {}", e);
                    break;
                }
            }
            Outbound::Close => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "call ended".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!("Close frame not sent: {}", e);
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
    debug!("Transport writer stopped");
}

async fn read_loop(mut stream: SplitStream<Socket>, tx: mpsc::Sender<TransportEvent>) {
    while let Some(next) = stream.next().await {
        let text = match next {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping non-UTF-8 binary frame: {}", e);
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                let (abnormal, reason) = match frame {
                    Some(frame) => (
                        !matches!(frame.code, CloseCode::Normal | CloseCode::Away),
                        format!("{} {}", u16::from(frame.code), frame.reason),
                    ),
                    None => (false, "closed".to_string()),
                };
                info!("Voice endpoint closed the socket ({})", reason);
                let _ = tx.send(TransportEvent::Closed { abnormal, reason }).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Voice endpoint socket error: {}", e);
                let _ = tx.send(TransportEvent::Failed(e.to_string())).await;
                return;
            }
        };

        match decode_server_message(&text) {
            Ok(events) => {
                for event in events {
                    if event == ServerEvent::Unrecognized {
                        debug!("Ignoring unrecognized server message");
                        continue;
                    }
                    if tx.send(TransportEvent::Server(event)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("Dropping server message: {}", e),
        }
    }

    // Stream ended without a close frame
    let _ = tx
        .send(TransportEvent::Closed {
            abnormal: true,
            reason: "connection reset".to_string(),
        })
        .await;
}
