/*
[INPUT]:  Stream base URL, listen key or symbol list, cancellation token
[OUTPUT]: Decoded stream messages over mpsc, with reconnection handling
[POS]:    WebSocket layer - stream reader tasks
[UPDATE]: When changing reconnection backoff or subscription URLs
*/

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ws::message::{self, StreamMessage};

const PRODUCTION_STREAM_URL: &str = "wss://stream.binance.com:9443";
const TESTNET_STREAM_URL: &str = "wss://stream.testnet.binance.vision";

const CHANNEL_CAPACITY: usize = 256;
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Factory for the two market streams the engine consumes.
///
/// Each call spawns a detached reader task that owns its connection, emits a
/// `Connected` marker after every successful (re)connect, decodes frames into
/// `StreamMessage`s and reconnects with capped exponential backoff until the
/// cancellation token fires or the receiver is dropped.
#[derive(Debug, Clone)]
pub struct BinanceStreams {
    base_url: String,
}

impl BinanceStreams {
    pub fn new(testnet: bool) -> Self {
        let base = if testnet { TESTNET_STREAM_URL } else { PRODUCTION_STREAM_URL };
        Self { base_url: base.to_string() }
    }

    /// Override the stream host, for tests against a local server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }

    /// Subscribe to the user-data stream for one listen key.
    pub fn user_data_stream(
        &self,
        listen_key: &str,
        shutdown: CancellationToken,
    ) -> mpsc::Receiver<StreamMessage> {
        let url = format!("{}/ws/{}", self.base_url, listen_key);
        spawn_reader(url, "user-data", shutdown)
    }

    /// Subscribe to the combined 24h ticker stream for a set of symbols.
    pub fn ticker_stream(
        &self,
        symbols: &[String],
        shutdown: CancellationToken,
    ) -> mpsc::Receiver<StreamMessage> {
        let streams = symbols
            .iter()
            .map(|symbol| format!("{}@ticker", symbol.to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("{}/stream?streams={}", self.base_url, streams);
        spawn_reader(url, "ticker", shutdown)
    }
}

fn spawn_reader(
    url: String,
    label: &'static str,
    shutdown: CancellationToken,
) -> mpsc::Receiver<StreamMessage> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut retry_count: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = connect_async(&url) => result,
            };

            match connected {
                Ok((ws_stream, _response)) => {
                    retry_count = 0;
                    info!(stream = label, "websocket connected");

                    if tx.send(StreamMessage::Connected).await.is_err() {
                        break;
                    }

                    if !read_until_closed(ws_stream, &tx, &shutdown, label).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(stream = label, error = %err, "websocket connect failed");
                }
            }

            if shutdown.is_cancelled() {
                break;
            }

            let delay = backoff_delay(retry_count);
            retry_count = retry_count.saturating_add(1);
            debug!(
                stream = label,
                retry_count,
                delay_ms = delay.as_millis() as u64,
                "websocket reconnecting"
            );

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(stream = label, "websocket reader stopped");
    });

    rx
}

/// Read frames until the connection drops. Returns false when the receiver
/// went away or shutdown fired, true when a reconnect should follow.
async fn read_until_closed(
    mut ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    tx: &mpsc::Sender<StreamMessage>,
    shutdown: &CancellationToken,
    label: &'static str,
) -> bool {
    loop {
        let incoming = tokio::select! {
            _ = shutdown.cancelled() => return false,
            incoming = ws_stream.next() => incoming,
        };

        match incoming {
            Some(Ok(WsMessage::Text(text))) => {
                if let Some(parsed) = message::decode_frame(&text)
                    && tx.send(parsed).await.is_err()
                {
                    return false;
                }
            }
            Some(Ok(WsMessage::Binary(bytes))) => {
                if let Ok(text) = String::from_utf8(bytes.to_vec())
                    && let Some(parsed) = message::decode_frame(&text)
                    && tx.send(parsed).await.is_err()
                {
                    return false;
                }
            }
            // tungstenite answers pings on the next read; nothing to do here.
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
            Some(Ok(WsMessage::Close(_))) => {
                debug!(stream = label, "websocket closed by peer");
                return true;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(stream = label, error = %err, "websocket read failed");
                return true;
            }
            None => {
                debug!(stream = label, "websocket stream ended");
                return true;
            }
        }
    }
}

fn backoff_delay(retry_count: u32) -> Duration {
    let exp = retry_count.min(6);
    let delay = RECONNECT_BASE_DELAY * 2u32.pow(exp);
    delay.min(RECONNECT_MAX_DELAY)
}
