//! Alpaca stock data stream connector.
//!
//! Handshake: wait for `connected`, authenticate, subscribe quotes and trades
//! for the whole symbol set. Subscriptions are bound at connection time; the
//! manager opens a new connection when the set changes.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::codec::{StreamFrame, auth_message, decode_frame, subscribe_message};
use crate::application::ports::{MarketDataConnection, MarketDataConnector, StreamError};
use crate::domain::{MarketDataMessage, Symbol};
use crate::infrastructure::broker::alpaca::AlpacaConfig;

/// Default bound on the whole connect/auth/subscribe handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens authenticated Alpaca stock stream connections.
#[derive(Clone)]
pub struct AlpacaStreamConnector {
    url: String,
    api_key: String,
    api_secret: String,
    handshake_timeout: Duration,
}

impl std::fmt::Debug for AlpacaStreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaStreamConnector")
            .field("url", &self.url)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl AlpacaStreamConnector {
    /// Create a connector for the configured feed.
    #[must_use]
    pub fn new(config: &AlpacaConfig) -> Self {
        Self {
            url: config.stream_url(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the handshake bound.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn handshake(&self, symbols: &[Symbol]) -> Result<AlpacaConnection, StreamError> {
        tracing::info!(url = %self.url, "Connecting to market data stream");

        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| StreamError::Connect {
                message: e.to_string(),
            })?;

        let mut connection = AlpacaConnection {
            ws,
            pending: VecDeque::new(),
        };

        connection.expect_success("connected").await?;
        connection
            .send_text(auth_message(&self.api_key, &self.api_secret))
            .await?;
        connection.expect_success("authenticated").await?;
        tracing::debug!("Market data stream authenticated");

        if !symbols.is_empty() {
            connection.send_text(subscribe_message(symbols)).await?;
            connection.expect_subscription().await?;
            tracing::info!(count = symbols.len(), "Subscribed to quotes and trades");
        }

        Ok(connection)
    }
}

#[async_trait]
impl MarketDataConnector for AlpacaStreamConnector {
    async fn connect(
        &self,
        symbols: &[Symbol],
    ) -> Result<Box<dyn MarketDataConnection>, StreamError> {
        let connection = tokio::time::timeout(self.handshake_timeout, self.handshake(symbols))
            .await
            .map_err(|_| StreamError::Timeout)??;
        Ok(Box::new(connection))
    }
}

/// One authenticated stream connection.
struct AlpacaConnection {
    ws: WsStream,
    pending: VecDeque<MarketDataMessage>,
}

impl AlpacaConnection {
    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| StreamError::Disconnected {
                message: e.to_string(),
            })
    }

    /// Read the next batch of frames. `Ok(None)` on a close frame.
    async fn read_frames(&mut self) -> Result<Option<Vec<StreamFrame>>, StreamError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return decode_frame(text.as_str()).map(Some),
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(StreamError::Disconnected {
                        message: e.to_string(),
                    });
                }
                None => {
                    return Err(StreamError::Disconnected {
                        message: "stream ended".to_string(),
                    });
                }
            }
        }
    }

    /// Queue data frames, surface errors, and report whether `matches` hit.
    fn absorb<F>(&mut self, frames: Vec<StreamFrame>, mut matches: F) -> Result<bool, StreamError>
    where
        F: FnMut(&StreamFrame) -> bool,
    {
        let mut hit = false;
        for frame in frames {
            if matches(&frame) {
                hit = true;
                continue;
            }
            match frame {
                StreamFrame::Error { code, message } => return Err(stream_error(code, message)),
                StreamFrame::Quote(q) => self.pending.push_back(MarketDataMessage::Quote(q)),
                StreamFrame::Trade(t) => self.pending.push_back(MarketDataMessage::Trade(t)),
                StreamFrame::Success(_) | StreamFrame::Subscription { .. } | StreamFrame::Ignored => {}
            }
        }
        Ok(hit)
    }

    async fn expect_success(&mut self, expected: &str) -> Result<(), StreamError> {
        loop {
            let frames = self.read_frames().await?.ok_or_else(|| StreamError::Protocol {
                message: format!("stream closed while waiting for {expected}"),
            })?;
            if self.absorb(frames, |f| matches!(f, StreamFrame::Success(msg) if msg == expected))? {
                return Ok(());
            }
        }
    }

    async fn expect_subscription(&mut self) -> Result<(), StreamError> {
        loop {
            let frames = self.read_frames().await?.ok_or_else(|| StreamError::Protocol {
                message: "stream closed while subscribing".to_string(),
            })?;
            if self.absorb(frames, |f| matches!(f, StreamFrame::Subscription { .. }))? {
                return Ok(());
            }
        }
    }
}

/// Alpaca codes 401, 402 and 404 are credential problems; the rest are
/// protocol-level (connection limit, slow client, bad subscription, ...).
fn stream_error(code: i64, message: String) -> StreamError {
    match code {
        401 | 402 | 404 => StreamError::Authentication { message },
        _ => StreamError::Protocol {
            message: format!("{code}: {message}"),
        },
    }
}

#[async_trait]
impl MarketDataConnection for AlpacaConnection {
    async fn next_message(&mut self) -> Result<Option<MarketDataMessage>, StreamError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            let Some(frames) = self.read_frames().await? else {
                return Ok(None);
            };
            self.absorb(frames, |_| false)?;
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| StreamError::Disconnected {
                message: e.to_string(),
            })
    }
}
