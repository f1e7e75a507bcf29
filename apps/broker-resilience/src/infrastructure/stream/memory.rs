//! In-memory market-data connector.
//!
//! Drives the stream manager without a network: connection outcomes are
//! scripted, and each accepted connection is fed through an [`InMemoryFeed`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{MarketDataConnection, MarketDataConnector, StreamError};
use crate::domain::{MarketDataMessage, Quote, Symbol, TradeTick};

#[derive(Debug)]
enum FeedItem {
    Message(MarketDataMessage),
    Fail(StreamError),
    Close,
}

/// Sending half of one in-memory connection.
#[derive(Debug, Clone)]
pub struct InMemoryFeed {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl InMemoryFeed {
    /// Deliver a quote. Returns `false` once the connection is gone.
    pub fn quote(&self, quote: Quote) -> bool {
        self.tx
            .send(FeedItem::Message(MarketDataMessage::Quote(quote)))
            .is_ok()
    }

    /// Deliver a trade. Returns `false` once the connection is gone.
    pub fn trade(&self, trade: TradeTick) -> bool {
        self.tx
            .send(FeedItem::Message(MarketDataMessage::Trade(trade)))
            .is_ok()
    }

    /// Drop the connection with an error.
    pub fn fail(&self, error: StreamError) {
        let _ = self.tx.send(FeedItem::Fail(error));
    }

    /// Close the connection cleanly from the server side.
    pub fn close(&self) {
        let _ = self.tx.send(FeedItem::Close);
    }

    /// Whether the connection has been dropped by the client.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
struct InMemoryConnection {
    rx: mpsc::UnboundedReceiver<FeedItem>,
    closed: Arc<AtomicU32>,
    close_delay: Option<Duration>,
}

#[async_trait]
impl MarketDataConnection for InMemoryConnection {
    async fn next_message(&mut self) -> Result<Option<MarketDataMessage>, StreamError> {
        match self.rx.recv().await {
            Some(FeedItem::Message(message)) => Ok(Some(message)),
            Some(FeedItem::Fail(error)) => Err(error),
            Some(FeedItem::Close) | None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.rx.close();
        Ok(())
    }
}

/// Scripted connector for tests.
///
/// Queued outcomes are consumed one per connection attempt; once the queue is
/// empty every attempt gets the default outcome (success unless changed).
#[derive(Debug)]
pub struct InMemoryConnector {
    script: Mutex<VecDeque<Result<(), StreamError>>>,
    default_outcome: Mutex<Result<(), StreamError>>,
    connect_delay: Mutex<Option<Duration>>,
    close_delay: Mutex<Option<Duration>>,
    attempts: Mutex<Vec<Vec<Symbol>>>,
    current: Mutex<Option<InMemoryFeed>>,
    closed: Arc<AtomicU32>,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(Ok(())),
            connect_delay: Mutex::new(None),
            close_delay: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            closed: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl InMemoryConnector {
    /// Connector whose attempts all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next unscripted attempt fail with `error`.
    pub fn fail_next(&self, error: StreamError) {
        self.script.lock().push_back(Err(error));
    }

    /// Make the next unscripted attempt succeed.
    pub fn accept_next(&self) {
        self.script.lock().push_back(Ok(()));
    }

    /// Outcome once the script is exhausted; `None` means success.
    pub fn set_default_failure(&self, error: Option<StreamError>) {
        *self.default_outcome.lock() = error.map_or(Ok(()), Err);
    }

    /// Delay every attempt (tokio time).
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    /// Delay every client-side close (tokio time).
    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }

    /// Symbols requested by each attempt so far.
    #[must_use]
    pub fn attempts(&self) -> Vec<Vec<Symbol>> {
        self.attempts.lock().clone()
    }

    /// Number of connection attempts so far.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Feed of the most recently accepted connection.
    #[must_use]
    pub fn feed(&self) -> Option<InMemoryFeed> {
        self.current.lock().clone()
    }

    /// Connections closed by the client so far.
    #[must_use]
    pub fn closed_count(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataConnector for InMemoryConnector {
    async fn connect(
        &self,
        symbols: &[Symbol],
    ) -> Result<Box<dyn MarketDataConnection>, StreamError> {
        self.attempts.lock().push(symbols.to_vec());

        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.lock().clone());
        outcome?;

        let (tx, rx) = mpsc::unbounded_channel();
        *self.current.lock() = Some(InMemoryFeed { tx });
        Ok(Box::new(InMemoryConnection {
            rx,
            closed: Arc::clone(&self.closed),
            close_delay: *self.close_delay.lock(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::infrastructure::broker::mock::quote;

    #[tokio::test]
    async fn scripted_outcomes_then_default() {
        let connector = InMemoryConnector::new();
        connector.fail_next(StreamError::Timeout);

        assert!(connector.connect(&[Symbol::new("AAPL")]).await.is_err());
        assert!(connector.connect(&[Symbol::new("AAPL")]).await.is_ok());
        assert_eq!(connector.attempt_count(), 2);
    }

    #[tokio::test]
    async fn feed_delivers_then_closes() {
        let connector = InMemoryConnector::new();
        let mut connection = connector.connect(&[]).await.unwrap();
        let feed = connector.feed().unwrap();

        assert!(feed.quote(quote("AAPL", dec!(1), dec!(2))));
        feed.close();

        assert!(matches!(
            connection.next_message().await,
            Ok(Some(MarketDataMessage::Quote(_)))
        ));
        assert!(matches!(connection.next_message().await, Ok(None)));

        connection.close().await.unwrap();
        assert_eq!(connector.closed_count(), 1);
        assert!(feed.is_closed());
    }
}
