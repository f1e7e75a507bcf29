//! Market-data stream connection manager.
//!
//! Owns one connection for the process lifetime. Two tasks run per started
//! lifecycle: the connection loop (connect, read, reconnect) and a consumer
//! that drains a bounded channel into the cache and the registered handlers.
//! A slow handler therefore never stalls the socket; when the channel is full
//! the newest message is dropped and counted.
//!
//! Every connection attempt goes through the stream's circuit breaker. While
//! the breaker is OPEN attempts are skipped, and skipped attempts still count
//! against the reconnect budget.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::cache::MarketDataCache;
use super::config::StreamConfig;
use crate::application::ports::{
    DomainEvent, EventPublisherPort, MarketDataConnection, MarketDataConnector, StreamError,
};
use crate::domain::{MarketDataMessage, Quote, StreamState, StreamSubscriptionSet, TradeTick};
use crate::error::ValidationError;
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, RetrySchedule, RetryStep};

/// Callback for quote updates.
pub type QuoteHandler = Arc<dyn Fn(&Quote) + Send + Sync>;

/// Callback for trade prints.
pub type TradeHandler = Arc<dyn Fn(&TradeTick) + Send + Sync>;

/// Result of [`StreamConnectionManager::update_subscriptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionUpdate {
    /// Same symbols as before; nothing happened.
    Unchanged,
    /// Symbols stored; the stream was not running, so nothing was restarted.
    Stored,
    /// Symbols changed and the connection was restarted.
    Restarted {
        /// Whether the new connection came up within the connect timeout.
        connected: bool,
    },
}

#[derive(Default)]
struct Handlers {
    quote: Vec<QuoteHandler>,
    trade: Vec<TradeHandler>,
}

struct Running {
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
}

enum Attempt {
    Connected(Box<dyn MarketDataConnection>),
    Failed,
    Skipped,
    Shutdown,
}

enum ReadEnd {
    Shutdown,
    Lost(String),
}

struct Shared {
    connector: Arc<dyn MarketDataConnector>,
    breaker: Arc<CircuitBreaker>,
    publisher: Arc<dyn EventPublisherPort>,
    cache: Arc<MarketDataCache>,
    config: StreamConfig,
    handlers: RwLock<Handlers>,
    subscriptions: RwLock<StreamSubscriptionSet>,
    state: watch::Sender<StreamState>,
}

/// Lifecycle owner for the market-data stream.
pub struct StreamConnectionManager {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<Running>>,
}

impl std::fmt::Debug for StreamConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnectionManager")
            .field("state", &*self.shared.state.borrow())
            .field("subscriptions", &*self.shared.subscriptions.read())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl StreamConnectionManager {
    /// Create a stopped manager.
    pub fn new(
        connector: Arc<dyn MarketDataConnector>,
        breaker: Arc<CircuitBreaker>,
        publisher: Arc<dyn EventPublisherPort>,
        config: StreamConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        let (state, _) = watch::channel(StreamState::Disconnected);

        Ok(Self {
            shared: Arc::new(Shared {
                connector,
                breaker,
                publisher,
                cache: Arc::new(MarketDataCache::new()),
                config,
                handlers: RwLock::new(Handlers::default()),
                subscriptions: RwLock::new(StreamSubscriptionSet::default()),
                state,
            }),
            lifecycle: Mutex::new(None),
        })
    }

    /// Register a quote callback. Panics inside it are caught and logged.
    pub fn on_quote<F>(&self, handler: F)
    where
        F: Fn(&Quote) + Send + Sync + 'static,
    {
        self.shared.handlers.write().quote.push(Arc::new(handler));
    }

    /// Register a trade callback. Panics inside it are caught and logged.
    pub fn on_trade<F>(&self, handler: F)
    where
        F: Fn(&TradeTick) + Send + Sync + 'static,
    {
        self.shared.handlers.write().trade.push(Arc::new(handler));
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.shared.state.subscribe()
    }

    /// Symbols bound to the current (or next) connection.
    #[must_use]
    pub fn subscriptions(&self) -> StreamSubscriptionSet {
        self.shared.subscriptions.read().clone()
    }

    /// Latest market data received.
    #[must_use]
    pub fn cache(&self) -> Arc<MarketDataCache> {
        Arc::clone(&self.shared.cache)
    }

    /// Breaker gating connection attempts.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.shared.breaker
    }

    /// Whether a connection loop is alive.
    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.is_some() && self.state() != StreamState::Disconnected
    }

    /// Subscribe to `get_symbols()` and connect.
    ///
    /// Waits up to the connect timeout for the first connection and returns
    /// whether it came up. On timeout the loop keeps trying in the
    /// background. An empty symbol set does not connect.
    ///
    /// On a running stream this behaves like [`Self::update_subscriptions`]:
    /// the loop restarts only when the set changed, so the active
    /// subscriptions always match the stored set.
    pub async fn start<F, I, S>(&self, get_symbols: F) -> bool
    where
        F: FnOnce() -> I,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = StreamSubscriptionSet::new(get_symbols());
        if !self.is_running().await {
            *self.shared.subscriptions.write() = next;
            return self.launch().await;
        }

        match self.replace_subscriptions(next).await {
            SubscriptionUpdate::Unchanged => self.state() == StreamState::Connected,
            SubscriptionUpdate::Restarted { connected } => connected,
            // The loop gave up between the two checks.
            SubscriptionUpdate::Stored => self.launch().await,
        }
    }

    /// Stop the connection loop.
    ///
    /// Idempotent. Waits at most the stop timeout for the tasks to finish and
    /// aborts them past it; returns `false` in that case.
    pub async fn stop(&self) -> bool {
        let running = self.lifecycle.lock().await.take();
        let Some(Running {
            shutdown,
            mut tasks,
        }) = running
        else {
            return true;
        };

        shutdown.cancel();
        let stop_timeout = self.shared.config.stop_timeout;
        let joined = tokio::time::timeout(stop_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !joined {
            tracing::error!(
                timeout_ms = u64::try_from(stop_timeout.as_millis()).unwrap_or(u64::MAX),
                "Stream tasks did not stop in time, aborting"
            );
            tasks.abort_all();
        }

        self.shared.set_state(StreamState::Disconnected).await;
        tracing::info!(clean = joined, "Market data stream stopped");
        joined
    }

    /// Stop, then reconnect with the current subscription set.
    pub async fn restart(&self) -> bool {
        tracing::info!("Restarting market data stream");
        self.stop().await;
        self.launch().await
    }

    /// Replace the subscription set; restart only if it changed and the
    /// stream is running.
    pub async fn update_subscriptions<I, S>(&self, symbols: I) -> SubscriptionUpdate
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.replace_subscriptions(StreamSubscriptionSet::new(symbols)).await
    }

    async fn replace_subscriptions(&self, next: StreamSubscriptionSet) -> SubscriptionUpdate {
        {
            let mut current = self.shared.subscriptions.write();
            if *current == next {
                return SubscriptionUpdate::Unchanged;
            }
            tracing::info!(
                from = current.len(),
                to = next.len(),
                "Stream subscriptions changed"
            );
            *current = next;
        }

        if !self.is_running().await {
            return SubscriptionUpdate::Stored;
        }
        SubscriptionUpdate::Restarted {
            connected: self.restart().await,
        }
    }

    async fn launch(&self) -> bool {
        let mut state_rx = self.shared.state.subscribe();
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if let Some(running) = lifecycle.as_mut() {
                if self.state() != StreamState::Disconnected {
                    tracing::debug!("Market data stream already running");
                    return self.state() == StreamState::Connected;
                }
                // The previous loop gave up on its own; reap it.
                running.shutdown.cancel();
                running.tasks.shutdown().await;
                *lifecycle = None;
            }

            if self.shared.subscriptions.read().is_empty() {
                tracing::warn!("No symbols to stream, not connecting");
                return false;
            }

            self.shared.set_state(StreamState::Connecting).await;

            let shutdown = CancellationToken::new();
            let (tx, rx) = mpsc::channel(self.shared.config.channel_capacity);
            let mut tasks = JoinSet::new();
            tasks.spawn(Arc::clone(&self.shared).consume(rx));
            tasks.spawn(Arc::clone(&self.shared).connection_loop(tx, shutdown.clone()));
            *lifecycle = Some(Running { shutdown, tasks });
        }

        let connect_timeout = self.shared.config.connect_timeout;
        let outcome = tokio::time::timeout(
            connect_timeout,
            state_rx.wait_for(|s| matches!(s, StreamState::Connected | StreamState::Disconnected)),
        )
        .await;

        match outcome {
            Ok(Ok(state)) => *state == StreamState::Connected,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Market data stream not connected within timeout, still trying"
                );
                false
            }
        }
    }
}

impl Shared {
    async fn set_state(&self, to: StreamState) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }

        tracing::info!(%from, %to, "Market data stream state changed");
        metrics::record_stream_state(to);

        let event = DomainEvent::StreamStateChanged {
            from,
            to,
            at: Utc::now(),
        };
        if let Err(e) = self.publisher.publish(event).await {
            tracing::warn!(error = %e, "Failed to publish stream state change");
        }
    }

    async fn connection_loop(
        self: Arc<Self>,
        tx: mpsc::Sender<MarketDataMessage>,
        shutdown: CancellationToken,
    ) {
        let mut schedule = RetrySchedule::new(self.config.reconnect.clone());

        loop {
            match self.attempt_connection(&shutdown).await {
                Attempt::Shutdown => break,
                Attempt::Connected(connection) => {
                    schedule.reset();
                    self.set_state(StreamState::Connected).await;
                    match self.read_loop(connection, &tx, &shutdown).await {
                        ReadEnd::Shutdown => break,
                        ReadEnd::Lost(reason) => {
                            tracing::warn!(reason = %reason, "Market data stream lost");
                        }
                    }
                }
                Attempt::Failed | Attempt::Skipped => {}
            }

            match schedule.next(Instant::now()) {
                RetryStep::Retry { attempt, delay, .. } => {
                    self.set_state(StreamState::Reconnecting).await;
                    tracing::info!(
                        attempt,
                        max_attempts = schedule.policy().max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting market data stream"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = shutdown.cancelled() => break,
                    }
                }
                RetryStep::Exhausted { attempts } => {
                    tracing::error!(attempts, "Market data stream reconnection attempts exhausted");
                    break;
                }
            }
        }

        self.set_state(StreamState::Disconnected).await;
    }

    async fn attempt_connection(&self, shutdown: &CancellationToken) -> Attempt {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                metrics::record_stream_reconnect(true);
                tracing::info!(
                    breaker = %open.name,
                    state = %open.state,
                    "Circuit open, skipping stream connection attempt"
                );
                return Attempt::Skipped;
            }
        };
        metrics::record_stream_reconnect(false);

        let symbols = self.subscriptions.read().to_vec();
        let connect = tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&symbols));
        let result = tokio::select! {
            result = connect => result.unwrap_or(Err(StreamError::Timeout)),
            () = shutdown.cancelled() => return Attempt::Shutdown,
        };

        match result {
            Ok(connection) => {
                permit.success();
                tracing::info!(symbols = symbols.len(), "Market data stream connected");
                Attempt::Connected(connection)
            }
            Err(e) => {
                if e.is_dependency_failure() {
                    permit.failure();
                } else {
                    permit.release();
                }
                tracing::warn!(error = %e, "Market data stream connection attempt failed");
                Attempt::Failed
            }
        }
    }

    async fn read_loop(
        &self,
        mut connection: Box<dyn MarketDataConnection>,
        tx: &mpsc::Sender<MarketDataMessage>,
        shutdown: &CancellationToken,
    ) -> ReadEnd {
        loop {
            let next = tokio::select! {
                next = connection.next_message() => Some(next),
                () = shutdown.cancelled() => None,
            };

            match next {
                None => {
                    if let Err(e) = connection.close().await {
                        tracing::debug!(error = %e, "Error closing market data stream");
                    }
                    return ReadEnd::Shutdown;
                }
                Some(Ok(Some(message))) => forward(tx, message),
                Some(Ok(None)) => return ReadEnd::Lost("server closed the stream".to_string()),
                Some(Err(e)) => return ReadEnd::Lost(e.to_string()),
            }
        }
    }

    async fn consume(self: Arc<Self>, mut rx: mpsc::Receiver<MarketDataMessage>) {
        while let Some(message) = rx.recv().await {
            self.dispatch(&message);
        }
    }

    fn dispatch(&self, message: &MarketDataMessage) {
        match message {
            MarketDataMessage::Quote(quote) => {
                metrics::record_stream_message("quote");
                self.cache.update_quote(quote.clone());
                let handlers = self.handlers.read().quote.clone();
                for handler in handlers {
                    if catch_unwind(AssertUnwindSafe(|| handler(quote))).is_err() {
                        metrics::record_handler_failure("quote");
                        tracing::error!(symbol = %quote.symbol, "Quote handler panicked");
                    }
                }
            }
            MarketDataMessage::Trade(trade) => {
                metrics::record_stream_message("trade");
                self.cache.update_trade(trade.clone());
                let handlers = self.handlers.read().trade.clone();
                for handler in handlers {
                    if catch_unwind(AssertUnwindSafe(|| handler(trade))).is_err() {
                        metrics::record_handler_failure("trade");
                        tracing::error!(symbol = %trade.symbol, "Trade handler panicked");
                    }
                }
            }
        }
    }
}

fn forward(tx: &mpsc::Sender<MarketDataMessage>, message: MarketDataMessage) {
    if let Err(TrySendError::Full(dropped)) = tx.try_send(message) {
        metrics::record_stream_dropped();
        tracing::debug!(symbol = %dropped.symbol(), "Market data channel full, dropping message");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::Symbol;
    use crate::infrastructure::broker::mock::quote;
    use crate::infrastructure::events::BroadcastEventBus;
    use crate::infrastructure::stream::InMemoryConnector;
    use crate::resilience::{BackoffPolicy, CircuitBreakerConfig, CircuitState};

    fn config(max_attempts: u32) -> StreamConfig {
        StreamConfig {
            reconnect: BackoffPolicy::new(
                Duration::from_millis(100),
                Duration::from_secs(1),
                2.0,
                0.0,
                max_attempts,
            ),
            ..StreamConfig::default()
        }
    }

    fn manager(
        connector: &Arc<InMemoryConnector>,
        failure_threshold: u32,
        config: StreamConfig,
    ) -> (StreamConnectionManager, BroadcastEventBus) {
        let breaker = CircuitBreaker::new(
            "market_data",
            CircuitBreakerConfig {
                failure_threshold,
                ..CircuitBreakerConfig::market_data()
            },
        )
        .unwrap();
        let bus = BroadcastEventBus::new(64);
        let manager = StreamConnectionManager::new(
            connector.clone(),
            Arc::new(breaker),
            Arc::new(bus.clone()),
            config,
        )
        .unwrap();
        (manager, bus)
    }

    /// Let the connection and consumer tasks run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_connects_with_symbol_set() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, _) = manager(&connector, 3, config(5));

        assert!(manager.start(|| ["msft", "aapl", "AAPL"]).await);
        assert_eq!(manager.state(), StreamState::Connected);
        assert!(manager.is_running().await);
        assert_eq!(
            connector.attempts(),
            vec![vec![Symbol::new("AAPL"), Symbol::new("MSFT")]]
        );

        assert!(manager.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_symbol_set_does_not_connect() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, _) = manager(&connector, 3, config(5));

        assert!(!manager.start(|| Vec::<String>::new()).await);
        assert_eq!(connector.attempt_count(), 0);
        assert_eq!(manager.state(), StreamState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_reach_cache_and_handlers() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, _) = manager(&connector, 3, config(5));
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        manager.on_quote(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.start(|| ["AAPL"]).await);
        let feed = connector.feed().unwrap();
        feed.quote(quote("AAPL", dec!(189.9), dec!(190.1)));
        settle().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let cached = manager.cache().latest_quote(&Symbol::new("AAPL")).unwrap();
        assert_eq!(cached.ask, dec!(190.1));

        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_does_not_stop_the_stream() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, _) = manager(&connector, 3, config(5));
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        manager.on_quote(|_| panic!("handler bug"));
        manager.on_quote(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.start(|| ["AAPL"]).await);
        let feed = connector.feed().unwrap();
        feed.quote(quote("AAPL", dec!(1), dec!(2)));
        feed.quote(quote("AAPL", dec!(1), dec!(2)));
        settle().await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(manager.state(), StreamState::Connected);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, _) = manager(&connector, 3, config(5));

        assert!(manager.start(|| ["AAPL"]).await);
        assert!(manager.stop().await);
        assert!(manager.stop().await);

        assert_eq!(manager.state(), StreamState::Disconnected);
        assert_eq!(connector.closed_count(), 1);
        assert!(!manager.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_connection_loss() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, _) = manager(&connector, 3, config(5));

        assert!(manager.start(|| ["AAPL"]).await);
        connector.feed().unwrap().fail(StreamError::Disconnected {
            message: "reset by peer".into(),
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(manager.state(), StreamState::Connected);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_skips_attempts_and_exhausts_budget() {
        let connector = Arc::new(InMemoryConnector::new());
        connector.set_default_failure(Some(StreamError::Connect {
            message: "refused".into(),
        }));
        let (manager, _) = manager(&connector, 1, config(3));

        // First attempt fails and opens the breaker; the three retries are
        // all skipped inside the 30s cooldown.
        assert!(!manager.start(|| ["AAPL"]).await);

        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(manager.breaker().state(), CircuitState::Open);
        assert_eq!(manager.state(), StreamState::Disconnected);
        assert!(!manager.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_failure_does_not_trip_breaker() {
        let connector = Arc::new(InMemoryConnector::new());
        connector.fail_next(StreamError::Authentication {
            message: "bad key".into(),
        });
        let (manager, _) = manager(&connector, 1, config(3));

        assert!(manager.start(|| ["AAPL"]).await);
        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(manager.breaker().stats().total_failures, 0);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_exhaustion_relaunches() {
        let connector = Arc::new(InMemoryConnector::new());
        connector.fail_next(StreamError::Timeout);
        connector.fail_next(StreamError::Timeout);
        let (manager, _) = manager(&connector, 5, config(1));

        assert!(!manager.start(|| ["AAPL"]).await);
        assert_eq!(connector.attempt_count(), 2);

        assert!(manager.restart().await);
        assert_eq!(manager.state(), StreamState::Connected);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_updates_restart_only_on_change() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, _) = manager(&connector, 3, config(5));

        assert_eq!(
            manager.update_subscriptions(["SPY"]).await,
            SubscriptionUpdate::Stored
        );
        assert!(manager.start(|| ["SPY"]).await);

        assert_eq!(
            manager.update_subscriptions(["spy"]).await,
            SubscriptionUpdate::Unchanged
        );
        assert_eq!(connector.attempt_count(), 1);

        assert_eq!(
            manager.update_subscriptions(["SPY", "QQQ"]).await,
            SubscriptionUpdate::Restarted { connected: true }
        );
        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(
            connector.attempts().last().unwrap(),
            &vec![Symbol::new("QQQ"), Symbol::new("SPY")]
        );
        assert_eq!(connector.closed_count(), 1);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_applies_the_new_set() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, _) = manager(&connector, 3, config(5));

        assert!(manager.start(|| ["AAPL"]).await);
        assert!(manager.start(|| ["MSFT"]).await);

        assert_eq!(
            connector.attempts(),
            vec![vec![Symbol::new("AAPL")], vec![Symbol::new("MSFT")]]
        );
        assert_eq!(manager.subscriptions().to_vec(), vec![Symbol::new("MSFT")]);
        assert_eq!(connector.closed_count(), 1);
        assert_eq!(
            manager.update_subscriptions(["MSFT"]).await,
            SubscriptionUpdate::Unchanged
        );

        // Same set again: nothing to do.
        assert!(manager.start(|| ["msft"]).await);
        assert_eq!(connector.attempt_count(), 2);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_tasks_that_outlive_the_timeout() {
        let connector = Arc::new(InMemoryConnector::new());
        connector.set_close_delay(Duration::from_secs(60));
        let (manager, _) = manager(&connector, 3, config(5));
        let stop_timeout = StreamConfig::default().stop_timeout;

        assert!(manager.start(|| ["AAPL"]).await);
        let started = tokio::time::Instant::now();
        assert!(!manager.stop().await);

        let elapsed = started.elapsed();
        assert!(elapsed >= stop_timeout && elapsed < Duration::from_secs(60), "{elapsed:?}");
        assert_eq!(manager.state(), StreamState::Disconnected);
        assert!(!manager.is_running().await);
        // The close never finished.
        assert_eq!(connector.closed_count(), 0);

        // A fresh loop can still be launched.
        assert!(manager.start(|| ["AAPL"]).await);
        assert_eq!(connector.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_connection_attempt() {
        let connector = Arc::new(InMemoryConnector::new());
        connector.set_connect_delay(Duration::from_secs(10));
        let (manager, _) = manager(&connector, 3, config(5));
        let manager = Arc::new(manager);

        let starter = Arc::clone(&manager);
        let start = tokio::spawn(async move { starter.start(|| ["AAPL"]).await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(manager.stop().await);
        assert!(!start.await.unwrap());
        assert_eq!(manager.state(), StreamState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_published() {
        let connector = Arc::new(InMemoryConnector::new());
        let (manager, bus) = manager(&connector, 3, config(5));
        let mut events = bus.subscribe();

        assert!(manager.start(|| ["AAPL"]).await);
        manager.stop().await;

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DomainEvent::StreamStateChanged { from, to, .. } = event {
                transitions.push((from, to));
            }
        }
        assert_eq!(
            transitions,
            vec![
                (StreamState::Disconnected, StreamState::Connecting),
                (StreamState::Connecting, StreamState::Connected),
                (StreamState::Connected, StreamState::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn full_channel_drops_newest() {
        let (tx, mut rx) = mpsc::channel(1);
        forward(&tx, MarketDataMessage::Quote(quote("A", dec!(1), dec!(2))));
        forward(&tx, MarketDataMessage::Quote(quote("B", dec!(1), dec!(2))));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.symbol(), &Symbol::new("A"));
        assert!(rx.try_recv().is_err());
    }
}
