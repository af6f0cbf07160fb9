/*
[INPUT]:  User-data and ticker stream receivers, the per-bot state machine
[OUTPUT]: Serialized dispatch of execution reports and ticker ticks
[POS]:    Event layer - per-bot websocket frame routing
[UPDATE]: When dispatch rules, heartbeat cadence or reconnect handling change
*/

use std::sync::Arc;
use std::time::Duration;

use gridcycle_adapter::{StreamEvent, StreamMessage};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::gateway::ExchangeGateway;
use crate::trading::TradingService;

// Venues expire idle listen keys after 60 minutes; renew well inside that.
const LISTEN_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(25 * 60);

/// One router per bot. Decodes nothing itself (the adapter already typed the
/// frames); it serializes every dispatch through the per-bot mutex so state
/// machine operations never interleave.
pub struct EventRouter {
    bot_id: Uuid,
    symbol: String,
    service: Arc<Mutex<TradingService>>,
    gateway: Arc<dyn ExchangeGateway>,
    listen_key: String,
    shutdown: CancellationToken,
}

impl EventRouter {
    pub fn new(
        bot_id: Uuid,
        symbol: impl Into<String>,
        service: Arc<Mutex<TradingService>>,
        gateway: Arc<dyn ExchangeGateway>,
        listen_key: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bot_id,
            symbol: symbol.into(),
            service,
            gateway,
            listen_key: listen_key.into(),
            shutdown,
        }
    }

    /// Run the dispatch loop on its own task.
    pub fn spawn(
        self,
        user_rx: mpsc::Receiver<StreamMessage>,
        ticker_rx: mpsc::Receiver<StreamMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(user_rx, ticker_rx).await })
    }

    async fn run(
        self,
        mut user_rx: mpsc::Receiver<StreamMessage>,
        mut ticker_rx: mpsc::Receiver<StreamMessage>,
    ) {
        let mut heartbeat = tokio::time::interval(LISTEN_KEY_REFRESH_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The interval fires immediately; the key was just created.
        heartbeat.tick().await;

        let mut user_connected_before = false;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(bot_id = %self.bot_id, "router shutdown requested");
                    break;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = self.gateway.keepalive_listen_key(&self.listen_key).await {
                        warn!(bot_id = %self.bot_id, error = %err, "listen key keep-alive failed");
                    }
                }
                message = user_rx.recv() => {
                    match message {
                        Some(StreamMessage::Connected) => {
                            // A reconnect may have dropped fills; reconcile
                            // before trusting the stream again.
                            if user_connected_before {
                                info!(bot_id = %self.bot_id, "user stream reconnected, reconciling");
                                let mut service = self.service.lock().await;
                                if let Err(err) = service.reconcile_open_orders().await
                                    && self.handle_error(&mut service, err).await
                                {
                                    break;
                                }
                            }
                            user_connected_before = true;
                        }
                        Some(StreamMessage::Event { event, raw }) => {
                            if self.dispatch(event, raw).await {
                                break;
                            }
                        }
                        None => {
                            warn!(bot_id = %self.bot_id, "user stream closed");
                            break;
                        }
                    }
                }
                message = ticker_rx.recv() => {
                    match message {
                        Some(StreamMessage::Event { event, raw }) => {
                            if self.dispatch(event, raw).await {
                                break;
                            }
                        }
                        Some(StreamMessage::Connected) => {}
                        None => {
                            warn!(bot_id = %self.bot_id, "ticker stream closed");
                            break;
                        }
                    }
                }
            }
        }

        debug!(bot_id = %self.bot_id, "router stopped");
    }

    /// Dispatch one event. Returns true when the pipeline must stop.
    async fn dispatch(&self, event: StreamEvent, raw: serde_json::Value) -> bool {
        match event {
            StreamEvent::ExecutionReport(report) => {
                let mut service = self.service.lock().await;
                if let Err(err) = service.on_execution_report(&report, raw).await {
                    return self.handle_error(&mut service, err).await;
                }
            }
            StreamEvent::Ticker(ticker) => {
                if ticker.symbol != self.symbol {
                    return false;
                }
                return self.on_price(ticker.last_price).await;
            }
            StreamEvent::Other => {
                debug!(bot_id = %self.bot_id, "ignoring unhandled stream event");
            }
        }
        false
    }

    async fn on_price(&self, price: Decimal) -> bool {
        let mut service = self.service.lock().await;
        if let Err(err) = service.on_ticker(price).await {
            return self.handle_error(&mut service, err).await;
        }
        false
    }

    /// Transient failures retry on the next event; fatal ones stop the bot
    /// (without cancelling exchange orders). Returns true to stop the loop.
    async fn handle_error(&self, service: &mut TradingService, err: EngineError) -> bool {
        if err.is_fatal() {
            error!(bot_id = %self.bot_id, error = %err, "fatal error, stopping bot pipeline");
            if let Err(halt_err) = service.halt() {
                error!(bot_id = %self.bot_id, error = %halt_err, "failed to persist bot halt");
            }
            self.shutdown.cancel();
            return true;
        }

        warn!(bot_id = %self.bot_id, error = %err, "operation failed, retrying on next event");
        false
    }
}
