//! Web domain event sink: bridges synchronous expense mutations to the
//! async Rate Capture Engine.
//!
//! Mirrors the teacher's two-phase `WebDomainEventSink` (channel created
//! eagerly in `new()`, worker spawned once dependencies exist in
//! `start_worker()`) but the worker here only has one job: run Rate
//! Capture for `ExpenseCreated`/`ExpenseDateChanged` events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use fxledger_core::events::{DomainEvent, DomainEventSink};
use fxledger_core::fx::CaptureEngine;

pub struct WebDomainEventSink {
    tx: mpsc::UnboundedSender<DomainEvent>,
    rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<DomainEvent>>>,
}

impl WebDomainEventSink {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: std::sync::Mutex::new(Some(rx)),
        }
    }

    /// Spawns the background worker. Events emitted before this call are
    /// buffered on the channel and processed once the worker starts.
    ///
    /// # Panics
    /// Panics if called more than once.
    pub fn start_worker(&self, capture_engine: Arc<CaptureEngine>) {
        let mut rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("start_worker() can only be called once");

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    DomainEvent::ExpenseCreated { expense_id, .. }
                    | DomainEvent::ExpenseDateChanged { expense_id, .. } => {
                        match capture_engine.capture(expense_id).await {
                            Ok(outcome) => info!(
                                expense_id,
                                pairs_captured = outcome.pairs_captured,
                                pairs_failed = outcome.pairs_failed,
                                "rate capture completed"
                            ),
                            Err(e) => warn!(expense_id, error = %e, "rate capture failed"),
                        }
                    }
                    DomainEvent::ExpenseDeleted { .. }
                    | DomainEvent::RatesCaptured { .. }
                    | DomainEvent::DailyRatesRefreshed { .. } => {
                        // No further action: FrozenRates cascade-delete at
                        // the store layer, and these two variants are only
                        // ever emitted, never consumed, by this sink.
                    }
                }
            }
        });
    }
}

impl Default for WebDomainEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainEventSink for WebDomainEventSink {
    fn emit(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            warn!("domain event worker has shut down, dropping event");
        }
    }
}
