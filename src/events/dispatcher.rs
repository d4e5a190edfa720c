//! Background event dispatcher.
//!
//! Wakes on a fixed interval, drains the events already queued on the bus and
//! fans each one out to its registered handlers. A failing or panicking
//! handler is logged and skipped; the remaining handlers still run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use super::bus::{EventEnvelope, EventReceiver};
use super::registry::HandlerRegistry;

const METRIC_EVENTS_DISPATCHED: &str = "newsletter_events_dispatched_total";
const METRIC_HANDLER_FAILED: &str = "newsletter_event_handler_failed_total";
const METRIC_DISPATCH_MS: &str = "newsletter_event_dispatch_ms";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_BATCH_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Time between drains.
    pub interval: Duration,
    /// Events taken off the bus per chunk; a drain keeps going until empty.
    pub batch_limit: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::EventSettings> for DispatcherConfig {
    fn from(settings: &crate::config::EventSettings) -> Self {
        Self {
            interval: settings.dispatch_interval,
            batch_limit: settings.drain_batch_limit.get(),
        }
    }
}

/// Outcome of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Handled,
    Failed,
}

pub struct EventDispatcher {
    receiver: EventReceiver,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
}

impl EventDispatcher {
    pub fn new(
        receiver: EventReceiver,
        registry: Arc<HandlerRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            receiver,
            registry,
            config,
        }
    }

    /// Dispatch every event already queued, in chunks of `batch_limit`.
    ///
    /// Returns the number of events taken off the bus.
    #[instrument(skip(self))]
    pub async fn dispatch_pending(&mut self) -> usize {
        let chunk = self.config.batch_limit.max(1);
        let mut total = 0;
        loop {
            let handled = self.dispatch_chunk(chunk).await;
            total += handled;
            if handled < chunk {
                return total;
            }
        }
    }

    async fn dispatch_chunk(&mut self, limit: usize) -> usize {
        let batch = self.receiver.drain_ready(limit);
        if batch.is_empty() {
            return 0;
        }

        let started_at = Instant::now();
        let mut failed = 0usize;
        for envelope in &batch {
            failed += self.dispatch(envelope).await;
        }

        info!(
            event_count = batch.len(),
            handler_failures = failed,
            "Event batch dispatched"
        );
        histogram!(METRIC_DISPATCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        batch.len()
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The signal is only observed between ticks, so a batch in progress always
    /// completes. Events still queued at shutdown are drained once more before
    /// returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // Skip the first immediate tick

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_limit = self.config.batch_limit,
            "Event dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            self.dispatch_pending().await;
            if self.receiver.is_terminated() {
                info!("Event bus closed, dispatcher exiting");
                return;
            }
        }

        let drained = self.dispatch_pending().await;
        info!(drained, "Event dispatcher stopped");
    }

    /// Invoke the handlers for one event sequentially, in registration order.
    /// Returns the number of failures.
    async fn dispatch(&self, envelope: &EventEnvelope) -> usize {
        let kind = envelope.event.kind();
        let handlers = self.registry.handlers_for(kind);
        if handlers.is_empty() {
            debug!(
                event_id = %envelope.id,
                event_kind = %kind,
                "No handlers registered"
            );
        }

        let mut failed = 0;
        for handler in handlers {
            let name = handler.name();
            let result = AssertUnwindSafe(handler.handle(&envelope.event))
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(Ok(())) => Outcome::Handled,
                Ok(Err(err)) => {
                    error!(
                        event_id = %envelope.id,
                        event_epoch = envelope.epoch,
                        event_kind = %kind,
                        handler = name,
                        error_kind = err.kind(),
                        error = %err,
                        "Event handler failed"
                    );
                    counter!(METRIC_HANDLER_FAILED, "handler" => name, "error_kind" => err.kind())
                        .increment(1);
                    Outcome::Failed
                }
                Err(panic) => {
                    error!(
                        event_id = %envelope.id,
                        event_epoch = envelope.epoch,
                        event_kind = %kind,
                        handler = name,
                        error_kind = "panic",
                        error = panic_message(panic.as_ref()),
                        "Event handler panicked"
                    );
                    counter!(METRIC_HANDLER_FAILED, "handler" => name, "error_kind" => "panic")
                        .increment(1);
                    Outcome::Failed
                }
            };

            if outcome == Outcome::Failed {
                failed += 1;
            } else {
                debug!(event_id = %envelope.id, handler = name, "Event handled");
            }
        }

        counter!(METRIC_EVENTS_DISPATCHED, "kind" => kind.as_str()).increment(1);
        failed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
