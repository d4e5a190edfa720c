//! In-process event bus.
//!
//! Many producers publish, one consumer drains. The queue is unbounded so
//! `publish` never waits; events live only in memory and are lost if the
//! process exits before they are dispatched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use futures::Stream;
use futures::stream;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::lock::{mutex_lock, rw_read, rw_write};

use super::kinds::DomainEvent;

const SOURCE: &str = "events::bus";
const METRIC_EVENTS_PUBLISHED: &str = "newsletter_events_published_total";

/// Monotonic per-process sequence number assigned at publish time.
pub type Epoch = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,
}

/// A published event with its identity and ordering metadata.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub epoch: Epoch,
    pub published_at: OffsetDateTime,
    pub event: DomainEvent,
}

pub struct EventBus {
    sender: RwLock<Option<UnboundedSender<EventEnvelope>>>,
    receiver: Mutex<Option<UnboundedReceiver<EventEnvelope>>>,
    epoch_counter: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            epoch_counter: AtomicU64::new(0),
        }
    }

    /// Enqueue `event` and return its id. Returns once queued, not once handled.
    pub fn publish(&self, event: impl Into<DomainEvent>) -> Result<Uuid, EventBusError> {
        let event = event.into();
        let kind = event.kind();
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            epoch: self.epoch_counter.fetch_add(1, Ordering::SeqCst),
            published_at: OffsetDateTime::now_utc(),
            event,
        };
        let id = envelope.id;
        let epoch = envelope.epoch;

        let sent = match rw_read(&self.sender, SOURCE, "publish").as_ref() {
            Some(sender) => sender.send(envelope).is_ok(),
            None => false,
        };
        if !sent {
            warn!(event_id = %id, event_kind = %kind, "Event rejected, bus closed");
            return Err(EventBusError::Closed);
        }

        counter!(METRIC_EVENTS_PUBLISHED, "kind" => kind.as_str()).increment(1);
        info!(
            event_id = %id,
            event_epoch = epoch,
            event_kind = %kind,
            "Domain event enqueued"
        );
        Ok(id)
    }

    /// Hand out the single consumer end. Later calls return `None`.
    pub fn take_receiver(&self) -> Option<EventReceiver> {
        mutex_lock(&self.receiver, SOURCE, "take_receiver")
            .take()
            .map(|inner| EventReceiver {
                inner,
                terminated: false,
            })
    }

    /// Stop accepting events. Already queued events stay drainable.
    pub fn close(&self) {
        if rw_write(&self.sender, SOURCE, "close").take().is_some() {
            info!("Event bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        rw_read(&self.sender, SOURCE, "is_closed").is_none()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer end of the bus. Yields events in publish order.
pub struct EventReceiver {
    inner: UnboundedReceiver<EventEnvelope>,
    terminated: bool,
}

impl EventReceiver {
    /// Wait for the next event. `None` once the bus is closed and empty.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        let next = self.inner.recv().await;
        if next.is_none() {
            self.terminated = true;
        }
        next
    }

    /// Take up to `limit` events that are already queued, without waiting.
    pub fn drain_ready(&mut self, limit: usize) -> Vec<EventEnvelope> {
        let mut ready = Vec::new();
        while ready.len() < limit {
            match self.inner.try_recv() {
                Ok(envelope) => ready.push(envelope),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.terminated = true;
                    break;
                }
            }
        }
        ready
    }

    /// True once the bus has been closed and every queued event was taken.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Lazy FIFO sequence of events that ends when the bus is closed.
    pub fn into_stream(self) -> impl Stream<Item = EventEnvelope> {
        stream::unfold(self.inner, |mut inner| async move {
            inner.recv().await.map(|envelope| (envelope, inner))
        })
    }
}
