//! In-process domain events.
//!
//! Commands publish a [`DomainEvent`] on the [`EventBus`] instead of running
//! deferred side effects inline. A single [`EventDispatcher`] drains the bus on
//! a fixed cadence and invokes every handler registered for the event's kind.
//!
//! Delivery is at most once: queued events are not persisted and failed
//! handler invocations are not retried.

mod bus;
mod dispatcher;
mod kinds;
mod registry;

pub use bus::{Epoch, EventBus, EventBusError, EventEnvelope, EventReceiver};
pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use kinds::{
    CommentAdded, DomainEvent, DomainEventPayload, EventKind, NewsletterSubscribed, UserLoggedIn,
};
pub use registry::{EventHandler, HandlerError, HandlerRegistry};
