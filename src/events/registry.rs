//! Event handler registry.
//!
//! Handlers are registered once at startup against a concrete payload type and
//! stored per [`EventKind`] in registration order.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::CacheError;
use crate::domain::error::DomainError;

use super::kinds::{DomainEvent, DomainEventPayload, EventKind};

/// Failure of a single handler invocation. Logged by the dispatcher, never retried.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    kind: &'static str,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source(kind: &'static str, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Short failure category used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl From<CacheError> for HandlerError {
    fn from(err: CacheError) -> Self {
        Self::from_source("cache", err)
    }
}

impl From<DomainError> for HandlerError {
    fn from(err: DomainError) -> Self {
        Self::from_source("domain", err)
    }
}

#[async_trait]
pub trait EventHandler<E: DomainEventPayload>: Send + Sync + 'static {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

struct TypedHandler<E, H> {
    handler: H,
    _payload: PhantomData<fn(&E)>,
}

#[async_trait]
impl<E, H> ErasedHandler for TypedHandler<E, H>
where
    E: DomainEventPayload,
    H: EventHandler<E>,
{
    fn name(&self) -> &'static str {
        self.handler.name()
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        match E::from_event(event) {
            Some(payload) => self.handler.handle(payload).await,
            None => Err(HandlerError::new(
                "routing",
                format!(
                    "handler `{}` expects {} but received {}",
                    self.handler.name(),
                    E::KIND,
                    event.kind()
                ),
            )),
        }
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<Arc<dyn ErasedHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `E::KIND`.
    pub fn register<E, H>(&mut self, handler: H) -> &mut Self
    where
        E: DomainEventPayload,
        H: EventHandler<E>,
    {
        self.handlers.entry(E::KIND).or_default().push(Arc::new(TypedHandler {
            handler,
            _payload: PhantomData,
        }));
        self
    }

    pub(crate) fn handlers_for(&self, kind: EventKind) -> &[Arc<dyn ErasedHandler>] {
        self.handlers.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of the handlers registered for `kind`, in invocation order.
    pub fn handler_names(&self, kind: EventKind) -> Vec<&'static str> {
        self.handlers_for(kind)
            .iter()
            .map(|handler| handler.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
