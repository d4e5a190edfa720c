//! Request pipeline.
//!
//! Each request type has exactly one handler, registered at startup on a
//! [`MediatorBuilder`]. Cross-cutting behaviors are plain decorators around the
//! handler:
//!
//! - [`CacheQueryBehavior`] serves reads through [`CacheService::get_or_compute`].
//! - [`InvalidateCacheBehavior`] removes the declared keys before the write runs.
//!
//! A request that is both is composed as
//! `InvalidateCacheBehavior(CacheQueryBehavior(handler))`.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::application::context::RequestContext;
use crate::application::error::AppError;
use crate::cache::CacheService;

pub trait Request: Send + Sync + 'static {
    type Response: Send + 'static;
}

/// A read whose result may be served from the cache.
pub trait CachedQuery: Request {
    /// Deterministic, collision-free key for this exact query.
    fn cache_key(&self) -> String;
}

/// A write that makes some cached reads stale.
pub trait InvalidateCacheCommand: Request {
    /// Every key a matching read could have populated.
    fn invalidate_keys(&self) -> Vec<String>;
}

#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    async fn handle(&self, request: R, ctx: &RequestContext) -> Result<R::Response, AppError>;
}

#[async_trait]
impl<R, H> RequestHandler<R> for Arc<H>
where
    R: Request,
    H: RequestHandler<R> + ?Sized,
{
    async fn handle(&self, request: R, ctx: &RequestContext) -> Result<R::Response, AppError> {
        (**self).handle(request, ctx).await
    }
}

pub struct CacheQueryBehavior<H> {
    inner: H,
    cache: CacheService,
    expiry: Duration,
}

impl<H> CacheQueryBehavior<H> {
    pub fn new(inner: H, cache: CacheService, expiry: Duration) -> Self {
        Self {
            inner,
            cache,
            expiry,
        }
    }
}

#[async_trait]
impl<R, H> RequestHandler<R> for CacheQueryBehavior<H>
where
    R: CachedQuery,
    R::Response: Serialize + DeserializeOwned,
    H: RequestHandler<R>,
{
    async fn handle(&self, request: R, ctx: &RequestContext) -> Result<R::Response, AppError> {
        let key = request.cache_key();
        self.cache
            .get_or_compute(&key, self.expiry, || self.inner.handle(request, ctx))
            .await
    }
}

pub struct InvalidateCacheBehavior<H> {
    inner: H,
    cache: CacheService,
}

impl<H> InvalidateCacheBehavior<H> {
    pub fn new(inner: H, cache: CacheService) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<R, H> RequestHandler<R> for InvalidateCacheBehavior<H>
where
    R: InvalidateCacheCommand,
    H: RequestHandler<R>,
{
    async fn handle(&self, request: R, ctx: &RequestContext) -> Result<R::Response, AppError> {
        let keys = request.invalidate_keys();
        // Invalidation must complete before the write; a failed removal aborts it.
        self.cache.remove(&keys).await?;
        debug!(
            request = type_name::<R>(),
            invalidated = keys.len(),
            "cache invalidated ahead of command"
        );
        self.inner.handle(request, ctx).await
    }
}

type ErasedHandler = Box<dyn Any + Send + Sync>;

/// Resolves a request to its composed handler by request type.
pub struct Mediator {
    handlers: HashMap<TypeId, ErasedHandler>,
}

impl Mediator {
    pub fn builder(cache: CacheService, query_ttl: Duration) -> MediatorBuilder {
        MediatorBuilder {
            cache,
            query_ttl,
            handlers: HashMap::new(),
        }
    }

    pub async fn send<R: Request>(
        &self,
        request: R,
        ctx: &RequestContext,
    ) -> Result<R::Response, AppError> {
        let handler = self
            .handlers
            .get(&TypeId::of::<R>())
            .and_then(|handler| handler.downcast_ref::<Arc<dyn RequestHandler<R>>>())
            .ok_or_else(|| {
                AppError::unexpected(
                    "Mediator.Unregistered",
                    format!("no handler registered for `{}`", type_name::<R>()),
                )
            })?;
        handler.handle(request, ctx).await
    }

    pub fn is_registered<R: Request>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<R>())
    }
}

pub struct MediatorBuilder {
    cache: CacheService,
    query_ttl: Duration,
    handlers: HashMap<TypeId, ErasedHandler>,
}

impl MediatorBuilder {
    /// Register a handler with no cache behavior.
    pub fn handler<R, H>(self, handler: H) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.insert::<R>(Arc::new(handler))
    }

    pub fn cached_query<R, H>(self, handler: H) -> Self
    where
        R: CachedQuery,
        R::Response: Serialize + DeserializeOwned,
        H: RequestHandler<R>,
    {
        let behavior = CacheQueryBehavior::new(handler, self.cache.clone(), self.query_ttl);
        self.insert::<R>(Arc::new(behavior))
    }

    pub fn invalidating_command<R, H>(self, handler: H) -> Self
    where
        R: InvalidateCacheCommand,
        H: RequestHandler<R>,
    {
        let behavior = InvalidateCacheBehavior::new(handler, self.cache.clone());
        self.insert::<R>(Arc::new(behavior))
    }

    /// Register a request that both reads through the cache and invalidates keys.
    pub fn cached_invalidating<R, H>(self, handler: H) -> Self
    where
        R: CachedQuery + InvalidateCacheCommand,
        R::Response: Serialize + DeserializeOwned,
        H: RequestHandler<R>,
    {
        let cached = CacheQueryBehavior::new(handler, self.cache.clone(), self.query_ttl);
        let behavior = InvalidateCacheBehavior::new(cached, self.cache.clone());
        self.insert::<R>(Arc::new(behavior))
    }

    pub fn build(self) -> Mediator {
        Mediator {
            handlers: self.handlers,
        }
    }

    fn insert<R: Request>(mut self, handler: Arc<dyn RequestHandler<R>>) -> Self {
        if self
            .handlers
            .insert(TypeId::of::<R>(), Box::new(handler))
            .is_some()
        {
            warn!(request = type_name::<R>(), "request handler replaced");
        }
        self
    }
}
