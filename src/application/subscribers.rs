//! Mailing list subscription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::context::RequestContext;
use crate::application::cooldown::{is_cooling_down, start_cooldown};
use crate::application::error::AppError;
use crate::application::pipeline::{CachedQuery, InvalidateCacheCommand, Request, RequestHandler};
use crate::application::repos::{RepoError, SubscribersRepo};
use crate::cache::{CacheKey, CacheService};
use crate::domain::entities::normalize_email;
use crate::events::{EventBus, EventHandler, HandlerError, NewsletterSubscribed};

const SUBSCRIBE: &str = "SubscribeToNewsletter";
/// Cooldown actor used when the caller address is not known.
pub const UNKNOWN_CALLER: &str = "unknown";

fn subscribers_count_key() -> String {
    CacheKey::new("FetchSubscribersCount").into_string()
}

fn cooldown_actor(caller_address: Option<&str>) -> &str {
    caller_address.unwrap_or(UNKNOWN_CALLER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribersCount {
    pub count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FetchSubscribersCount;

impl Request for FetchSubscribersCount {
    type Response = SubscribersCount;
}

impl CachedQuery for FetchSubscribersCount {
    fn cache_key(&self) -> String {
        subscribers_count_key()
    }
}

pub struct FetchSubscribersCountHandler {
    subscribers: Arc<dyn SubscribersRepo>,
}

impl FetchSubscribersCountHandler {
    pub fn new(subscribers: Arc<dyn SubscribersRepo>) -> Self {
        Self { subscribers }
    }
}

#[async_trait]
impl RequestHandler<FetchSubscribersCount> for FetchSubscribersCountHandler {
    async fn handle(
        &self,
        _request: FetchSubscribersCount,
        _ctx: &RequestContext,
    ) -> Result<SubscribersCount, AppError> {
        let count = self.subscribers.count_subscribers().await?;
        Ok(SubscribersCount { count })
    }
}

#[derive(Debug, Clone)]
pub struct SubscribeToNewsletter {
    pub email: String,
}

impl Request for SubscribeToNewsletter {
    type Response = ();
}

impl InvalidateCacheCommand for SubscribeToNewsletter {
    fn invalidate_keys(&self) -> Vec<String> {
        vec![subscribers_count_key()]
    }
}

pub struct SubscribeToNewsletterHandler {
    cache: CacheService,
    bus: Arc<EventBus>,
    subscribers: Arc<dyn SubscribersRepo>,
}

impl SubscribeToNewsletterHandler {
    pub fn new(cache: CacheService, bus: Arc<EventBus>, subscribers: Arc<dyn SubscribersRepo>) -> Self {
        Self {
            cache,
            bus,
            subscribers,
        }
    }
}

#[async_trait]
impl RequestHandler<SubscribeToNewsletter> for SubscribeToNewsletterHandler {
    async fn handle(
        &self,
        request: SubscribeToNewsletter,
        ctx: &RequestContext,
    ) -> Result<(), AppError> {
        let email = normalize_email(&request.email)
            .map_err(|err| AppError::validation("SubscribeToNewsletter.Email", err.to_string()))?;

        let actor = cooldown_actor(ctx.caller_address());
        if is_cooling_down(&self.cache, SUBSCRIBE, actor).await? {
            return Err(AppError::validation(
                "SubscribeToNewsletter.Cooldown",
                "Cannot process request, cooldown is active",
            ));
        }

        if self
            .subscribers
            .find_subscriber_by_email(&email)
            .await?
            .is_some()
        {
            return Err(AppError::conflict(
                "SubscribeToNewsletter.SubscriberExists",
                "Subscriber already exists",
            ));
        }

        self.bus.publish(NewsletterSubscribed {
            email,
            caller_address: ctx.caller_address().map(str::to_string),
        })?;
        Ok(())
    }
}

/// Stores the subscriber and drops the cached count it made stale.
pub struct PersistSubscriber {
    subscribers: Arc<dyn SubscribersRepo>,
    cache: CacheService,
}

impl PersistSubscriber {
    pub fn new(subscribers: Arc<dyn SubscribersRepo>, cache: CacheService) -> Self {
        Self { subscribers, cache }
    }
}

#[async_trait]
impl EventHandler<NewsletterSubscribed> for PersistSubscriber {
    fn name(&self) -> &'static str {
        "persist_subscriber"
    }

    async fn handle(&self, event: &NewsletterSubscribed) -> Result<(), HandlerError> {
        match self.subscribers.create_subscriber(&event.email).await {
            Ok(subscriber) => {
                info!(subscriber_id = subscriber.id, "Subscriber persisted");
            }
            Err(RepoError::Duplicate { constraint }) => {
                warn!(constraint = %constraint, "Subscriber already stored, skipping");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.cache.remove(&[subscribers_count_key()]).await?;
        Ok(())
    }
}

/// Blocks the caller address from subscribing again for the configured window.
pub struct ActivateSubscribeCooldown {
    cache: CacheService,
    duration: Duration,
}

impl ActivateSubscribeCooldown {
    pub fn new(cache: CacheService, duration: Duration) -> Self {
        Self { cache, duration }
    }
}

#[async_trait]
impl EventHandler<NewsletterSubscribed> for ActivateSubscribeCooldown {
    fn name(&self) -> &'static str {
        "activate_subscribe_cooldown"
    }

    async fn handle(&self, event: &NewsletterSubscribed) -> Result<(), HandlerError> {
        let actor = cooldown_actor(event.caller_address.as_deref());
        start_cooldown(&self.cache, SUBSCRIBE, actor, self.duration).await?;
        Ok(())
    }
}
