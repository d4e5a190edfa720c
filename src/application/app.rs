//! Application context: owns the shared cache and event bus and wires every
//! request handler and event handler at startup.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::application::articles::{
    ActivateCommentCooldown, AddComment, AddCommentHandler, CreateComment, FetchArticle,
    FetchArticleHandler, FetchArticles, FetchArticlesHandler, FetchComments, FetchCommentsHandler,
};
use crate::application::context::RequestContext;
use crate::application::cooldown::CooldownPolicy;
use crate::application::error::AppError;
use crate::application::identity::IdentityProvider;
use crate::application::pipeline::{Mediator, Request};
use crate::application::repos::{ArticlesRepo, SubscribersRepo, UsersRepo};
use crate::application::subscribers::{
    ActivateSubscribeCooldown, FetchSubscribersCount, FetchSubscribersCountHandler,
    PersistSubscriber, SubscribeToNewsletter, SubscribeToNewsletterHandler,
};
use crate::application::users::{
    CompleteLogin, CompleteLoginHandler, GetUserContext, GetUserContextHandler,
    IdentityRedirectHandler, SyncUserLogin, UserLogin, UserSignOut,
};
use crate::cache::{CacheConfig, CacheService, CacheStore};
use crate::events::{
    CommentAdded, DispatcherConfig, EventBus, EventDispatcher, HandlerRegistry,
    NewsletterSubscribed, UserLoggedIn,
};

/// Persistence adapters the handlers read and write through.
#[derive(Clone)]
pub struct Repositories {
    pub articles: Arc<dyn ArticlesRepo>,
    pub subscribers: Arc<dyn SubscribersRepo>,
    pub users: Arc<dyn UsersRepo>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationConfig {
    pub cache: CacheConfig,
    pub cooldowns: CooldownPolicy,
    pub dispatcher: DispatcherConfig,
}

impl From<&crate::config::Settings> for ApplicationConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            cache: CacheConfig::from(&settings.cache),
            cooldowns: CooldownPolicy::from(&settings.cooldowns),
            dispatcher: DispatcherConfig::from(&settings.events),
        }
    }
}

#[derive(Clone)]
pub struct Application {
    cache: CacheService,
    bus: Arc<EventBus>,
    registry: Arc<HandlerRegistry>,
    mediator: Arc<Mediator>,
    dispatcher_config: DispatcherConfig,
}

impl Application {
    pub fn new(
        config: ApplicationConfig,
        store: Arc<dyn CacheStore>,
        repos: Repositories,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let cache = CacheService::new(store);
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(build_registry(&cache, &repos, config.cooldowns));
        let mediator = Arc::new(build_mediator(
            &cache,
            &bus,
            &repos,
            identity,
            config.cache.query_ttl,
        ));

        info!(
            event_handlers = registry.len(),
            query_ttl_secs = config.cache.query_ttl.as_secs(),
            "Application wired"
        );

        Self {
            cache,
            bus,
            registry,
            mediator,
            dispatcher_config: config.dispatcher,
        }
    }

    /// Run `request` through its pipeline.
    pub async fn send<R: Request>(
        &self,
        request: R,
        ctx: &RequestContext,
    ) -> Result<R::Response, AppError> {
        self.mediator.send(request, ctx).await
    }

    /// Build the background dispatcher. Only the first call gets one.
    pub fn dispatcher(&self) -> Option<EventDispatcher> {
        let receiver = self.bus.take_receiver()?;
        Some(EventDispatcher::new(
            receiver,
            self.registry.clone(),
            self.dispatcher_config,
        ))
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn mediator(&self) -> &Mediator {
        &self.mediator
    }
}

fn build_registry(
    cache: &CacheService,
    repos: &Repositories,
    cooldowns: CooldownPolicy,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register::<CommentAdded, _>(ActivateCommentCooldown::new(
            cache.clone(),
            cooldowns.comment,
        ))
        .register::<CommentAdded, _>(CreateComment::new(
            repos.articles.clone(),
            repos.users.clone(),
            cache.clone(),
        ))
        .register::<NewsletterSubscribed, _>(PersistSubscriber::new(
            repos.subscribers.clone(),
            cache.clone(),
        ))
        .register::<NewsletterSubscribed, _>(ActivateSubscribeCooldown::new(
            cache.clone(),
            cooldowns.subscribe,
        ))
        .register::<UserLoggedIn, _>(SyncUserLogin::new(repos.users.clone()));
    registry
}

fn build_mediator(
    cache: &CacheService,
    bus: &Arc<EventBus>,
    repos: &Repositories,
    identity: Arc<dyn IdentityProvider>,
    query_ttl: Duration,
) -> Mediator {
    let redirects = Arc::new(IdentityRedirectHandler::new(identity));

    Mediator::builder(cache.clone(), query_ttl)
        .cached_query::<FetchArticle, _>(FetchArticleHandler::new(repos.articles.clone()))
        .cached_query::<FetchArticles, _>(FetchArticlesHandler::new(repos.articles.clone()))
        .cached_query::<FetchComments, _>(FetchCommentsHandler::new(repos.articles.clone()))
        .invalidating_command::<AddComment, _>(AddCommentHandler::new(cache.clone(), bus.clone()))
        .cached_query::<FetchSubscribersCount, _>(FetchSubscribersCountHandler::new(
            repos.subscribers.clone(),
        ))
        .invalidating_command::<SubscribeToNewsletter, _>(SubscribeToNewsletterHandler::new(
            cache.clone(),
            bus.clone(),
            repos.subscribers.clone(),
        ))
        .handler::<UserLogin, _>(redirects.clone())
        .handler::<UserSignOut, _>(redirects)
        .handler::<CompleteLogin, _>(CompleteLoginHandler::new(bus.clone()))
        .handler::<GetUserContext, _>(GetUserContextHandler)
        .build()
}
