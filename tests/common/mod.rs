#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use newsletter::application::app::{Application, ApplicationConfig, Repositories};
use newsletter::application::context::{ActorInfo, RequestContext};
use newsletter::cache::MemoryCacheStore;
use newsletter::config::IdentitySettings;
use newsletter::infra::identity::OidcRedirectProvider;
use newsletter::infra::memory::MemoryRepositories;
use url::Url;

pub struct Harness {
    pub app: Application,
    pub repos: Arc<MemoryRepositories>,
}

pub fn identity_settings() -> IdentitySettings {
    IdentitySettings {
        authority: Some(Url::parse("https://id.example.com/tenant").expect("authority url")),
        client_id: Some("newsletter-web".to_string()),
        callback_path: "/auth/callback".to_string(),
        post_logout_redirect: "/".to_string(),
    }
}

pub fn harness() -> Harness {
    let config = ApplicationConfig::default();
    let store = Arc::new(MemoryCacheStore::new(&config.cache));
    let repos = Arc::new(MemoryRepositories::seeded());
    let app = Application::new(
        config,
        store,
        Repositories {
            articles: repos.clone(),
            subscribers: repos.clone(),
            users: repos.clone(),
        },
        Arc::new(OidcRedirectProvider::new(&identity_settings())),
    );
    Harness { app, repos }
}

pub fn caller(address: &str) -> RequestContext {
    RequestContext::anonymous().with_caller_address(address)
}

pub fn signed_in(external_id: &str, email: &str) -> RequestContext {
    RequestContext::anonymous().with_actor(ActorInfo {
        external_id: external_id.to_string(),
        display_name: "Ada Lovelace".to_string(),
        emails: vec![email.to_string()],
    })
}

pub const SUBSCRIBE_COOLDOWN: Duration = Duration::from_secs(5 * 60 * 60);
pub const COMMENT_COOLDOWN: Duration = Duration::from_secs(30);
