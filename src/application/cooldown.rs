//! Cooldown flags.
//!
//! A flag is a cache entry under `Cooldown:{operation}:{actor}`. Its presence
//! blocks the actor from repeating the operation until the entry expires.

use std::time::Duration;

use tracing::info;

use crate::cache::{CacheError, CacheService, cooldown_key};

const COOLDOWN_FLAG: &str = "active";
const DEFAULT_COMMENT_COOLDOWN: Duration = Duration::from_secs(30);
const DEFAULT_SUBSCRIBE_COOLDOWN: Duration = Duration::from_secs(5 * 60 * 60);

/// How long each operation stays blocked after it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub comment: Duration,
    pub subscribe: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            comment: DEFAULT_COMMENT_COOLDOWN,
            subscribe: DEFAULT_SUBSCRIBE_COOLDOWN,
        }
    }
}

impl From<&crate::config::CooldownSettings> for CooldownPolicy {
    fn from(settings: &crate::config::CooldownSettings) -> Self {
        Self {
            comment: settings.comment,
            subscribe: settings.subscribe,
        }
    }
}

pub async fn is_cooling_down(
    cache: &CacheService,
    operation: &str,
    actor: &str,
) -> Result<bool, CacheError> {
    cache.exists(&cooldown_key(operation, actor)).await
}

pub async fn start_cooldown(
    cache: &CacheService,
    operation: &str,
    actor: &str,
    duration: Duration,
) -> Result<(), CacheError> {
    let key = cooldown_key(operation, actor);
    cache.set(&key, COOLDOWN_FLAG, duration).await?;
    info!(
        cache_key = %key,
        cooldown_secs = duration.as_secs(),
        "Cooldown activated"
    );
    Ok(())
}
