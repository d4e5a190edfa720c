//! Cache layer.
//!
//! - [`CacheStore`]: raw string key/value backend with sliding and absolute expiry.
//! - [`CacheService`]: typed facade used by the request pipeline and by the
//!   event handlers that set cooldown flags.
//! - [`CacheKey`]: deterministic `QueryName:param1:param2` keys.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! max_entries = 10000
//! query_ttl_seconds = 2592000
//! ```

mod config;
pub mod keys;
pub(crate) mod lock;
mod service;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheKey, cooldown_key};
pub use service::CacheService;
pub use store::{CacheError, CacheStore, EntryOptions, MemoryCacheStore};
