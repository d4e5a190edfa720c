//! Identity provider capability used by the login and sign-out flows.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::application::context::RequestContext;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no active request context for the identity flow")]
    NoRequestContext,
    #[error("return url `{0}` must be a local path")]
    InvalidReturnUrl(String),
    #[error("identity provider is misconfigured: {0}")]
    Configuration(String),
}

/// Where the caller should be sent next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub location: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Start an interactive login that returns to `return_url` afterwards.
    async fn challenge(
        &self,
        ctx: &RequestContext,
        return_url: &str,
    ) -> Result<Redirect, IdentityError>;

    /// End the caller's session at the provider, then return to `return_url`.
    async fn sign_out(&self, ctx: &RequestContext, return_url: &str)
    -> Result<Redirect, IdentityError>;
}

/// Accept only same-site absolute paths such as `/articles/3`.
pub fn require_local_return_url(raw: &str) -> Result<&str, IdentityError> {
    let trimmed = raw.trim();
    let local = trimmed.starts_with('/') && !trimmed.starts_with("//") && !trimmed.contains('\\');
    if local {
        Ok(trimmed)
    } else {
        Err(IdentityError::InvalidReturnUrl(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_local_paths_are_accepted() {
        assert_eq!(require_local_return_url(" /articles/1 ").ok(), Some("/articles/1"));
        for raw in ["", "https://evil.test", "//evil.test", "/\\evil", "articles"] {
            assert!(require_local_return_url(raw).is_err(), "{raw:?}");
        }
    }
}
