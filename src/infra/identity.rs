//! Redirect-based identity provider built from the `identity` settings.

use async_trait::async_trait;
use url::Url;

use crate::application::context::RequestContext;
use crate::application::identity::{
    IdentityError, IdentityProvider, Redirect, require_local_return_url,
};
use crate::config::IdentitySettings;

const AUTHORIZE_SEGMENT: &str = "authorize";
const LOGOUT_SEGMENT: &str = "logout";
const SCOPES: &str = "openid profile email";

/// Builds authorize and end-session URLs; the token exchange happens at the
/// fronting authentication proxy.
#[derive(Debug, Clone)]
pub struct OidcRedirectProvider {
    authority: Option<Url>,
    client_id: Option<String>,
    callback_path: String,
    post_logout_redirect: String,
}

impl OidcRedirectProvider {
    pub fn new(settings: &IdentitySettings) -> Self {
        Self {
            authority: settings.authority.clone(),
            client_id: settings.client_id.clone(),
            callback_path: settings.callback_path.clone(),
            post_logout_redirect: settings.post_logout_redirect.clone(),
        }
    }

    fn endpoint(&self, segment: &str) -> Result<Url, IdentityError> {
        let mut url = self.authority.clone().ok_or_else(|| {
            IdentityError::Configuration("identity.authority is not set".to_string())
        })?;
        if url.cannot_be_a_base() {
            return Err(IdentityError::Configuration(format!(
                "authority `{url}` cannot be a base url"
            )));
        }
        url.path_segments_mut()
            .map_err(|_| IdentityError::Configuration("authority has no path".to_string()))?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }
}

#[async_trait]
impl IdentityProvider for OidcRedirectProvider {
    async fn challenge(
        &self,
        _ctx: &RequestContext,
        return_url: &str,
    ) -> Result<Redirect, IdentityError> {
        let return_url = require_local_return_url(return_url)?;
        let client_id = self.client_id.as_deref().ok_or_else(|| {
            IdentityError::Configuration("identity.client_id is not set".to_string())
        })?;

        let mut url = self.endpoint(AUTHORIZE_SEGMENT)?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPES)
            .append_pair("redirect_uri", &self.callback_path)
            .append_pair("state", return_url);

        Ok(Redirect {
            location: url.into(),
        })
    }

    async fn sign_out(
        &self,
        _ctx: &RequestContext,
        return_url: &str,
    ) -> Result<Redirect, IdentityError> {
        let return_url = require_local_return_url(return_url)?;

        let mut url = self.endpoint(LOGOUT_SEGMENT)?;
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", &self.post_logout_redirect)
            .append_pair("state", return_url);

        Ok(Redirect {
            location: url.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(authority: Option<&str>) -> IdentitySettings {
        IdentitySettings {
            authority: authority.map(|raw| Url::parse(raw).expect("url")),
            client_id: Some("newsletter-web".to_string()),
            callback_path: "/auth/callback".to_string(),
            post_logout_redirect: "/".to_string(),
        }
    }

    #[tokio::test]
    async fn challenge_builds_authorize_url() {
        let provider = OidcRedirectProvider::new(&settings(Some("https://id.example.com/tenant/")));

        let redirect = provider
            .challenge(&RequestContext::anonymous(), "/articles/2")
            .await
            .expect("redirect");

        let url = Url::parse(&redirect.location).expect("absolute url");
        assert_eq!(url.path(), "/tenant/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".to_string(), "newsletter-web".to_string())));
        assert!(pairs.contains(&("state".to_string(), "/articles/2".to_string())));
    }

    #[tokio::test]
    async fn sign_out_builds_logout_url() {
        let provider = OidcRedirectProvider::new(&settings(Some("https://id.example.com/tenant")));

        let redirect = provider
            .sign_out(&RequestContext::anonymous(), "/")
            .await
            .expect("redirect");

        assert!(
            redirect
                .location
                .starts_with("https://id.example.com/tenant/logout?")
        );
    }

    #[tokio::test]
    async fn missing_authority_is_a_configuration_error() {
        let provider = OidcRedirectProvider::new(&settings(None));

        let err = provider
            .challenge(&RequestContext::anonymous(), "/")
            .await
            .expect_err("unconfigured");
        assert!(matches!(err, IdentityError::Configuration(_)));
    }

    #[tokio::test]
    async fn opaque_authority_is_a_configuration_error() {
        let provider = OidcRedirectProvider::new(&settings(Some("mailto:id@example.com")));

        let err = provider
            .sign_out(&RequestContext::anonymous(), "/")
            .await
            .expect_err("not a base url");
        assert!(matches!(err, IdentityError::Configuration(message) if message.contains("mailto")));
    }

    #[tokio::test]
    async fn external_return_url_is_rejected() {
        let provider = OidcRedirectProvider::new(&settings(Some("https://id.example.com")));

        let err = provider
            .challenge(&RequestContext::anonymous(), "https://evil.test/")
            .await
            .expect_err("open redirect");
        assert!(matches!(err, IdentityError::InvalidReturnUrl(_)));
    }
}
