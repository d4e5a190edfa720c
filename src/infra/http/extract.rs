use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};

use crate::application::context::{ActorInfo, RequestContext};

pub(crate) const SUBJECT_HEADER: &str = "x-auth-subject";
pub(crate) const NAME_HEADER: &str = "x-auth-name";
pub(crate) const EMAILS_HEADER: &str = "x-auth-emails";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Where the caller address comes from. Installed on the router as an
/// extension; absent means the socket peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientAddressPolicy {
    pub trust_forwarded_for: bool,
}

impl From<&crate::config::ServerSettings> for ClientAddressPolicy {
    fn from(server: &crate::config::ServerSettings) -> Self {
        Self {
            trust_forwarded_for: server.trust_forwarded_for,
        }
    }
}

/// Caller identity as asserted by the fronting authentication proxy.
#[derive(Debug, Clone)]
pub struct Caller(pub RequestContext);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let mut ctx = RequestContext::anonymous();

        if let Some(actor) = actor_from_headers(&parts.headers) {
            ctx = ctx.with_actor(actor);
        }

        if let Some(address) = caller_address(parts) {
            ctx = ctx.with_caller_address(address);
        }

        Ok(Caller(ctx))
    }
}

fn caller_address(parts: &Parts) -> Option<String> {
    let policy = parts
        .extensions
        .get::<ClientAddressPolicy>()
        .copied()
        .unwrap_or_default();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    if policy.trust_forwarded_for {
        forwarded_for(&parts.headers).or(peer)
    } else {
        peer
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn actor_from_headers(headers: &HeaderMap) -> Option<ActorInfo> {
    let external_id = header_str(headers, SUBJECT_HEADER)?;
    let emails = header_str(headers, EMAILS_HEADER)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|email| !email.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(ActorInfo {
        external_id: external_id.to_string(),
        display_name: header_str(headers, NAME_HEADER)
            .unwrap_or_default()
            .to_string(),
        emails,
    })
}

/// First hop of `x-forwarded-for`.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    header_str(headers, FORWARDED_FOR_HEADER)?
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, Request};

    use super::*;

    fn parts(policy: Option<ClientAddressPolicy>) -> Parts {
        let mut request = Request::get("/")
            .header(FORWARDED_FOR_HEADER, "1.2.3.4")
            .body(())
            .expect("request");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 20], 50_000))));
        if let Some(policy) = policy {
            request.extensions_mut().insert(policy);
        }
        request.into_parts().0
    }

    #[test]
    fn peer_address_wins_by_default() {
        assert_eq!(caller_address(&parts(None)).as_deref(), Some("198.51.100.20"));
        assert_eq!(
            caller_address(&parts(Some(ClientAddressPolicy::default()))).as_deref(),
            Some("198.51.100.20")
        );
    }

    #[test]
    fn trusted_proxy_header_is_honoured() {
        let policy = ClientAddressPolicy {
            trust_forwarded_for: true,
        };
        assert_eq!(caller_address(&parts(Some(policy))).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn actor_requires_subject_header() {
        let mut headers = HeaderMap::new();
        headers.insert(NAME_HEADER, HeaderValue::from_static("Ada"));
        assert!(actor_from_headers(&headers).is_none());

        headers.insert(SUBJECT_HEADER, HeaderValue::from_static("oid-1"));
        headers.insert(
            EMAILS_HEADER,
            HeaderValue::from_static("ada@example.com, , ada@work.example.com"),
        );
        let actor = actor_from_headers(&headers).expect("actor");
        assert_eq!(actor.external_id, "oid-1");
        assert_eq!(actor.display_name, "Ada");
        assert_eq!(actor.emails, ["ada@example.com", "ada@work.example.com"]);
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(forwarded_for(&headers).as_deref(), Some("203.0.113.7"));
        assert!(forwarded_for(&HeaderMap::new()).is_none());
    }
}
