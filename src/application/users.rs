//! Login, sign-out and the current user's context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::application::context::RequestContext;
use crate::application::error::AppError;
use crate::application::identity::{IdentityProvider, Redirect};
use crate::application::pipeline::{Request, RequestHandler};
use crate::application::repos::{CreateUserParams, UsersRepo};
use crate::domain::entities::{anonymous_name, require_external_id, require_login_emails};
use crate::domain::types::AccountType;
use crate::events::{EventBus, EventHandler, HandlerError, UserLoggedIn};

const DEFAULT_RETURN_URL: &str = "/";

fn return_url_or_default(return_url: Option<&str>) -> &str {
    match return_url.map(str::trim) {
        Some(url) if !url.is_empty() => url,
        _ => DEFAULT_RETURN_URL,
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserLogin {
    pub return_url: Option<String>,
}

impl Request for UserLogin {
    type Response = Redirect;
}

#[derive(Debug, Clone, Default)]
pub struct UserSignOut {
    pub return_url: Option<String>,
}

impl Request for UserSignOut {
    type Response = Redirect;
}

/// Handles both redirect flows against the configured identity provider.
pub struct IdentityRedirectHandler {
    identity: Arc<dyn IdentityProvider>,
}

impl IdentityRedirectHandler {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl RequestHandler<UserLogin> for IdentityRedirectHandler {
    async fn handle(&self, request: UserLogin, ctx: &RequestContext) -> Result<Redirect, AppError> {
        let return_url = return_url_or_default(request.return_url.as_deref());
        Ok(self.identity.challenge(ctx, return_url).await?)
    }
}

#[async_trait]
impl RequestHandler<UserSignOut> for IdentityRedirectHandler {
    async fn handle(
        &self,
        request: UserSignOut,
        ctx: &RequestContext,
    ) -> Result<Redirect, AppError> {
        let return_url = return_url_or_default(request.return_url.as_deref());
        Ok(self.identity.sign_out(ctx, return_url).await?)
    }
}

/// Validated claims returned by the identity provider callback.
#[derive(Debug, Clone)]
pub struct CompleteLogin {
    pub external_id: String,
    pub emails: Vec<String>,
    /// Raw `idp` claim; blank for local accounts.
    pub identity_provider: Option<String>,
}

impl Request for CompleteLogin {
    type Response = ();
}

pub struct CompleteLoginHandler {
    bus: Arc<EventBus>,
}

impl CompleteLoginHandler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl RequestHandler<CompleteLogin> for CompleteLoginHandler {
    async fn handle(&self, request: CompleteLogin, _ctx: &RequestContext) -> Result<(), AppError> {
        let account_type = AccountType::from_identity_provider(request.identity_provider.as_deref())
            .ok_or_else(|| {
                AppError::validation(
                    "CompleteLogin.IdentityProvider",
                    format!(
                        "unknown identity provider `{}`",
                        request.identity_provider.as_deref().unwrap_or_default()
                    ),
                )
            })?;
        let external_id = require_external_id(&request.external_id)
            .map_err(|err| AppError::validation("CompleteLogin.ExternalId", err.to_string()))?;
        let emails = require_login_emails(&request.emails)
            .map_err(|err| AppError::validation("CompleteLogin.Emails", err.to_string()))?;

        self.bus.publish(UserLoggedIn {
            emails,
            external_id,
            account_type,
        })?;
        Ok(())
    }
}

/// Creates the user on first login, otherwise merges the new identity into it.
pub struct SyncUserLogin {
    users: Arc<dyn UsersRepo>,
}

impl SyncUserLogin {
    pub fn new(users: Arc<dyn UsersRepo>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl EventHandler<UserLoggedIn> for SyncUserLogin {
    fn name(&self) -> &'static str {
        "sync_user_login"
    }

    async fn handle(&self, event: &UserLoggedIn) -> Result<(), HandlerError> {
        match self.users.find_user_by_emails(&event.emails).await? {
            None => {
                let user = self
                    .users
                    .create_user(CreateUserParams {
                        emails: event.emails.clone(),
                        account_type: event.account_type,
                        external_id: event.external_id.clone(),
                    })
                    .await?;
                info!(
                    user_id = user.id,
                    account_type = event.account_type.as_str(),
                    "User created on first login"
                );
            }
            Some(mut user) => {
                user.apply_login(event.account_type, &event.external_id, &event.emails)?;
                self.users.update_user(&user).await?;
                info!(
                    user_id = user.id,
                    account_type = event.account_type.as_str(),
                    "User login synchronised"
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetUserContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserContext {
    pub external_id: String,
    pub display_name: String,
    pub emails: Vec<String>,
    /// Pseudonymous label shown next to the user's comments.
    pub anonymous_name: String,
}

impl Request for GetUserContext {
    type Response = UserContext;
}

pub struct GetUserContextHandler;

#[async_trait]
impl RequestHandler<GetUserContext> for GetUserContextHandler {
    async fn handle(
        &self,
        _request: GetUserContext,
        ctx: &RequestContext,
    ) -> Result<UserContext, AppError> {
        let actor = ctx.actor().ok_or_else(|| {
            AppError::unauthorized("GetUserContext.Unauthorized", "User is not authenticated")
        })?;
        if actor.external_id.trim().is_empty() {
            return Err(AppError::unauthorized(
                "GetUserContext.Unauthorized.ExternalId",
                "External id cannot be empty, user is not authenticated",
            ));
        }

        Ok(UserContext {
            external_id: actor.external_id.clone(),
            display_name: actor.display_name.clone(),
            emails: actor.emails.clone(),
            anonymous_name: anonymous_name(&actor.emails),
        })
    }
}
