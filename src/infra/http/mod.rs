//! JSON surface over the application mediator.

mod extract;
mod middleware;

pub use extract::{Caller, ClientAddressPolicy};
pub use middleware::RequestId;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn,
    response::{IntoResponse, Redirect as RedirectResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::application::{
    app::Application,
    articles::{
        AddComment, ArticleSummary, ArticleView, CommentView, FetchArticle, FetchArticles,
        FetchComments,
    },
    error::AppError,
    subscribers::{FetchSubscribersCount, SubscribeToNewsletter, SubscribersCount},
    users::{CompleteLogin, GetUserContext, UserContext, UserLogin, UserSignOut},
};

use middleware::{log_responses, set_request_id};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_PAGE_SIZE: u32 = 10;

pub fn build_router(app: Application, client_address: ClientAddressPolicy) -> Router {
    Router::new()
        .route("/articles", get(list_articles))
        .route("/articles/{id}", get(article_detail))
        .route(
            "/articles/{id}/comments",
            get(list_comments).post(add_comment),
        )
        .route("/subscribers/count", get(subscribers_count))
        .route("/subscribers", post(subscribe))
        .route("/login", get(login))
        .route("/signout", get(sign_out))
        .route("/auth/callback", post(complete_login))
        .route("/me", get(current_user))
        .with_state(app)
        .layer(Extension(client_address))
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_id))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PageQuery {
    page: u32,
    page_size: u32,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReturnUrlQuery {
    return_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddCommentBody {
    content: String,
    #[serde(default)]
    max_page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
struct SubscribeBody {
    email: String,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    external_id: String,
    emails: Vec<String>,
    #[serde(default)]
    identity_provider: Option<String>,
}

async fn list_articles(
    State(app): State<Application>,
    Caller(ctx): Caller,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<ArticleSummary>>, AppError> {
    let request = FetchArticles {
        page: query.page,
        page_size: query.page_size,
    };
    Ok(Json(app.send(request, &ctx).await?))
}

async fn article_detail(
    State(app): State<Application>,
    Caller(ctx): Caller,
    Path(id): Path<i64>,
) -> Result<Json<ArticleView>, AppError> {
    app.send(FetchArticle { id }, &ctx)
        .await?
        .map(Json)
        .ok_or_else(|| {
            AppError::not_found("FetchArticle.NotFound", format!("article {id} not found"))
        })
}

async fn list_comments(
    State(app): State<Application>,
    Caller(ctx): Caller,
    Path(article_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<CommentView>>, AppError> {
    let request = FetchComments {
        article_id,
        page: query.page,
        page_size: query.page_size,
    };
    Ok(Json(app.send(request, &ctx).await?))
}

async fn add_comment(
    State(app): State<Application>,
    Caller(ctx): Caller,
    Path(article_id): Path<i64>,
    Json(body): Json<AddCommentBody>,
) -> Result<StatusCode, AppError> {
    let command = AddComment {
        article_id,
        content: body.content,
        max_page: body.max_page,
        page_size: body.page_size,
    };
    app.send(command, &ctx).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn subscribers_count(
    State(app): State<Application>,
    Caller(ctx): Caller,
) -> Result<Json<SubscribersCount>, AppError> {
    Ok(Json(app.send(FetchSubscribersCount, &ctx).await?))
}

async fn subscribe(
    State(app): State<Application>,
    Caller(ctx): Caller,
    Json(body): Json<SubscribeBody>,
) -> Result<StatusCode, AppError> {
    app.send(SubscribeToNewsletter { email: body.email }, &ctx)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn login(
    State(app): State<Application>,
    Caller(ctx): Caller,
    Query(query): Query<ReturnUrlQuery>,
) -> Result<Response, AppError> {
    let redirect = app
        .send(
            UserLogin {
                return_url: query.return_url,
            },
            &ctx,
        )
        .await?;
    Ok(RedirectResponse::to(&redirect.location).into_response())
}

async fn sign_out(
    State(app): State<Application>,
    Caller(ctx): Caller,
    Query(query): Query<ReturnUrlQuery>,
) -> Result<Response, AppError> {
    let redirect = app
        .send(
            UserSignOut {
                return_url: query.return_url,
            },
            &ctx,
        )
        .await?;
    Ok(RedirectResponse::to(&redirect.location).into_response())
}

async fn complete_login(
    State(app): State<Application>,
    Caller(ctx): Caller,
    Json(body): Json<CallbackBody>,
) -> Result<StatusCode, AppError> {
    let command = CompleteLogin {
        external_id: body.external_id,
        emails: body.emails,
        identity_provider: body.identity_provider,
    };
    app.send(command, &ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn current_user(
    State(app): State<Application>,
    Caller(ctx): Caller,
) -> Result<Json<UserContext>, AppError> {
    Ok(Json(app.send(GetUserContext, &ctx).await?))
}
