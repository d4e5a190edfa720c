//! Article reads and the comment flow.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::context::RequestContext;
use crate::application::cooldown::{is_cooling_down, start_cooldown};
use crate::application::error::AppError;
use crate::application::pipeline::{CachedQuery, InvalidateCacheCommand, Request, RequestHandler};
use crate::application::repos::{
    ArticlesRepo, CommentWithAuthor, CreateCommentParams, PageRequest, UsersRepo,
};
use crate::cache::{CacheKey, CacheService};
use crate::domain::entities::{ArticleRecord, anonymous_name, require_comment_content};
use crate::events::{CommentAdded, EventBus, EventHandler, HandlerError};

/// Page sizes the comment views request. Invalidation covers all of them.
pub const COMMENT_PAGE_SIZES: &[u32] = &[5, 10, 20];
pub const MAX_PAGE_SIZE: u32 = 100;
/// Upper bound on the pages a single comment invalidates.
const MAX_INVALIDATED_PAGE: u32 = 1_000;

const ADD_COMMENT: &str = "AddComment";

fn require_page_size(code: &'static str, page_size: u32) -> Result<(), AppError> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(AppError::validation(
            code,
            format!("page size must be between 1 and {MAX_PAGE_SIZE}"),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleView {
    pub id: i64,
    pub title: String,
    pub image_url: String,
    pub markdown_content: String,
    pub author: String,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

impl From<ArticleRecord> for ArticleView {
    fn from(record: ArticleRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            image_url: record.image_url,
            markdown_content: record.markdown_content,
            author: record.author,
            published_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: i64,
    pub title: String,
    pub markdown_content: String,
    pub articles_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentView {
    pub comment_id: i64,
    pub content: String,
    pub user_id: i64,
    pub emails: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub comments_count: u64,
    pub display_name: String,
}

impl CommentView {
    fn from_row(row: CommentWithAuthor, comments_count: u64) -> Self {
        let display_name = anonymous_name(&row.author_emails);
        Self {
            comment_id: row.comment.id,
            content: row.comment.content,
            user_id: row.comment.user_id,
            emails: row.author_emails,
            created_at: row.comment.created_at,
            comments_count,
            display_name,
        }
    }
}

// ============================================================================
// FetchArticle
// ============================================================================

#[derive(Debug, Clone)]
pub struct FetchArticle {
    pub id: i64,
}

impl Request for FetchArticle {
    type Response = Option<ArticleView>;
}

impl CachedQuery for FetchArticle {
    fn cache_key(&self) -> String {
        CacheKey::new("FetchArticle").with(self.id).into_string()
    }
}

pub struct FetchArticleHandler {
    articles: Arc<dyn ArticlesRepo>,
}

impl FetchArticleHandler {
    pub fn new(articles: Arc<dyn ArticlesRepo>) -> Self {
        Self { articles }
    }
}

#[async_trait]
impl RequestHandler<FetchArticle> for FetchArticleHandler {
    async fn handle(
        &self,
        request: FetchArticle,
        _ctx: &RequestContext,
    ) -> Result<Option<ArticleView>, AppError> {
        let article = self.articles.find_article(request.id).await?;
        Ok(article.map(ArticleView::from))
    }
}

// ============================================================================
// FetchArticles
// ============================================================================

#[derive(Debug, Clone)]
pub struct FetchArticles {
    pub page: u32,
    pub page_size: u32,
}

impl Request for FetchArticles {
    type Response = Vec<ArticleSummary>;
}

impl CachedQuery for FetchArticles {
    fn cache_key(&self) -> String {
        CacheKey::new("FetchArticles")
            .with(self.page)
            .with(self.page_size)
            .into_string()
    }
}

pub struct FetchArticlesHandler {
    articles: Arc<dyn ArticlesRepo>,
}

impl FetchArticlesHandler {
    pub fn new(articles: Arc<dyn ArticlesRepo>) -> Self {
        Self { articles }
    }
}

#[async_trait]
impl RequestHandler<FetchArticles> for FetchArticlesHandler {
    async fn handle(
        &self,
        request: FetchArticles,
        _ctx: &RequestContext,
    ) -> Result<Vec<ArticleSummary>, AppError> {
        require_page_size("FetchArticles.PageSize", request.page_size)?;

        let page = PageRequest::new(request.page, request.page_size);
        let records = self.articles.list_articles(page).await?;
        let articles_count = self.articles.count_articles().await?;

        Ok(records
            .into_iter()
            .map(|record| ArticleSummary {
                id: record.id,
                title: record.title,
                markdown_content: record.markdown_content,
                articles_count,
            })
            .collect())
    }
}

// ============================================================================
// FetchComments
// ============================================================================

#[derive(Debug, Clone)]
pub struct FetchComments {
    pub article_id: i64,
    pub page: u32,
    pub page_size: u32,
}

impl Request for FetchComments {
    type Response = Vec<CommentView>;
}

impl CachedQuery for FetchComments {
    fn cache_key(&self) -> String {
        comments_key(self.article_id, self.page, self.page_size)
    }
}

/// Comment pages `0..=max_page + 1` of an article for `page_size` and every
/// size in [`COMMENT_PAGE_SIZES`].
fn comment_page_keys(article_id: i64, max_page: u32, page_size: u32) -> Vec<String> {
    let sizes: BTreeSet<u32> = COMMENT_PAGE_SIZES
        .iter()
        .copied()
        .chain(std::iter::once(page_size))
        .collect();
    let last_page = max_page.min(MAX_INVALIDATED_PAGE) + 1;

    sizes
        .into_iter()
        .flat_map(|size| (0..=last_page).map(move |page| comments_key(article_id, page, size)))
        .collect()
}

fn comments_key(article_id: i64, page: u32, page_size: u32) -> String {
    CacheKey::new("FetchComments")
        .with(article_id)
        .with(page)
        .with(page_size)
        .into_string()
}

pub struct FetchCommentsHandler {
    articles: Arc<dyn ArticlesRepo>,
}

impl FetchCommentsHandler {
    pub fn new(articles: Arc<dyn ArticlesRepo>) -> Self {
        Self { articles }
    }
}

#[async_trait]
impl RequestHandler<FetchComments> for FetchCommentsHandler {
    async fn handle(
        &self,
        request: FetchComments,
        _ctx: &RequestContext,
    ) -> Result<Vec<CommentView>, AppError> {
        require_page_size("FetchComments.PageSize", request.page_size)?;

        let page = PageRequest::new(request.page, request.page_size);
        let listing = self.articles.list_comments(request.article_id, page).await?;
        let total = listing.total;

        Ok(listing
            .comments
            .into_iter()
            .map(|row| CommentView::from_row(row, total))
            .collect())
    }
}

// ============================================================================
// AddComment
// ============================================================================

#[derive(Debug, Clone)]
pub struct AddComment {
    pub article_id: i64,
    pub content: String,
    /// Highest comment page the caller has seen.
    pub max_page: u32,
    pub page_size: u32,
}

impl Request for AddComment {
    type Response = ();
}

impl InvalidateCacheCommand for AddComment {
    /// Pages `0..=max_page + 1` for the caller's page size and every size in
    /// [`COMMENT_PAGE_SIZES`].
    fn invalidate_keys(&self) -> Vec<String> {
        comment_page_keys(self.article_id, self.max_page, self.page_size)
    }
}

pub struct AddCommentHandler {
    cache: CacheService,
    bus: Arc<EventBus>,
}

impl AddCommentHandler {
    pub fn new(cache: CacheService, bus: Arc<EventBus>) -> Self {
        Self { cache, bus }
    }
}

#[async_trait]
impl RequestHandler<AddComment> for AddCommentHandler {
    async fn handle(&self, request: AddComment, ctx: &RequestContext) -> Result<(), AppError> {
        let actor = ctx.actor().ok_or_else(|| {
            AppError::unauthorized(
                "AddComment.Unauthorized",
                "User is not authenticated, cannot add a comment",
            )
        })?;
        let external_id = actor.external_id.trim();
        if external_id.is_empty() {
            return Err(AppError::unauthorized(
                "AddComment.Unauthorized.ExternalId",
                "User has no external id, cannot add a comment",
            ));
        }

        let content = require_comment_content(&request.content)
            .map_err(|err| AppError::validation("AddComment.Content", err.to_string()))?;

        if is_cooling_down(&self.cache, ADD_COMMENT, external_id).await? {
            return Err(AppError::validation(
                "AddComment.Cooldown",
                "Cannot process request, cooldown is active",
            ));
        }

        self.bus.publish(CommentAdded {
            article_id: request.article_id,
            content,
            external_id: external_id.to_string(),
            max_page: request.max_page,
            page_size: request.page_size,
        })?;
        Ok(())
    }
}

/// Blocks the author from commenting again for the configured window.
pub struct ActivateCommentCooldown {
    cache: CacheService,
    duration: Duration,
}

impl ActivateCommentCooldown {
    pub fn new(cache: CacheService, duration: Duration) -> Self {
        Self { cache, duration }
    }
}

#[async_trait]
impl EventHandler<CommentAdded> for ActivateCommentCooldown {
    fn name(&self) -> &'static str {
        "activate_comment_cooldown"
    }

    async fn handle(&self, event: &CommentAdded) -> Result<(), HandlerError> {
        start_cooldown(&self.cache, ADD_COMMENT, &event.external_id, self.duration).await?;
        Ok(())
    }
}

/// Persists the comment. Unknown authors or articles are skipped.
pub struct CreateComment {
    articles: Arc<dyn ArticlesRepo>,
    users: Arc<dyn UsersRepo>,
    cache: CacheService,
}

impl CreateComment {
    pub fn new(
        articles: Arc<dyn ArticlesRepo>,
        users: Arc<dyn UsersRepo>,
        cache: CacheService,
    ) -> Self {
        Self {
            articles,
            users,
            cache,
        }
    }
}

#[async_trait]
impl EventHandler<CommentAdded> for CreateComment {
    fn name(&self) -> &'static str {
        "create_comment"
    }

    async fn handle(&self, event: &CommentAdded) -> Result<(), HandlerError> {
        let Some(user) = self
            .users
            .find_user_by_external_id(&event.external_id)
            .await?
        else {
            warn!(
                external_id = %event.external_id,
                article_id = event.article_id,
                "Comment dropped, author not registered"
            );
            return Ok(());
        };

        if self.articles.find_article(event.article_id).await?.is_none() {
            warn!(article_id = event.article_id, "Comment dropped, article missing");
            return Ok(());
        }

        let comment = self
            .articles
            .create_comment(CreateCommentParams {
                article_id: event.article_id,
                user_id: user.id,
                content: event.content.clone(),
            })
            .await?;
        info!(
            comment_id = comment.id,
            article_id = comment.article_id,
            user_id = comment.user_id,
            "Comment created"
        );

        // Pages read between the command and this point were cached without it.
        self.cache
            .remove(&comment_page_keys(
                event.article_id,
                event.max_page,
                event.page_size,
            ))
            .await?;
        Ok(())
    }
}
