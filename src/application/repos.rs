//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{ArticleRecord, CommentRecord, SubscriberRecord, UserRecord};
use crate::domain::types::AccountType;
use crate::events::HandlerError;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<RepoError> for HandlerError {
    fn from(err: RepoError) -> Self {
        HandlerError::from_source("repository", err)
    }
}

/// One page of a listing. Pages are 1-based; page 0 reads as page 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) as usize * self.page_size as usize
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentWithAuthor {
    pub comment: CommentRecord,
    pub author_emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentPage {
    pub comments: Vec<CommentWithAuthor>,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct CreateCommentParams {
    pub article_id: i64,
    pub user_id: i64,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub emails: Vec<String>,
    pub account_type: AccountType,
    pub external_id: String,
}

#[async_trait]
pub trait ArticlesRepo: Send + Sync {
    async fn find_article(&self, id: i64) -> Result<Option<ArticleRecord>, RepoError>;

    async fn list_articles(&self, page: PageRequest) -> Result<Vec<ArticleRecord>, RepoError>;

    async fn count_articles(&self) -> Result<u64, RepoError>;

    /// Comments of one article, newest first, joined with their author's emails.
    async fn list_comments(
        &self,
        article_id: i64,
        page: PageRequest,
    ) -> Result<CommentPage, RepoError>;

    async fn create_comment(&self, params: CreateCommentParams)
    -> Result<CommentRecord, RepoError>;
}

#[async_trait]
pub trait SubscribersRepo: Send + Sync {
    async fn find_subscriber_by_email(
        &self,
        email: &str,
    ) -> Result<Option<SubscriberRecord>, RepoError>;

    /// Fails with [`RepoError::Duplicate`] when the email is already subscribed.
    async fn create_subscriber(&self, email: &str) -> Result<SubscriberRecord, RepoError>;

    async fn count_subscribers(&self) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<UserRecord>, RepoError>;

    /// First user owning any of `emails`.
    async fn find_user_by_emails(&self, emails: &[String])
    -> Result<Option<UserRecord>, RepoError>;

    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError>;

    async fn update_user(&self, user: &UserRecord) -> Result<(), RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_skips_previous_pages() {
        assert_eq!(PageRequest::new(1, 10).offset(), 0);
        assert_eq!(PageRequest::new(3, 10).offset(), 20);
        assert_eq!(PageRequest::new(0, 10).offset(), 0);
    }
}
