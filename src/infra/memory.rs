//! Process-local repositories backing the server binary and the test suites.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use time::{OffsetDateTime, macros::datetime};
use tracing::debug;

use crate::application::repos::{
    ArticlesRepo, CommentPage, CommentWithAuthor, CreateCommentParams, CreateUserParams,
    PageRequest, RepoError, SubscribersRepo, UsersRepo,
};
use crate::cache::lock::{mutex_lock, rw_read, rw_write};
use crate::domain::entities::{ArticleRecord, CommentRecord, SubscriberRecord, UserRecord};
use crate::domain::types::AccountType;

const SOURCE: &str = "newsletter::infra::memory";
const SUBSCRIBER_EMAIL_CONSTRAINT: &str = "subscribers_email_key";

#[derive(Debug, Default)]
struct Tables {
    articles: Vec<ArticleRecord>,
    comments: Vec<CommentRecord>,
    subscribers: Vec<SubscriberRecord>,
    users: Vec<UserRecord>,
    next_comment_id: i64,
    next_subscriber_id: i64,
    next_user_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// All three repositories over one set of in-memory tables.
///
/// Every trait method bumps a per-operation counter so callers can observe
/// whether a cached query reached the store.
#[derive(Debug, Default)]
pub struct MemoryRepositories {
    tables: RwLock<Tables>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repositories pre-populated with a handful of published articles.
    pub fn seeded() -> Self {
        let repos = Self::new();
        repos.insert_article(
            "Welcome to the newsletter",
            "/images/welcome.png",
            "# Welcome\n\nThe first issue of the newsletter.",
            "Editorial team",
            datetime!(2024-01-08 09:00 UTC),
        );
        repos.insert_article(
            "Caching read models",
            "/images/caching.png",
            "Read models are cached until a write invalidates them.",
            "Editorial team",
            datetime!(2024-02-12 09:00 UTC),
        );
        repos.insert_article(
            "Events after the response",
            "/images/events.png",
            "Side effects run on a background dispatcher.",
            "Editorial team",
            datetime!(2024-03-18 09:00 UTC),
        );
        repos
    }

    pub fn insert_article(
        &self,
        title: &str,
        image_url: &str,
        markdown_content: &str,
        author: &str,
        created_at: OffsetDateTime,
    ) -> ArticleRecord {
        let mut tables = rw_write(&self.tables, SOURCE, "insert_article");
        let article = ArticleRecord {
            id: tables.articles.len() as i64 + 1,
            title: title.to_string(),
            image_url: image_url.to_string(),
            markdown_content: markdown_content.to_string(),
            author: author.to_string(),
            created_at,
        };
        tables.articles.push(article.clone());
        article
    }

    /// Number of times `operation` was invoked through a repository trait.
    pub fn calls(&self, operation: &str) -> usize {
        mutex_lock(&self.calls, SOURCE, "calls")
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn comments_of(&self, article_id: i64) -> Vec<CommentRecord> {
        rw_read(&self.tables, SOURCE, "comments_of")
            .comments
            .iter()
            .filter(|comment| comment.article_id == article_id)
            .cloned()
            .collect()
    }

    pub fn users(&self) -> Vec<UserRecord> {
        rw_read(&self.tables, SOURCE, "users").users.clone()
    }

    fn record_call(&self, operation: &'static str) {
        *mutex_lock(&self.calls, SOURCE, "record_call")
            .entry(operation)
            .or_default() += 1;
        debug!(operation, "repository call");
    }
}

#[async_trait]
impl ArticlesRepo for MemoryRepositories {
    async fn find_article(&self, id: i64) -> Result<Option<ArticleRecord>, RepoError> {
        self.record_call("find_article");
        let tables = rw_read(&self.tables, SOURCE, "find_article");
        Ok(tables.articles.iter().find(|a| a.id == id).cloned())
    }

    async fn list_articles(&self, page: PageRequest) -> Result<Vec<ArticleRecord>, RepoError> {
        self.record_call("list_articles");
        let tables = rw_read(&self.tables, SOURCE, "list_articles");
        let mut articles = tables.articles.clone();
        articles.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(articles
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .collect())
    }

    async fn count_articles(&self) -> Result<u64, RepoError> {
        self.record_call("count_articles");
        Ok(rw_read(&self.tables, SOURCE, "count_articles").articles.len() as u64)
    }

    async fn list_comments(
        &self,
        article_id: i64,
        page: PageRequest,
    ) -> Result<CommentPage, RepoError> {
        self.record_call("list_comments");
        let tables = rw_read(&self.tables, SOURCE, "list_comments");

        let mut comments: Vec<&CommentRecord> = tables
            .comments
            .iter()
            .filter(|comment| comment.article_id == article_id)
            .collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = comments.len() as u64;

        let comments = comments
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .map(|comment| CommentWithAuthor {
                comment: comment.clone(),
                author_emails: tables
                    .users
                    .iter()
                    .find(|user| user.id == comment.user_id)
                    .map(|user| user.emails.clone())
                    .unwrap_or_default(),
            })
            .collect();

        Ok(CommentPage { comments, total })
    }

    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        self.record_call("create_comment");
        let mut tables = rw_write(&self.tables, SOURCE, "create_comment");
        if !tables.articles.iter().any(|a| a.id == params.article_id) {
            return Err(RepoError::NotFound);
        }

        let comment = CommentRecord {
            id: next_id(&mut tables.next_comment_id),
            article_id: params.article_id,
            user_id: params.user_id,
            content: params.content,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.comments.push(comment.clone());
        Ok(comment)
    }
}

#[async_trait]
impl SubscribersRepo for MemoryRepositories {
    async fn find_subscriber_by_email(
        &self,
        email: &str,
    ) -> Result<Option<SubscriberRecord>, RepoError> {
        self.record_call("find_subscriber_by_email");
        let tables = rw_read(&self.tables, SOURCE, "find_subscriber_by_email");
        Ok(tables
            .subscribers
            .iter()
            .find(|subscriber| subscriber.email == email)
            .cloned())
    }

    async fn create_subscriber(&self, email: &str) -> Result<SubscriberRecord, RepoError> {
        self.record_call("create_subscriber");
        let mut tables = rw_write(&self.tables, SOURCE, "create_subscriber");
        if tables.subscribers.iter().any(|s| s.email == email) {
            return Err(RepoError::Duplicate {
                constraint: SUBSCRIBER_EMAIL_CONSTRAINT.to_string(),
            });
        }

        let subscriber = SubscriberRecord {
            id: next_id(&mut tables.next_subscriber_id),
            email: email.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        tables.subscribers.push(subscriber.clone());
        Ok(subscriber)
    }

    async fn count_subscribers(&self) -> Result<u64, RepoError> {
        self.record_call("count_subscribers");
        Ok(rw_read(&self.tables, SOURCE, "count_subscribers")
            .subscribers
            .len() as u64)
    }
}

#[async_trait]
impl UsersRepo for MemoryRepositories {
    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<UserRecord>, RepoError> {
        self.record_call("find_user_by_external_id");
        let tables = rw_read(&self.tables, SOURCE, "find_user_by_external_id");
        Ok(tables
            .users
            .iter()
            .find(|user| user.has_external_id(external_id))
            .cloned())
    }

    async fn find_user_by_emails(
        &self,
        emails: &[String],
    ) -> Result<Option<UserRecord>, RepoError> {
        self.record_call("find_user_by_emails");
        let tables = rw_read(&self.tables, SOURCE, "find_user_by_emails");
        Ok(tables
            .users
            .iter()
            .find(|user| user.has_any_email(emails))
            .cloned())
    }

    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError> {
        self.record_call("create_user");
        let mut tables = rw_write(&self.tables, SOURCE, "create_user");
        let now = OffsetDateTime::now_utc();
        let external_id = Some(params.external_id);
        let (local_id, microsoft_id, google_id) = match params.account_type {
            AccountType::Local => (external_id, None, None),
            AccountType::Microsoft => (None, external_id, None),
            AccountType::Google => (None, None, external_id),
        };

        let user = UserRecord {
            id: next_id(&mut tables.next_user_id),
            emails: params.emails,
            local_id,
            microsoft_id,
            google_id,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: &UserRecord) -> Result<(), RepoError> {
        self.record_call("update_user");
        let mut tables = rw_write(&self.tables, SOURCE, "update_user");
        let stored = tables
            .users
            .iter_mut()
            .find(|stored| stored.id == user.id)
            .ok_or(RepoError::NotFound)?;
        *stored = user.clone();
        Ok(())
    }
}
