//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::domain::{error::DomainError, types::AccountType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleRecord {
    pub id: i64,
    pub title: String,
    pub image_url: String,
    pub markdown_content: String,
    pub author: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRecord {
    pub id: i64,
    pub article_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriberRecord {
    pub id: i64,
    pub email: String,
    pub created_at: OffsetDateTime,
}

/// A registered reader. One user may be linked to several identity providers;
/// each provider contributes its own external id slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub emails: Vec<String>,
    pub local_id: Option<String>,
    pub microsoft_id: Option<String>,
    pub google_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    pub fn external_id(&self, account_type: AccountType) -> Option<&str> {
        match account_type {
            AccountType::Local => self.local_id.as_deref(),
            AccountType::Microsoft => self.microsoft_id.as_deref(),
            AccountType::Google => self.google_id.as_deref(),
        }
    }

    pub fn has_external_id(&self, external_id: &str) -> bool {
        [AccountType::Local, AccountType::Microsoft, AccountType::Google]
            .into_iter()
            .any(|account| self.external_id(account) == Some(external_id))
    }

    pub fn has_any_email(&self, emails: &[String]) -> bool {
        self.emails.iter().any(|email| emails.contains(email))
    }

    /// Merge a fresh login into the user: emails are unioned in first-seen
    /// order and the slot for `account_type` is overwritten.
    pub fn apply_login(
        &mut self,
        account_type: AccountType,
        external_id: &str,
        emails: &[String],
    ) -> Result<(), DomainError> {
        let external_id = require_external_id(external_id)?;

        for email in emails {
            if !self.emails.contains(email) {
                self.emails.push(email.clone());
            }
        }

        let slot = match account_type {
            AccountType::Local => &mut self.local_id,
            AccountType::Microsoft => &mut self.microsoft_id,
            AccountType::Google => &mut self.google_id,
        };
        *slot = Some(external_id);
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

/// Trim and lowercase an email address, rejecting values that cannot be an address.
pub fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(DomainError::validation("email", "must not be empty"));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(DomainError::validation(
            "email",
            format!("`{email}` is not an email address"),
        ));
    }

    Ok(email)
}

const ANONYMOUS_NAME_LEN: usize = 12;

/// Stable pseudonymous label for a user, derived from their email addresses.
pub fn anonymous_name(emails: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(emails.join(", ").as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(ANONYMOUS_NAME_LEN);
    digest
}

pub fn require_comment_content(raw: &str) -> Result<String, DomainError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(DomainError::validation("content", "must not be empty"));
    }
    Ok(content.to_string())
}

pub fn require_external_id(raw: &str) -> Result<String, DomainError> {
    let external_id = raw.trim();
    if external_id.is_empty() {
        return Err(DomainError::validation("external_id", "must not be empty"));
    }
    Ok(external_id.to_string())
}

/// Normalise the email claims of a login; at least one address is required.
pub fn require_login_emails(raw: &[String]) -> Result<Vec<String>, DomainError> {
    let mut emails: Vec<String> = Vec::with_capacity(raw.len());
    for candidate in raw {
        let email = normalize_email(candidate)?;
        if !emails.contains(&email) {
            emails.push(email);
        }
    }

    if emails.is_empty() {
        return Err(DomainError::validation("emails", "at least one is required"));
    }
    Ok(emails)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> UserRecord {
        UserRecord {
            id: 7,
            emails: vec!["ada@example.com".to_string()],
            local_id: None,
            microsoft_id: Some("ms-1".to_string()),
            google_id: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(
            normalize_email("  Ada@Example.COM ").expect("valid"),
            "ada@example.com"
        );
    }

    #[test]
    fn normalize_email_rejects_garbage() {
        for raw in ["", "   ", "ada", "@example.com", "ada@", "a@b@c", "a b@c.d"] {
            assert!(normalize_email(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn apply_login_merges_emails_and_sets_slot() {
        let mut user = sample_user();
        user.apply_login(
            AccountType::Google,
            "g-42",
            &["ada@example.com".to_string(), "ada@gmail.com".to_string()],
        )
        .expect("login applies");

        assert_eq!(user.emails, vec!["ada@example.com", "ada@gmail.com"]);
        assert_eq!(user.google_id.as_deref(), Some("g-42"));
        assert_eq!(user.microsoft_id.as_deref(), Some("ms-1"));
        assert!(user.has_external_id("g-42"));
        assert!(user.has_external_id("ms-1"));
        assert!(!user.has_external_id("local"));
    }

    #[test]
    fn apply_login_requires_external_id() {
        let mut user = sample_user();
        let err = user
            .apply_login(AccountType::Local, "  ", &[])
            .expect_err("blank id rejected");
        assert!(matches!(err, DomainError::Validation { field: "external_id", .. }));
    }

    #[test]
    fn anonymous_name_is_stable_and_short() {
        let emails = vec!["ada@example.com".to_string()];
        let name = anonymous_name(&emails);
        assert_eq!(name.len(), 12);
        assert_eq!(name, anonymous_name(&emails));
        assert_ne!(name, anonymous_name(&["bob@example.com".to_string()]));
    }

    #[test]
    fn login_emails_are_deduplicated() {
        let emails = require_login_emails(&[
            "A@x.io".to_string(),
            "a@x.io".to_string(),
            "b@x.io".to_string(),
        ])
        .expect("valid");
        assert_eq!(emails, vec!["a@x.io", "b@x.io"]);
        assert!(require_login_emails(&[]).is_err());
    }
}
