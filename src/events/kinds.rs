//! Domain events published by commands and consumed by the dispatcher.

use std::fmt;

use serde::Serialize;

use crate::domain::types::AccountType;

/// Discriminant used to route an event to its handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    CommentAdded,
    NewsletterSubscribed,
    UserLoggedIn,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CommentAdded => "comment_added",
            EventKind::NewsletterSubscribed => "newsletter_subscribed",
            EventKind::UserLoggedIn => "user_logged_in",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reader asked to comment on an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentAdded {
    pub article_id: i64,
    pub content: String,
    pub external_id: String,
    /// Highest comment page the author had seen, for re-invalidation.
    pub max_page: u32,
    pub page_size: u32,
}

/// A visitor asked to join the mailing list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsletterSubscribed {
    pub email: String,
    pub caller_address: Option<String>,
}

/// The identity provider returned validated claims for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserLoggedIn {
    pub emails: Vec<String>,
    pub external_id: String,
    pub account_type: AccountType,
}

/// Immutable event payload carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    CommentAdded(CommentAdded),
    NewsletterSubscribed(NewsletterSubscribed),
    UserLoggedIn(UserLoggedIn),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::CommentAdded(_) => EventKind::CommentAdded,
            DomainEvent::NewsletterSubscribed(_) => EventKind::NewsletterSubscribed,
            DomainEvent::UserLoggedIn(_) => EventKind::UserLoggedIn,
        }
    }
}

/// Ties a payload struct to its [`EventKind`] so handlers can be registered
/// against the concrete type.
pub trait DomainEventPayload: Send + Sync + 'static {
    const KIND: EventKind;

    fn from_event(event: &DomainEvent) -> Option<&Self>;
}

macro_rules! payload {
    ($ty:ident) => {
        impl DomainEventPayload for $ty {
            const KIND: EventKind = EventKind::$ty;

            fn from_event(event: &DomainEvent) -> Option<&Self> {
                match event {
                    DomainEvent::$ty(payload) => Some(payload),
                    _ => None,
                }
            }
        }

        impl From<$ty> for DomainEvent {
            fn from(payload: $ty) -> Self {
                DomainEvent::$ty(payload)
            }
        }
    };
}

payload!(CommentAdded);
payload!(NewsletterSubscribed);
payload!(UserLoggedIn);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrips_through_event() {
        let event: DomainEvent = CommentAdded {
            article_id: 4,
            content: "hi".to_string(),
            external_id: "u-1".to_string(),
            max_page: 0,
            page_size: 10,
        }
        .into();

        assert_eq!(event.kind(), EventKind::CommentAdded);
        assert_eq!(
            CommentAdded::from_event(&event).map(|c| c.article_id),
            Some(4)
        );
        assert!(NewsletterSubscribed::from_event(&event).is_none());
    }

    #[test]
    fn event_serializes_with_kind_tag() {
        let event = DomainEvent::NewsletterSubscribed(NewsletterSubscribed {
            email: "a@b.c".to_string(),
            caller_address: None,
        });
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "newsletter_subscribed");
        assert_eq!(json["email"], "a@b.c");
    }
}
