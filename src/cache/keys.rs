//! Cache key construction.
//!
//! Keys take the form `QueryName:param1:param2`. Parameters are escaped so a
//! `:` inside a value cannot shift the remaining segments and alias another
//! query.

use std::fmt;

/// Namespace shared by every cooldown flag.
pub const COOLDOWN_NAMESPACE: &str = "Cooldown";

/// Deterministic composite key built from a query name and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    rendered: String,
}

impl CacheKey {
    pub fn new(name: &str) -> Self {
        Self {
            rendered: escape(name),
        }
    }

    /// Append one parameter segment.
    pub fn with(mut self, part: impl fmt::Display) -> Self {
        self.rendered.push(':');
        self.rendered.push_str(&escape(&part.to_string()));
        self
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn into_string(self) -> String {
        self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.rendered
    }
}

/// Key of the cooldown flag that blocks `actor` from repeating `operation`.
pub fn cooldown_key(operation: &str, actor: &str) -> String {
    CacheKey::new(COOLDOWN_NAMESPACE)
        .with(operation)
        .with(actor)
        .into_string()
}

fn escape(raw: &str) -> String {
    if !raw.contains(['%', ':']) {
        return raw.to_string();
    }

    let mut escaped = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_name_and_parts_in_order() {
        let key = CacheKey::new("FetchComments").with(42).with(1).with(10);
        assert_eq!(key.as_str(), "FetchComments:42:1:10");
        assert_eq!(key.to_string(), "FetchComments:42:1:10");
    }

    #[test]
    fn bare_name_has_no_separator() {
        assert_eq!(
            CacheKey::new("FetchSubscribersCount").into_string(),
            "FetchSubscribersCount"
        );
    }

    #[test]
    fn separators_inside_parts_cannot_alias() {
        let joined = CacheKey::new("Q").with("a:b").with("c");
        let split = CacheKey::new("Q").with("a").with("b:c");
        assert_ne!(joined, split);
        assert_eq!(joined.as_str(), "Q:a%3Ab:c");
    }

    #[test]
    fn escape_marker_is_itself_escaped() {
        let literal = CacheKey::new("Q").with("%3A");
        let colon = CacheKey::new("Q").with(":");
        assert_ne!(literal, colon);
        assert_eq!(literal.as_str(), "Q:%253A");
    }

    #[test]
    fn cooldown_keys_follow_one_scheme() {
        assert_eq!(
            cooldown_key("AddComment", "user-1"),
            "Cooldown:AddComment:user-1"
        );
        assert_eq!(
            cooldown_key("SubscribeToNewsletter", "::1"),
            "Cooldown:SubscribeToNewsletter:%3A%3A1"
        );
    }
}
