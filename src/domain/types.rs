//! Shared domain enumerations.

use serde::{Deserialize, Serialize};

/// Identity provider family a user authenticated through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Local,
    Microsoft,
    Google,
}

impl AccountType {
    /// Resolve the account type from the `idp` claim issued by the identity provider.
    ///
    /// A missing or blank claim means the account lives in the local directory.
    /// Unknown providers yield `None`.
    pub fn from_identity_provider(claim: Option<&str>) -> Option<Self> {
        match claim.map(str::trim) {
            None | Some("") => Some(AccountType::Local),
            Some("live.com") => Some(AccountType::Microsoft),
            Some("google.com") => Some(AccountType::Google),
            Some(_) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Local => "local",
            AccountType::Microsoft => "microsoft",
            AccountType::Google => "google",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_provider_claims_map_to_account_types() {
        assert_eq!(
            AccountType::from_identity_provider(None),
            Some(AccountType::Local)
        );
        assert_eq!(
            AccountType::from_identity_provider(Some("  ")),
            Some(AccountType::Local)
        );
        assert_eq!(
            AccountType::from_identity_provider(Some("live.com")),
            Some(AccountType::Microsoft)
        );
        assert_eq!(
            AccountType::from_identity_provider(Some("google.com")),
            Some(AccountType::Google)
        );
        assert_eq!(AccountType::from_identity_provider(Some("github.com")), None);
    }
}
