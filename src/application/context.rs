//! Per-request caller information.

use serde::Serialize;

/// Authenticated actor as reported by the fronting identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorInfo {
    pub external_id: String,
    pub display_name: String,
    pub emails: Vec<String>,
}

/// Who is calling and from where. Anonymous callers have no actor.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    actor: Option<ActorInfo>,
    caller_address: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: ActorInfo) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_caller_address(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        let address = address.trim();
        self.caller_address = (!address.is_empty()).then(|| address.to_string());
        self
    }

    pub fn actor(&self) -> Option<&ActorInfo> {
        self.actor.as_ref()
    }

    pub fn caller_address(&self) -> Option<&str> {
        self.caller_address.as_deref()
    }
}
