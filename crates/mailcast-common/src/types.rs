//! Common types for Mailcast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for accounts owning senders and campaigns
pub type AccountId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for senders
pub type SenderId = Uuid;

/// Unique identifier for recipients
pub type RecipientId = Uuid;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (local, domain) = s.rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

/// Format a display-name mailbox, e.g. `Acme News <news@acme.test>`
pub fn format_mailbox(name: &str, email: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        email.to_string()
    } else {
        format!("{} <{}>", name, email)
    }
}
