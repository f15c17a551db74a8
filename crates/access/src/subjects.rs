//! Subject layout of the chat deployment

/// Inbound provisioning requests
pub const ACCESS_REQUEST_SUBJECT: &str = "chat.req.access";
/// Inbound revocation requests
pub const REVOKE_REQUEST_SUBJECT: &str = "chat.req.revoke";
/// Inbound registry snapshot queries
pub const SNAPSHOT_QUERY_SUBJECT: &str = "chat.req.provisioned";
/// Outbound registry snapshots
pub const PROVISIONED_UPDATES_SUBJECT: &str = "chat.req.provisioned.updates";
/// Private reply inboxes of the chat clients
pub const INBOX_WILDCARD: &str = "_INBOX.>";

pub const DEFAULT_AUDIENCE: &str = "KUBECON";
pub const DEFAULT_QUEUE_GROUP: &str = "kubecon";

/// Chat subjects scoped to one audience label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSubjects {
    audience: String,
}

impl ChatSubjects {
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
        }
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    fn scoped(&self, suffix: &str) -> String {
        format!("chat.{}.{}", self.audience, suffix)
    }

    /// Presence announcements
    pub fn online(&self) -> String {
        self.scoped("online")
    }

    /// Broadcast posts, any channel
    pub fn posts(&self) -> String {
        self.scoped("posts.*")
    }

    /// Direct messages to anyone
    pub fn direct_messages(&self) -> String {
        self.scoped("dms.*")
    }

    /// Direct messages addressed to `public_key`
    pub fn direct_messages_to(&self, public_key: &str) -> String {
        self.scoped(&format!("dms.{public_key}"))
    }
}

impl Default for ChatSubjects {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIENCE)
    }
}

/// Claims lookup subject of the system-of-record for `account`
pub fn claims_lookup_subject(account: &str) -> String {
    format!("$SYS.REQ.ACCOUNT.{account}.CLAIMS.LOOKUP")
}

/// Claims update subject of the system-of-record for `account`
pub fn claims_update_subject(account: &str) -> String {
    format!("$SYS.REQ.ACCOUNT.{account}.CLAIMS.UPDATE")
}
