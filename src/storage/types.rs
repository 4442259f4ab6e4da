use serde::{Deserialize, Serialize};

/// Metadata for a stored conversation, as returned by list queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Unique identifier for the conversation
    pub id: String,
    /// Display title (explicit or derived)
    pub title: String,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    /// Last-update time, epoch milliseconds
    pub updated_at: i64,
    /// Number of messages in the conversation
    pub message_count: usize,
}

/// Ordering key for conversation listings; both orders return newest-first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Order by creation time
    CreatedAt,
    /// Order by last-update time
    UpdatedAt,
}
