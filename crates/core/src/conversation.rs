//! Conversation Store
//!
//! An ordered, append-only turn history scoped to one conversation. The store
//! is cheap to clone; every clone shares the same log. The only mutation is
//! [`ConversationStore::append`], which assigns the sequence number and pushes
//! the entry inside one critical section, so concurrent appenders can never
//! observe or produce out-of-order entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Backend-authored notes recorded when a live turn completes.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub seq: u64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ConversationLog {
    entries: Vec<ConversationEntry>,
    next_seq: u64,
}

/// Shared handle to one conversation's history.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    inner: Arc<Mutex<ConversationLog>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns it with its assigned sequence number.
    pub async fn append(&self, role: Role, content: impl Into<String>) -> ConversationEntry {
        let mut log = self.inner.lock().await;
        log.next_seq += 1;
        let entry = ConversationEntry {
            seq: log.next_seq,
            role,
            content: content.into(),
            created_at: Utc::now(),
        };
        log.entries.push(entry.clone());
        entry
    }

    /// A point-in-time copy of the history.
    pub async fn entries(&self) -> Vec<ConversationEntry> {
        self.inner.lock().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every entry. Only used on session teardown.
    ///
    /// Sequence numbers keep counting from where they were, so a number is
    /// never handed out twice within the store's lifetime.
    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    /// Renders the history as `role: content` lines for prompt embedding.
    pub async fn render(&self) -> String {
        let log = self.inner.lock().await;
        if log.entries.is_empty() {
            return "(no previous messages)".to_string();
        }
        log.entries
            .iter()
            .map(|entry| format!("{}: {}", entry.role, entry.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_assigns_increasing_sequence_numbers() {
        let store = ConversationStore::new();
        let first = store.append(Role::User, "find me a blender").await;
        let second = store.append(Role::System, "Here are your options").await;

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(store.len().await, 2);
        assert_eq!(
            store.render().await,
            "user: find me a blender\nsystem: Here are your options"
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_reorder() {
        let store = ConversationStore::new();
        let mut handles = Vec::new();
        for task in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store.append(Role::User, format!("{}-{}", task, i)).await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entries = store.entries().await;
        assert_eq!(entries.len(), 400);
        assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));
        // Each task's own appends keep their relative order.
        for task in 0..16 {
            let mine: Vec<_> = entries
                .iter()
                .filter(|e| e.content.starts_with(&format!("{}-", task)))
                .map(|e| e.content.clone())
                .collect();
            let expected: Vec<_> = (0..25).map(|i| format!("{}-{}", task, i)).collect();
            assert_eq!(mine, expected);
        }
    }

    #[tokio::test]
    async fn test_clear_keeps_sequence_monotonic() {
        let store = ConversationStore::new();
        store.append(Role::User, "one").await;
        store.clear().await;
        assert!(store.is_empty().await);
        assert_eq!(store.render().await, "(no previous messages)");

        let next = store.append(Role::User, "two").await;
        assert_eq!(next.seq, 2);
    }

    #[test]
    fn test_role_display_and_serialization() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
