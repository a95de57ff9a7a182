//! Chats the monitoring bot has seen.
//!
//! The Bot API has no "list my dialogs" call, so the directory shown in the
//! operator menu is built from updates: every message, channel post, membership
//! change and successful resolution feeds this registry.

use std::{collections::BTreeMap, sync::Mutex};

use teloxide::types::Chat;
use tmon_core::domain::ChatSummary;

#[derive(Default)]
pub struct ChatRegistry {
    chats: Mutex<BTreeMap<i64, String>>,
}

impl ChatRegistry {
    /// Record `chat` if it is a channel or group. Returns whether it was recorded.
    pub fn observe(&self, chat: &Chat) -> bool {
        if !(chat.is_channel() || chat.is_group() || chat.is_supergroup()) {
            return false;
        }
        self.insert(chat.id.0, chat.title().unwrap_or_default());
        true
    }

    pub fn insert(&self, id: i64, title: &str) {
        let title = if title.trim().is_empty() {
            format!("Chat {id}")
        } else {
            title.to_string()
        };
        let mut chats = self.lock();
        if chats.insert(id, title).is_none() {
            tracing::debug!(chat_id = id, known = chats.len(), "new chat registered");
        }
    }

    pub fn forget(&self, id: i64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Known chats, deduplicated by id and sorted by title.
    pub fn list(&self) -> Vec<ChatSummary> {
        let mut out: Vec<ChatSummary> = self
            .lock()
            .iter()
            .map(|(id, title)| ChatSummary {
                id: *id,
                title: title.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, String>> {
        self.chats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_dedupes_by_id_and_lists_by_title() {
        let reg = ChatRegistry::default();
        reg.insert(-1002, "beta");
        reg.insert(-1001, "Alpha");
        reg.insert(-1002, "Beta renamed");
        reg.insert(-1003, "  ");

        let titles: Vec<String> = reg.list().into_iter().map(|c| c.title).collect();
        assert_eq!(titles, vec!["Alpha", "Beta renamed", "Chat -1003"]);
        assert_eq!(reg.list().len(), 3);
    }

    #[test]
    fn forget_drops_the_chat() {
        let reg = ChatRegistry::default();
        reg.insert(-1001, "Alpha");
        assert!(reg.forget(-1001));
        assert!(!reg.forget(-1001));
        assert!(reg.list().is_empty());
    }
}
