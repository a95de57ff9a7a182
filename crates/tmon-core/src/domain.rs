use std::collections::BTreeMap;

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i32);

/// Persisted watch set: chat id string -> enabled flag.
///
/// The flag is always `true`; presence is what matters. Keys are canonical
/// (`-100<digits>`) for anything written by this version, but files from older
/// builds may still carry short (`-<digits>`) keys.
pub type MonitoredSet = BTreeMap<String, bool>;

/// A live chat reference produced by the platform resolver.
///
/// Owned by the resolver side; the core only reads `id` (to canonicalize) and
/// `title` (for operator output).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatHandle {
    pub id: i64,
    pub title: Option<String>,
}

impl ChatHandle {
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => format!("Chat {}", self.id),
        }
    }
}

/// Entry in the operator's chat browser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: i64,
    pub title: String,
}

/// Claim key for the delayed engagement: one per (chat, message).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub chat_id: String,
    pub message_id: MessageId,
}

impl MessageKey {
    pub fn new(chat_id: impl Into<String>, message_id: MessageId) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id,
        }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.chat_id, self.message_id.0)
    }
}

/// One row of the "active watches" view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedChat {
    pub id: String,
    pub title: String,
    pub reachable: bool,
}

/// Result of flipping a chat's watch state from the operator menu.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub chat_id: String,
    pub now_watching: bool,
    pub title: String,
}

/// An inbound message as seen by the monitoring identity.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Chat id exactly as reported by the transport.
    pub chat_id: String,
    pub message_id: MessageId,
    /// `None` for anonymous channel posts.
    pub sender_id: Option<UserId>,
}

/// One row of the operator's chat browser, with its current watch state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedChat {
    pub id: i64,
    pub title: String,
    pub watched: bool,
}
