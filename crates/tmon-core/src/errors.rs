/// Core error type for the monitor.
///
/// Adapter crates map their transport errors into this type so the engine can
/// tell "retry later" apart from "this chat is gone" and "re-login required".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single resolver call failed; retryable within the resolution window.
    #[error("resolution failed: {0}")]
    Resolve(String),

    /// Every variant failed in every round.
    #[error("chat {chat_id} unreachable after {rounds} rounds: {last}")]
    Unreachable {
        chat_id: String,
        rounds: u32,
        last: String,
    },

    #[error("reaction delivery failed: {0}")]
    Delivery(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
