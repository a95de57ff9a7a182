//! Request bodies for `setMessageReaction`, one per `ReactionStrategy`.

use serde_json::{json, Value};
use tmon_core::ports::ReactionStrategy;

pub const METHOD: &str = "setMessageReaction";

#[derive(Clone, Debug, PartialEq)]
pub enum ReactionRequest {
    Json(Value),
    Form(Vec<(String, String)>),
}

pub fn build(strategy: ReactionStrategy, chat_id: i64, message_id: i32, emoji: &str) -> ReactionRequest {
    let typed = json!({ "type": "emoji", "emoji": emoji });
    match strategy {
        ReactionStrategy::ListWrapped => ReactionRequest::Json(json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reaction": [typed],
        })),
        ReactionStrategy::MessageReact => ReactionRequest::Form(vec![
            ("chat_id".to_string(), chat_id.to_string()),
            ("message_id".to_string(), message_id.to_string()),
            ("reaction".to_string(), json!([typed]).to_string()),
        ]),
        ReactionStrategy::SingleObject => ReactionRequest::Json(json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reaction": typed,
        })),
        ReactionStrategy::BareString => ReactionRequest::Json(json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reaction": emoji,
        })),
    }
}

/// Bot API response envelope; only the status fields are read.
#[derive(Debug, serde::Deserialize)]
pub struct ApiReply {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}
