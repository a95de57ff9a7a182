//! Telegram adapters (teloxide).
//!
//! `TelegramPlatform` implements the `tmon-core` monitoring ports over the Bot
//! API; `TelegramOperator` delivers notices to the owner through the operator
//! bot. Reactions go over raw HTTP because each fallback shape needs its own
//! request body.

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{Chat, Recipient},
    ApiError,
};
use tokio::time::sleep;

pub mod handlers;
pub mod reaction;
pub mod registry;
pub mod router;

use tmon_core::{
    domain::{ChatHandle, ChatSummary, MessageId, UserId},
    errors::Error,
    ids::IdVariant,
    ports::{
        ChatDirectory, ChatResolver, MonitorActions, OperatorNotifier, PlatformConnection,
        ReactionPayload,
    },
    Result,
};

use crate::{
    reaction::{ApiReply, ReactionRequest},
    registry::ChatRegistry,
};

/// Build a bot client, pointing it at `api_url` when that is not the public endpoint.
pub fn build_bot(token: &str, api_url: &str) -> Result<Bot> {
    let bot = Bot::new(token);
    if api_url == tmon_core::config::DEFAULT_BOT_API_URL {
        return Ok(bot);
    }
    let url = reqwest::Url::parse(api_url)
        .map_err(|e| Error::Config(format!("invalid bot api url {api_url}: {e}")))?;
    Ok(bot.set_api_url(url))
}

fn map_err(e: teloxide::RequestError) -> Error {
    match e {
        teloxide::RequestError::Api(ApiError::NotFound) => {
            Error::Unauthorized("bot token rejected".to_string())
        }
        other => Error::External(format!("telegram error: {other}")),
    }
}

async fn with_retry<T, Fut>(mut op: impl FnMut() -> Fut) -> Result<T>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
    Fut::IntoFuture: Send,
{
    const MAX_RETRIES: usize = 1;
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => match e {
                teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                    continue;
                }
                other => return Err(map_err(other)),
            },
        }
    }
}

/// Session health as seen through `getMe`.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Probe {
    Up,
    Unauthorized,
    Down(String),
}

async fn probe(bot: &Bot) -> Probe {
    match bot.get_me().await {
        Ok(_) => Probe::Up,
        Err(teloxide::RequestError::Api(ApiError::NotFound)) => Probe::Unauthorized,
        Err(e) => Probe::Down(e.to_string()),
    }
}

fn reconnect_result(name: &str, probe: Probe) -> Result<()> {
    match probe {
        // The transport is fine; authorization is reported separately.
        Probe::Up | Probe::Unauthorized => Ok(()),
        Probe::Down(e) => Err(Error::External(format!("{name} still unreachable: {e}"))),
    }
}

fn authorized_result(probe: Probe) -> Result<bool> {
    match probe {
        Probe::Up => Ok(true),
        Probe::Unauthorized => Ok(false),
        Probe::Down(e) => Err(Error::External(format!("authorization check failed: {e}"))),
    }
}

fn handle_from(chat: &Chat) -> ChatHandle {
    ChatHandle {
        id: chat.id.0,
        title: chat.title().map(|t| t.to_string()),
    }
}

fn recipient(variant: &IdVariant) -> Result<Recipient> {
    match variant {
        IdVariant::Original(s) if s.starts_with('@') => Ok(Recipient::ChannelUsername(s.clone())),
        IdVariant::Original(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| Recipient::Id(ChatId(n)))
            .map_err(|_| Error::Resolve(format!("not a chat id: {s}"))),
        IdVariant::Numeric(n) | IdVariant::Short(n) => Ok(Recipient::Id(ChatId(*n))),
    }
}

// === Monitoring identity ===

pub struct TelegramPlatform {
    bot: Bot,
    http: reqwest::Client,
    api_url: String,
    token: String,
    registry: Arc<ChatRegistry>,
}

impl TelegramPlatform {
    pub fn new(bot: Bot, token: &str, api_url: &str) -> Self {
        Self {
            bot,
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            registry: Arc::new(ChatRegistry::default()),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    pub fn registry(&self) -> Arc<ChatRegistry> {
        self.registry.clone()
    }

    /// User id of the monitoring bot itself.
    pub async fn identity(&self) -> Result<UserId> {
        let me = with_retry(|| self.bot.get_me()).await?;
        Ok(UserId(me.id.0 as i64))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url, self.token)
    }
}

#[async_trait]
impl ChatResolver for TelegramPlatform {
    async fn resolve(&self, variant: &IdVariant) -> Result<ChatHandle> {
        let target = recipient(variant)?;
        let chat = with_retry(|| self.bot.get_chat(target.clone())).await?;
        self.registry.observe(&chat);
        Ok(handle_from(&chat))
    }
}

#[async_trait]
impl ChatDirectory for TelegramPlatform {
    async fn list_channels_and_groups(&self) -> Result<Vec<ChatSummary>> {
        Ok(self.registry.list())
    }
}

#[async_trait]
impl MonitorActions for TelegramPlatform {
    async fn acknowledge_read(&self, chat: &ChatHandle, message_id: MessageId) -> Result<()> {
        // The Bot API has no read-receipt method; surface that instead of faking success.
        Err(Error::External(format!(
            "read receipts unsupported for bot sessions (chat {}, message {})",
            chat.id, message_id.0
        )))
    }

    async fn send_engagement(
        &self,
        chat: &ChatHandle,
        message_id: MessageId,
        payload: &ReactionPayload,
    ) -> Result<()> {
        let url = self.method_url(reaction::METHOD);
        let req = match reaction::build(payload.strategy, chat.id, message_id.0, &payload.emoji) {
            ReactionRequest::Json(body) => self.http.post(&url).json(&body),
            ReactionRequest::Form(fields) => self.http.post(&url).form(&fields),
        };

        let resp = req
            .send()
            .await
            .map_err(|e| Error::External(format!("reaction request failed: {e}")))?;
        let status = resp.status();
        let reply: ApiReply = resp
            .json()
            .await
            .map_err(|e| Error::Delivery(format!("unreadable reaction reply ({status}): {e}")))?;

        if reply.ok {
            return Ok(());
        }
        let reason = reply.description.unwrap_or_else(|| status.to_string());
        if reply.error_code == Some(401) {
            return Err(Error::Unauthorized(reason));
        }
        Err(Error::Delivery(reason))
    }
}

#[async_trait]
impl PlatformConnection for TelegramPlatform {
    fn name(&self) -> &str {
        "monitor"
    }

    async fn is_connected(&self) -> bool {
        !matches!(probe(&self.bot).await, Probe::Down(_))
    }

    async fn reconnect(&self) -> Result<()> {
        reconnect_result(self.name(), probe(&self.bot).await)
    }

    async fn is_authorized(&self) -> Result<bool> {
        authorized_result(probe(&self.bot).await)
    }
}

// === Operator bot ===

pub struct TelegramOperator {
    bot: Bot,
    owner: ChatId,
}

impl TelegramOperator {
    pub fn new(bot: Bot, owner_id: i64) -> Self {
        Self {
            bot,
            owner: ChatId(owner_id),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl OperatorNotifier for TelegramOperator {
    async fn notify_operator(&self, text: &str) -> Result<()> {
        with_retry(|| self.bot.send_message(self.owner, text.to_string())).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformConnection for TelegramOperator {
    fn name(&self) -> &str {
        "operator"
    }

    async fn is_connected(&self) -> bool {
        !matches!(probe(&self.bot).await, Probe::Down(_))
    }

    async fn reconnect(&self) -> Result<()> {
        reconnect_result(self.name(), probe(&self.bot).await)
    }

    async fn is_authorized(&self) -> Result<bool> {
        authorized_result(probe(&self.bot).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_recipients() {
        assert_eq!(
            recipient(&IdVariant::Original("-100123".to_string())).unwrap(),
            Recipient::Id(ChatId(-100123))
        );
        assert_eq!(
            recipient(&IdVariant::Original("@news".to_string())).unwrap(),
            Recipient::ChannelUsername("@news".to_string())
        );
        assert_eq!(
            recipient(&IdVariant::Short(-123)).unwrap(),
            Recipient::Id(ChatId(-123))
        );
        assert!(recipient(&IdVariant::Original("news".to_string())).is_err());
    }

    #[test]
    fn invalid_token_is_unauthorized() {
        let err = map_err(teloxide::RequestError::Api(ApiError::NotFound));
        assert!(err.is_unauthorized());
        let err = map_err(teloxide::RequestError::Api(ApiError::ChatNotFound));
        assert!(matches!(err, Error::External(_)));
    }

    #[test]
    fn probe_outcomes() {
        assert!(reconnect_result("monitor", Probe::Unauthorized).is_ok());
        assert!(reconnect_result("monitor", Probe::Down("timeout".to_string())).is_err());
        assert!(!authorized_result(Probe::Unauthorized).unwrap());
        assert!(authorized_result(Probe::Up).unwrap());
    }

    #[tokio::test]
    async fn read_ack_reports_unsupported() {
        let bot = build_bot("1:a", tmon_core::config::DEFAULT_BOT_API_URL).unwrap();
        let platform = TelegramPlatform::new(bot, "1:a", tmon_core::config::DEFAULT_BOT_API_URL);
        let chat = ChatHandle {
            id: -100123,
            title: None,
        };

        let err = platform
            .acknowledge_read(&chat, MessageId(7))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::External(m) if m.contains("unsupported")));
    }

    #[test]
    fn custom_api_url_is_validated() {
        assert!(build_bot("1:a", "not a url").is_err());
        assert!(build_bot("1:a", "http://localhost:8081").is_ok());
        assert!(build_bot("1:a", tmon_core::config::DEFAULT_BOT_API_URL).is_ok());
    }
}
