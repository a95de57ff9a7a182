//! Hexagonal ports for the platform side of the monitor.
//!
//! The Telegram adapter implements all of these; tests use in-memory fakes.

use async_trait::async_trait;

use crate::{
    domain::{ChatHandle, ChatSummary, MessageId},
    ids::IdVariant,
    Result,
};

/// Turns one spelling of a chat id into a live handle.
#[async_trait]
pub trait ChatResolver: Send + Sync {
    async fn resolve(&self, variant: &IdVariant) -> Result<ChatHandle>;
}

/// Enumerates chats the monitoring identity can see (channels and groups only).
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    async fn list_channels_and_groups(&self) -> Result<Vec<ChatSummary>>;
}

/// Shape of the engagement call.
///
/// The platform has accepted different payload layouts over time, so delivery
/// walks these in `ReactionStrategy::CHAIN` order until one is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReactionStrategy {
    /// Reaction list with a single typed emoji entry.
    ListWrapped,
    /// Per-message form-encoded call.
    MessageReact,
    /// A single typed emoji object, not wrapped in a list.
    SingleObject,
    /// The emoji as a bare string.
    BareString,
}

impl ReactionStrategy {
    pub const CHAIN: [ReactionStrategy; 4] = [
        ReactionStrategy::ListWrapped,
        ReactionStrategy::MessageReact,
        ReactionStrategy::SingleObject,
        ReactionStrategy::BareString,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionPayload {
    pub strategy: ReactionStrategy,
    pub emoji: String,
}

/// Side effects performed as the monitoring identity.
#[async_trait]
pub trait MonitorActions: Send + Sync {
    async fn acknowledge_read(&self, chat: &ChatHandle, message_id: MessageId) -> Result<()>;

    async fn send_engagement(
        &self,
        chat: &ChatHandle,
        message_id: MessageId,
        payload: &ReactionPayload,
    ) -> Result<()>;
}

/// Outbound channel to the operator. Callers treat failures as non-fatal.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify_operator(&self, text: &str) -> Result<()>;
}

/// Liveness view of one platform session.
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    fn name(&self) -> &str;

    async fn is_connected(&self) -> bool;

    async fn reconnect(&self) -> Result<()>;

    /// `Ok(false)` means the session is up but its credentials were rejected.
    async fn is_authorized(&self) -> Result<bool>;
}
