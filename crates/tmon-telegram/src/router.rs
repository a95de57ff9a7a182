use std::{collections::HashMap, sync::Arc};

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::{ChatMemberUpdated, Message},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tmon_core::{
    domain::{InboundMessage, MessageId, UserId},
    service::{InboundDisposition, MonitorService},
};

use crate::{handlers, registry::ChatRegistry};

/// Shared state for the operator bot handlers.
pub struct AppState {
    pub service: Arc<MonitorService>,
    pub owner_id: i64,
    pub page_size: usize,
    pub searches: SearchMemory,
}

impl AppState {
    pub fn new(service: Arc<MonitorService>, owner_id: i64, page_size: usize) -> Self {
        Self {
            service,
            owner_id,
            page_size: page_size.max(1),
            searches: SearchMemory::default(),
        }
    }

    pub fn is_owner(&self, user_id: Option<u64>) -> bool {
        user_id.map(|id| id as i64) == Some(self.owner_id)
    }
}

/// Last search query per operator chat; `None` means the unfiltered list.
#[derive(Default)]
pub struct SearchMemory {
    inner: Mutex<HashMap<i64, String>>,
}

impl SearchMemory {
    pub async fn set(&self, chat_id: i64, query: Option<String>) {
        let mut map = self.inner.lock().await;
        match query.map(|q| q.trim().to_string()).filter(|q| !q.is_empty()) {
            Some(q) => {
                map.insert(chat_id, q);
            }
            None => {
                map.remove(&chat_id);
            }
        }
    }

    pub async fn get(&self, chat_id: i64) -> Option<String> {
        self.inner.lock().await.get(&chat_id).cloned()
    }
}

/// Feed every update the monitoring bot receives into the service until `cancel` fires.
pub async fn run_monitor(
    bot: Bot,
    registry: Arc<ChatRegistry>,
    service: Arc<MonitorService>,
    cancel: CancellationToken,
) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_monitored_message))
        .branch(Update::filter_channel_post().endpoint(on_monitored_message))
        .branch(Update::filter_my_chat_member().endpoint(on_membership_change));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![registry, service])
        .default_handler(|_| async {})
        .build();

    stop_on_cancel(dispatcher.shutdown_token(), cancel, "monitor");
    tracing::info!("monitor dispatcher running");
    dispatcher.dispatch().await;
    tracing::info!("monitor dispatcher stopped");
}

/// Serve the operator menu until `cancel` fires.
pub async fn run_operator(bot: Bot, state: Arc<AppState>, cancel: CancellationToken) {
    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_| async {})
        .build();

    stop_on_cancel(dispatcher.shutdown_token(), cancel, "operator");
    tracing::info!("operator dispatcher running");
    dispatcher.dispatch().await;
    tracing::info!("operator dispatcher stopped");
}

fn stop_on_cancel(
    token: teloxide::dispatching::ShutdownToken,
    cancel: CancellationToken,
    name: &'static str,
) {
    tokio::spawn(async move {
        cancel.cancelled().await;
        match token.shutdown() {
            Ok(done) => done.await,
            Err(e) => tracing::warn!(dispatcher = name, error = %e, "dispatcher not running"),
        }
    });
}

fn inbound_from(msg: &Message) -> InboundMessage {
    InboundMessage {
        chat_id: msg.chat.id.0.to_string(),
        message_id: MessageId(msg.id.0),
        sender_id: msg.from().map(|u| UserId(u.id.0 as i64)),
    }
}

async fn on_monitored_message(
    msg: Message,
    registry: Arc<ChatRegistry>,
    service: Arc<MonitorService>,
) -> ResponseResult<()> {
    registry.observe(&msg.chat);

    let inbound = inbound_from(&msg);
    tracing::debug!(chat_id = %inbound.chat_id, message_id = inbound.message_id.0, "message received");

    // Resolution and the read-ack can take a while; keep the dispatcher moving.
    tokio::spawn(async move {
        let disposition = service.on_message(&inbound).await;
        if disposition == InboundDisposition::Scheduled {
            tracing::info!(chat_id = %inbound.chat_id, message_id = inbound.message_id.0, "reaction queued");
        }
    });
    Ok(())
}

async fn on_membership_change(
    upd: ChatMemberUpdated,
    registry: Arc<ChatRegistry>,
) -> ResponseResult<()> {
    if upd.new_chat_member.kind.is_present() {
        if registry.observe(&upd.chat) {
            tracing::info!(chat_id = upd.chat.id.0, "monitoring bot added to chat");
        }
    } else if registry.forget(upd.chat.id.0) {
        tracing::info!(chat_id = upd.chat.id.0, "monitoring bot left chat");
    }
    Ok(())
}
