//! Operator bot handlers.
//!
//! Every update is checked against the owner id first; strangers get a short
//! refusal and nothing else. Text menu buttons live in `commands`, inline
//! buttons in `callback`, and the texts/keyboards they render in `menu`.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use crate::router::AppState;

mod callback;
mod commands;
pub mod menu;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    if !state.is_owner(Some(q.from.id.0)) {
        tracing::warn!(user_id = q.from.id.0, "callback from non-owner");
        let _ = bot
            .answer_callback_query(q.id)
            .text(menu::NOT_OWNER_CALLBACK)
            .show_alert(true)
            .await;
        return Ok(());
    }

    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| u.id.0);

    if !state.is_owner(user_id) {
        tracing::warn!(?user_id, "message from non-owner");
        let _ = bot.send_message(msg.chat.id, menu::NOT_OWNER).await;
        return Ok(());
    }

    if msg.text().is_some() {
        return commands::handle_text(bot, msg, state).await;
    }

    Ok(())
}
