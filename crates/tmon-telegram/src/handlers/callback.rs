use std::sync::Arc;

use teloxide::prelude::*;

use crate::router::AppState;

use super::{
    commands::{render, send_main_menu, show_chat_list, show_watches},
    menu::{self, MenuAction},
};

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let data = q.data.clone().unwrap_or_default();
    let Some(message) = q.message.as_ref() else {
        let _ = bot.answer_callback_query(cb_id).await;
        return Ok(());
    };
    let chat_id = message.chat.id;
    let message_id = message.id;

    let action = MenuAction::parse(&data);
    tracing::debug!(?action, "operator callback");

    match action {
        MenuAction::MainMenu => {
            let _ = bot.answer_callback_query(cb_id).await;
            send_main_menu(&bot, chat_id).await;
        }
        MenuAction::ChatsPage(page) => {
            let _ = bot.answer_callback_query(cb_id).await;
            show_chat_list(&bot, chat_id, &state, page, Some(message_id)).await;
        }
        MenuAction::WatchesPage(page) => {
            let _ = bot.answer_callback_query(cb_id).await;
            show_watches(&bot, chat_id, &state, page, Some(message_id)).await;
        }
        MenuAction::Toggle(id) => match state.service.toggle_watch(&id).await {
            Ok(outcome) => {
                let short = if outcome.now_watching {
                    "Monitoring on"
                } else {
                    "Monitoring off"
                };
                let _ = bot.answer_callback_query(cb_id).text(short).await;
                let confirmation = menu::toggle_confirmation(
                    &outcome.title,
                    outcome.now_watching,
                    state.service.reaction_delay(),
                    state.service.reaction_emoji(),
                );
                let _ = bot.send_message(chat_id, confirmation).await;
                show_chat_list(&bot, chat_id, &state, 0, None).await;
            }
            Err(e) => {
                tracing::error!(chat_id = %id, error = %e, "toggle failed");
                let _ = bot
                    .answer_callback_query(cb_id)
                    .text(format!("❌ Could not access chat {id}"))
                    .show_alert(true)
                    .await;
            }
        },
        MenuAction::CheckAvailability => {
            let _ = bot
                .answer_callback_query(cb_id)
                .text("Starting availability check...")
                .await;
            let removed = state.service.run_reconciliation_now().await;
            render(
                &bot,
                chat_id,
                Some(message_id),
                menu::check_finished(removed),
                Some(menu::back_to_menu()),
            )
            .await;
        }
        MenuAction::SearchHint => {
            let _ = bot
                .answer_callback_query(cb_id)
                .text(format!("Use the '{}' button in the main menu", menu::BTN_SEARCH))
                .await;
        }
        MenuAction::Dummy => {
            let _ = bot.answer_callback_query(cb_id).text("Page indicator").await;
        }
        MenuAction::Unknown => {
            tracing::warn!(data = %data, "unknown callback data");
            let _ = bot.answer_callback_query(cb_id).text("Unknown command").await;
        }
    }

    Ok(())
}
