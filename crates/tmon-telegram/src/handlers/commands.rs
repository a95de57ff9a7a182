use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{ForceReply, InlineKeyboardMarkup, Message, MessageId},
};

use crate::router::AppState;

use super::menu;

fn parse_command(text: &str) -> Option<String> {
    // Telegram may send `/cmd@botname arg1 ...`
    let first = text.trim().split_whitespace().next()?;
    let cmd = first.strip_prefix('/')?;
    Some(cmd.split('@').next().unwrap_or("").to_lowercase())
}

/// What a text message from the owner asks for.
#[derive(Debug, PartialEq, Eq)]
enum TextIntent {
    MainMenu,
    ChatList,
    SearchPrompt,
    Search(String),
    Watches,
    Check,
    Help,
    Unknown,
}

fn classify(text: &str, replying_to: Option<&str>) -> TextIntent {
    if let Some(cmd) = parse_command(text) {
        return match cmd.as_str() {
            "start" | "menu" => TextIntent::MainMenu,
            "chats" => TextIntent::ChatList,
            "watches" => TextIntent::Watches,
            "check" => TextIntent::Check,
            "help" | "status" => TextIntent::Help,
            _ => TextIntent::Unknown,
        };
    }

    match text {
        menu::BTN_CHAT_LIST => return TextIntent::ChatList,
        menu::BTN_SEARCH => return TextIntent::SearchPrompt,
        menu::BTN_WATCHES => return TextIntent::Watches,
        menu::BTN_CHECK => return TextIntent::Check,
        menu::BTN_HELP => return TextIntent::Help,
        _ => {}
    }

    if let Some(q) = text.strip_prefix(menu::SEARCH_PREFIX) {
        return TextIntent::Search(q.to_string());
    }
    if replying_to == Some(menu::SEARCH_PROMPT) {
        return TextIntent::Search(text.to_string());
    }
    TextIntent::Unknown
}

pub async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let text = msg.text().unwrap_or_default();
    let replying_to = msg.reply_to_message().and_then(|m| m.text());

    match classify(text, replying_to) {
        TextIntent::MainMenu => send_main_menu(&bot, chat_id).await,
        TextIntent::ChatList => {
            state.searches.set(chat_id.0, None).await;
            show_chat_list(&bot, chat_id, &state, 0, None).await;
        }
        TextIntent::SearchPrompt => {
            let _ = bot
                .send_message(chat_id, menu::SEARCH_PROMPT)
                .reply_markup(ForceReply::new())
                .await;
        }
        TextIntent::Search(q) => {
            tracing::info!(query = %q, "chat search");
            state.searches.set(chat_id.0, Some(q)).await;
            show_chat_list(&bot, chat_id, &state, 0, None).await;
        }
        TextIntent::Watches => show_watches(&bot, chat_id, &state, 0, None).await,
        TextIntent::Check => {
            let _ = bot.send_message(chat_id, menu::CHECK_STARTED).await;
            let removed = state.service.run_reconciliation_now().await;
            let _ = bot
                .send_message(chat_id, menu::check_finished(removed))
                .await;
        }
        TextIntent::Help => {
            let status = state.service.status().await;
            let help = menu::help_text(
                state.service.reaction_delay(),
                state.service.reaction_emoji(),
                &status,
            );
            let _ = bot
                .send_message(chat_id, help)
                .reply_markup(menu::back_to_menu())
                .await;
        }
        TextIntent::Unknown => send_main_menu(&bot, chat_id).await,
    }

    Ok(())
}

pub(super) async fn send_main_menu(bot: &Bot, chat_id: ChatId) {
    if let Err(e) = bot
        .send_message(chat_id, menu::MAIN_MENU_TEXT)
        .reply_markup(menu::main_menu_keyboard())
        .await
    {
        tracing::warn!(error = %e, "failed to send main menu");
    }
}

/// Edit `edit` in place when given, otherwise (or if the edit fails) send a new message.
pub(super) async fn render(
    bot: &Bot,
    chat_id: ChatId,
    edit: Option<MessageId>,
    text: String,
    markup: Option<InlineKeyboardMarkup>,
) {
    if let Some(message_id) = edit {
        let mut req = bot.edit_message_text(chat_id, message_id, text.clone());
        if let Some(m) = markup.clone() {
            req = req.reply_markup(m);
        }
        match req.await {
            Ok(_) => return,
            Err(e) => tracing::debug!(error = %e, "edit failed, sending a new message"),
        }
    }

    let mut req = bot.send_message(chat_id, text);
    if let Some(m) = markup {
        req = req.reply_markup(m);
    }
    if let Err(e) = req.await {
        tracing::warn!(error = %e, "failed to send menu page");
    }
}

pub(super) async fn show_chat_list(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    page: usize,
    edit: Option<MessageId>,
) {
    let search = state.searches.get(chat_id.0).await;
    match state.service.list_chats(search.as_deref()).await {
        Ok(chats) => {
            let (text, markup) =
                menu::chat_list_view(&chats, page, state.page_size, search.as_deref());
            render(bot, chat_id, edit, text, markup).await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to list chats");
            let _ = bot
                .send_message(chat_id, "Could not load the chat list. Try again later.")
                .await;
        }
    }
}

pub(super) async fn show_watches(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    page: usize,
    edit: Option<MessageId>,
) {
    let rows = state.service.list_watched().await;
    let (text, markup) = menu::watches_view(&rows, page, state.page_size);
    render(bot, chat_id, edit, text, markup).await;
}
