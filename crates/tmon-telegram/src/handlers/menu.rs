//! Operator menu texts, keyboards and callback data.

use std::time::Duration;

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use tmon_core::{
    domain::{ListedChat, WatchedChat},
    service::ServiceStatus,
};

pub const BTN_CHAT_LIST: &str = "📋 Chat list";
pub const BTN_SEARCH: &str = "🔍 Search chats";
pub const BTN_WATCHES: &str = "👁 Active watches";
pub const BTN_CHECK: &str = "🔄 Check availability";
pub const BTN_HELP: &str = "❓ Help";

pub const MAIN_MENU_TEXT: &str = "Choose an action:";
pub const SEARCH_PROMPT: &str = "Type part of a chat title to search for:";
pub const SEARCH_PREFIX: &str = "🔍 Search: ";
pub const CHECK_STARTED: &str = "⏳ Checking watched chats...";
pub const NOT_OWNER: &str = "⛔️ This bot is private and only serves its owner.";
pub const NOT_OWNER_CALLBACK: &str = "⛔️ You do not have access to this bot.";

/// Decoded inline-button payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MenuAction {
    MainMenu,
    ChatsPage(usize),
    Toggle(String),
    SearchHint,
    WatchesPage(usize),
    CheckAvailability,
    Dummy,
    Unknown,
}

impl MenuAction {
    pub fn parse(data: &str) -> Self {
        if data == "main_menu" {
            return Self::MainMenu;
        }
        if data == "search_chats" {
            return Self::SearchHint;
        }
        if data == "check_availability" {
            return Self::CheckAvailability;
        }
        if data == "dummy" {
            return Self::Dummy;
        }
        if let Some(n) = data.strip_prefix("mon_page_") {
            return n.parse().map(Self::WatchesPage).unwrap_or(Self::Unknown);
        }
        if let Some(n) = data.strip_prefix("page_") {
            return n.parse().map(Self::ChatsPage).unwrap_or(Self::Unknown);
        }
        if let Some(id) = data.strip_prefix("toggle_") {
            if id.parse::<i64>().is_ok() {
                return Self::Toggle(id.to_string());
            }
        }
        Self::Unknown
    }

    pub fn data(&self) -> String {
        match self {
            Self::MainMenu => "main_menu".to_string(),
            Self::ChatsPage(n) => format!("page_{n}"),
            Self::Toggle(id) => format!("toggle_{id}"),
            Self::SearchHint => "search_chats".to_string(),
            Self::WatchesPage(n) => format!("mon_page_{n}"),
            Self::CheckAvailability => "check_availability".to_string(),
            Self::Dummy | Self::Unknown => "dummy".to_string(),
        }
    }
}

fn button(label: impl Into<String>, action: MenuAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.data())
}

pub fn main_menu_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(
        [BTN_CHAT_LIST, BTN_SEARCH, BTN_WATCHES, BTN_CHECK, BTN_HELP]
            .into_iter()
            .map(|label| vec![KeyboardButton::new(label)]),
    )
    .resize_keyboard(true)
}

pub fn back_to_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("🔙 Main menu", MenuAction::MainMenu)]])
}

/// One page of `items`: `(slice, clamped page, total pages)`. Never fewer than one page.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> (&[T], usize, usize) {
    let size = page_size.max(1);
    let total = items.len().div_ceil(size).max(1);
    let page = page.min(total - 1);
    let start = (page * size).min(items.len());
    let end = (start + size).min(items.len());
    (&items[start..end], page, total)
}

fn nav_row(
    page: usize,
    total: usize,
    to_page: fn(usize) -> MenuAction,
    always_show_indicator: bool,
) -> Vec<InlineKeyboardButton> {
    let mut row = Vec::new();
    if page > 0 {
        row.push(button("◀️ Back", to_page(page - 1)));
    }
    if always_show_indicator || total > 1 {
        row.push(button(format!("📄 {}/{}", page + 1, total), MenuAction::Dummy));
    }
    if page + 1 < total {
        row.push(button("Next ▶️", to_page(page + 1)));
    }
    row
}

/// Chat browser page. `None` markup means there is nothing to show.
pub fn chat_list_view(
    chats: &[ListedChat],
    page: usize,
    page_size: usize,
    search: Option<&str>,
) -> (String, Option<InlineKeyboardMarkup>) {
    if chats.is_empty() {
        let text = match search {
            Some(q) => format!("No chats match '{q}'."),
            None => "No channels or groups found yet. Add the monitoring bot to a chat first."
                .to_string(),
        };
        return (text, None);
    }

    let (slice, page, total) = paginate(chats, page, page_size);
    let mut rows: Vec<Vec<InlineKeyboardButton>> = slice
        .iter()
        .map(|c| {
            let status = if c.watched { "✅" } else { "⭕" };
            vec![button(
                format!("{status} {}", c.title),
                MenuAction::Toggle(c.id.to_string()),
            )]
        })
        .collect();

    rows.push(nav_row(page, total, MenuAction::ChatsPage, true));
    let search_label = match search {
        Some(q) => format!("{SEARCH_PREFIX}{q}"),
        None => BTN_SEARCH.to_string(),
    };
    rows.push(vec![button(search_label, MenuAction::SearchHint)]);
    rows.push(vec![button("🔙 Main menu", MenuAction::MainMenu)]);

    let text = match search {
        Some(q) => format!("Search results for '{q}':"),
        None => "Pick a chat to switch monitoring on or off:".to_string(),
    };
    (text, Some(InlineKeyboardMarkup::new(rows)))
}

/// Active watches page with reachability markers.
pub fn watches_view(
    rows: &[WatchedChat],
    page: usize,
    page_size: usize,
) -> (String, Option<InlineKeyboardMarkup>) {
    if rows.is_empty() {
        return ("No active watches.".to_string(), None);
    }

    let (slice, page, total) = paginate(rows, page, page_size);
    let mut text = String::from("📊 Active watches:\n\n");
    for (idx, w) in slice.iter().enumerate() {
        let status = if w.reachable {
            "✅ Reachable"
        } else {
            "❌ Unreachable"
        };
        text.push_str(&format!(
            "{}. 📢 {} (ID: {}) {status}\n",
            page * page_size.max(1) + idx + 1,
            w.title,
            w.id
        ));
    }

    let mut keyboard = Vec::new();
    let nav = nav_row(page, total, MenuAction::WatchesPage, false);
    if !nav.is_empty() {
        keyboard.push(nav);
    }
    keyboard.push(vec![button(BTN_CHECK, MenuAction::CheckAvailability)]);
    keyboard.push(vec![button("🔙 Main menu", MenuAction::MainMenu)]);

    (text, Some(InlineKeyboardMarkup::new(keyboard)))
}

pub fn check_finished(removed: usize) -> String {
    if removed == 0 {
        "✅ Check finished. Every watched chat is reachable.".to_string()
    } else {
        format!("✅ Check finished. {removed} unreachable chat(s) removed from monitoring.")
    }
}

pub fn toggle_confirmation(title: &str, now_watching: bool, delay: Duration, emoji: &str) -> String {
    if now_watching {
        format!(
            "✅ Monitoring enabled for '{title}'.\nNew messages there are marked as read right away and get a {emoji} reaction after {}.",
            human_delay(delay)
        )
    } else {
        format!("❌ Monitoring disabled for '{title}'.")
    }
}

pub fn help_text(delay: Duration, emoji: &str, status: &ServiceStatus) -> String {
    let last_check = status
        .last_reconciled
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "not yet".to_string());

    format!(
        "📌 How to use this bot:\n\n\
1️⃣ {BTN_CHAT_LIST} shows every channel and group the monitor knows\n\
2️⃣ {BTN_SEARCH} filters that list by title\n\
3️⃣ Tap a chat to switch monitoring on or off\n\
4️⃣ {BTN_WATCHES} lists what is monitored right now\n\
5️⃣ {BTN_CHECK} drops chats the monitor can no longer reach\n\n\
⚡️ While a chat is monitored:\n\
- new messages are marked as read when they arrive\n\
- a {emoji} reaction is added {} later\n\n\
💡 If reactions stop appearing, check availability from the menu and make sure reactions are enabled in the chat.\n\n\
📊 Status: {} watched, {} pending, last check {last_check}",
        human_delay(delay),
        status.watched,
        status.pending_reactions,
    )
}

fn human_delay(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let mins = secs / 60;
        if mins == 1 {
            "1 minute".to_string()
        } else {
            format!("{mins} minutes")
        }
    } else {
        format!("{secs} seconds")
    }
}
