mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use ringside_db::Database;
use ringside_store::EmbeddedStore;
use ringside_supabase::SupabaseStore;
use ringside_sync::{
    ChatHandle, ChatOptions, ChatSession, DirectMessagePanel, DirectOptions, LocalCache, ProfileStore, RemoteStore,
    SyncError, WindowMode,
};
use ringside_types::models::{DirectMessage, Message, parse_timestamp};

use config::{Backend, Config};

const HELP: &str = "\
Type a message and press enter to send it to the group.
  /dm <text>         message the admins
  /dms               show your messages to the admins
  /name <name>       change your display name
  /color <#rrggbb>   change your name color
  /focus             reload history and profile
  /retry             dismiss the error and reload
  /forget            forget your admin messages on this device
  /quit              exit
Dev mode only:
  /inbox             everyone's latest admin messages
  /reply <id> <text> answer an admin message (embedded backend)
  /clear             delete every group message";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "ringside=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Local cache
    let cache_db = Arc::new(Database::open(&config.cache_path).context("opening the local cache")?);
    let cache = LocalCache::new(cache_db);
    let profile = ProfileStore::load(cache.clone());

    // Remote store
    let mut embedded = None;
    let remote: Arc<dyn RemoteStore> = match config.backend {
        Backend::Embedded => {
            let db = Database::open(&config.store_path).context("opening the message store")?;
            let store = Arc::new(EmbeddedStore::new(Arc::new(db)));
            embedded = Some(store.clone());
            store
        }
        Backend::Supabase => {
            let url = config.supabase_url.as_deref().unwrap_or_default();
            let key = config.supabase_anon_key.as_deref().unwrap_or_default();
            Arc::new(SupabaseStore::new(url, key)?)
        }
    };

    let session = ChatSession::start(
        remote.clone(),
        cache.clone(),
        profile.clone(),
        ChatOptions {
            history_limit: config.history_limit,
            ..ChatOptions::default()
        },
    );
    let panel = DirectMessagePanel::open(
        remote,
        cache,
        profile.clone(),
        DirectOptions {
            client_ids: config.client_ids,
            ..DirectOptions::default()
        },
    )
    .await;

    let chat = session.handle();
    let printer = tokio::spawn(print_messages(chat.messages()));
    let notices = tokio::spawn(print_errors(chat.errors()));

    info!("Ringside ready as {}", profile.get().display_name);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "/quit" => break,
            "/help" => println!("{}", HELP),
            "/focus" => chat.on_focus().await,
            "/retry" => chat.retry().await,
            "/name" => report(profile.update(Some(rest), None).map(|p| format!("You are now {}", p.display_name))),
            "/color" => report(profile.update(None, Some(rest)).map(|p| format!("Color set to {}", p.color_tag))),
            "/dm" => match panel.submit(rest).await {
                Ok(Some(id)) => {
                    println!("Message sent (#{})", id);
                    print_window(&panel.window().borrow());
                }
                Ok(None) => println!("Nothing to send"),
                Err(e) => println!("Failed to send: {}", e.notice()),
            },
            "/dms" => show_window(&panel, WindowMode::Tracked).await,
            "/forget" => report(panel.clear_tracked().await.map(|_| "Forgot your admin messages".to_string())),
            "/inbox" if config.dev_mode => show_window(&panel, panel.recent_mode()).await,
            "/clear" if config.dev_mode => report(chat.clear().await.map(|_| "Chat cleared".to_string())),
            "/reply" if config.dev_mode => match (&embedded, rest.split_once(' ')) {
                (Some(store), Some((id, text))) => match store.reply_to_direct_message(id, text.trim()).await {
                    Ok(true) => println!("Replied to #{}", id),
                    Ok(false) => println!("No admin message #{}", id),
                    Err(e) => println!("Reply failed: {:#}", e),
                },
                (None, _) => println!("Replies are only available on the embedded backend"),
                (_, None) => println!("Usage: /reply <id> <text>"),
            },
            _ if command.starts_with('/') => println!("Unknown command {} (try /help)", command),
            _ => send(&chat, line).await,
        }
    }

    drop(panel);
    session.shutdown().await;
    printer.abort();
    notices.abort();
    Ok(())
}

async fn send(chat: &ChatHandle, text: &str) {
    if !chat.send(text).await {
        warn!("Message was not sent");
    }
}

async fn show_window(panel: &DirectMessagePanel, mode: WindowMode) {
    match panel.resolve_window(mode).await {
        Ok(rows) => print_window(&rows),
        Err(e) => println!("{}", e.notice()),
    }
}

fn report(result: Result<String, SyncError>) {
    match result {
        Ok(text) => println!("{}", text),
        Err(e) => println!("{}", e.notice()),
    }
}

/// Print messages as they are appended. Entries are matched by author and
/// body, so a send confirmed under its store id is not printed again.
async fn print_messages(mut messages: watch::Receiver<Vec<Message>>) {
    let mut shown: Vec<Message> = Vec::new();
    while messages.changed().await.is_ok() {
        let list = messages.borrow_and_update().clone();
        let start = match unseen_from(&shown, &list) {
            Some(start) => start,
            None => {
                println!("-- history reloaded --");
                0
            }
        };
        for message in &list[start..] {
            println!("{}", render_message(message));
        }
        shown = list;
    }
}

/// Where the not-yet-printed tail of `list` starts, or `None` when `list`
/// no longer continues what was printed and has to be shown again.
fn unseen_from(shown: &[Message], list: &[Message]) -> Option<usize> {
    let same = |a: &Message, b: &Message| a.author == b.author && a.body == b.body;
    let common = shown.iter().zip(list).take_while(|&(a, b)| same(a, b)).count();
    if common == shown.len() {
        return Some(common);
    }

    // Entries were only dropped (a duplicate collapsed, or the view was
    // emptied): nothing new to print.
    let mut rest = shown[common..].iter();
    let dropped_only = list[common..].iter().all(|m| rest.any(|s| same(s, m)));
    dropped_only.then_some(list.len())
}

async fn print_errors(mut errors: watch::Receiver<Option<SyncError>>) {
    while errors.changed().await.is_ok() {
        if let Some(error) = errors.borrow_and_update().as_ref() {
            println!("! {} (/retry)", error.notice());
        }
    }
}

fn print_window(rows: &[DirectMessage]) {
    if rows.is_empty() {
        println!("No admin messages yet");
    }
    for row in rows {
        println!("{}", render_direct(row));
    }
}

fn clock(timestamp: &str) -> String {
    parse_timestamp(timestamp)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".into())
}

fn render_message(message: &Message) -> String {
    format!("[{}] {}: {}", clock(&message.timestamp), message.author, message.body)
}

fn render_direct(row: &DirectMessage) -> String {
    let mut line = format!(
        "#{} [{}] {}: {}",
        row.id,
        row.created_at.as_deref().map(clock).unwrap_or_else(|| "--:--".into()),
        row.author,
        row.body
    );
    if let Some(reply) = &row.admin_reply {
        line.push_str(&format!("\n    admin: {}", reply));
    }
    line
}
