use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use client_core::{
    ChatConfig, ChatEvent, ChatIdentity, ChatMessage, ChatSession, DeliveryStatus,
    HttpBackingStore, HttpMediaUploader, MediaFile,
};
use shared::domain::{MessageId, ScheduleId, UserId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long)]
    schedule: String,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    user_name: String,
    #[arg(long, default_value_t = 3000)]
    poll_ms: u64,
    #[arg(long, default_value_t = client_core::config::DEFAULT_MAX_WRITE_ATTEMPTS)]
    max_write_attempts: usize,
}

enum Input {
    Text(String),
    Photo { path: String, caption: Option<String> },
    Retry,
    Dismiss,
    Refresh,
    Quit,
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(Input::Text(line.to_string()));
    };
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "photo" | "video" => {
            let (path, caption) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
            Some(Input::Photo {
                path: path.to_string(),
                caption: Some(caption.trim().to_string()).filter(|c| !c.is_empty()),
            })
        }
        "retry" => Some(Input::Retry),
        "dismiss" => Some(Input::Dismiss),
        "refresh" => Some(Input::Refresh),
        "quit" | "exit" => Some(Input::Quit),
        _ => Some(Input::Text(line.to_string())),
    }
}

fn mime_for_path(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

fn render_line(entry: &ChatMessage) -> String {
    let message = &entry.message;
    let marker = match entry.status {
        DeliveryStatus::Sending => " (sending)",
        DeliveryStatus::Failed => " (failed, /retry or /dismiss)",
        DeliveryStatus::Sent => "",
    };
    if message.is_system() {
        return format!("  * {}", message.content);
    }
    let sender = message.sender_name.as_deref().unwrap_or("unknown");
    let attachments = message
        .attachments
        .iter()
        .flatten()
        .map(|attachment| format!(" [{}]", attachment.file_name))
        .collect::<String>();
    format!("{sender}: {}{attachments}{marker}", message.content)
}

async fn render(session: &ChatSession, last: &mut Vec<String>) {
    let lines: Vec<String> = session.snapshot().await.iter().map(render_line).collect();
    if &lines == last {
        return;
    }
    println!("----");
    for line in &lines {
        println!("{line}");
    }
    if let Some(error) = session.sync_error().await {
        println!("(offline: {error})");
    }
    *last = lines;
}

fn last_failed(snapshot: &[ChatMessage]) -> Option<MessageId> {
    snapshot
        .iter()
        .rev()
        .find(|entry| entry.status == DeliveryStatus::Failed)
        .map(|entry| entry.message.id.clone())
}

async fn handle(session: &Arc<ChatSession>, input: Input) -> Result<bool> {
    match input {
        Input::Text(text) => {
            if let Err(err) = session.send_message(&text).await {
                println!("not sent: {err}");
            }
        }
        Input::Photo { path, caption } => {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    println!("cannot read {path}: {err}");
                    return Ok(true);
                }
            };
            let file_name = Path::new(&path)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("upload")
                .to_string();
            let file = MediaFile::new(file_name, mime_for_path(&path), bytes);
            if let Err(err) = session.send_media(file, caption.as_deref()).await {
                println!("not sent: {err}");
            }
        }
        Input::Retry => match last_failed(&session.snapshot().await) {
            Some(id) => {
                if let Err(err) = session.retry_failed_message(&id).await {
                    println!("retry refused: {err}");
                }
            }
            None => println!("nothing to retry"),
        },
        Input::Dismiss => {
            if let Some(id) = last_failed(&session.snapshot().await) {
                session.dismiss_failed(&id).await;
            }
        }
        Input::Refresh => {
            if let Err(err) = session.refresh().await {
                println!("refresh failed: {err}");
            }
        }
        Input::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let store = HttpBackingStore::new(&args.server_url)?;
    let uploader = HttpMediaUploader::new(&args.server_url)?;
    let config = ChatConfig {
        poll_interval: Duration::from_millis(args.poll_ms.max(100)),
        max_write_attempts: args.max_write_attempts.max(1),
        ..ChatConfig::default()
    };
    let session = ChatSession::new_with_uploader(
        Arc::new(store),
        Arc::new(uploader),
        ChatIdentity {
            user_id: UserId::new(args.user_id),
            display_name: args.user_name,
            avatar_url: None,
        },
        config,
    );

    let mut events = session.subscribe_events();
    if let Err(err) = session.open(ScheduleId::new(args.schedule)).await {
        warn!(error = %err, "initial load failed; polling will keep trying");
    }
    println!("type a message, /photo <path> [caption], /retry, /dismiss, /refresh or /quit");

    let mut rendered = Vec::new();
    render(&session, &mut rendered).await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(input) = parse_input(&line) else { continue };
                if !handle(&session, input).await? {
                    break;
                }
                render(&session, &mut rendered).await;
            }
            event = events.recv() => {
                match event {
                    Ok(ChatEvent::SendFailed { error, .. }) => println!("send failed: {error}"),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                render(&session, &mut rendered).await;
            }
        }
    }

    session.close().await;
    Ok(())
}
