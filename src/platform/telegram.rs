use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use teloxide::update_listeners;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::dispatch;
use crate::platform::{InboundMessage, MessageKind, SourceChat};
use crate::relay::RelayError;

/// Pause between stop attempts while the dispatcher is not yet running.
const STOP_RETRY: Duration = Duration::from_millis(100);

/// Telegram as the source platform: file downloads and replies.
pub struct TelegramSource {
    bot: Bot,
}

impl TelegramSource {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl SourceChat for TelegramSource {
    async fn download(&self, handle: &str) -> Result<Vec<u8>, RelayError> {
        let file = self
            .bot
            .get_file(FileId(handle.to_string()))
            .await
            .map_err(|e| RelayError::download(handle, e))?;

        let mut bytes = Vec::new();
        self.bot
            .download_file(&file.path, &mut bytes)
            .await
            .map_err(|e| RelayError::download(handle, e))?;

        Ok(bytes)
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .with_context(|| format!("Failed to send reply to chat {}", chat_id))?;
        Ok(())
    }
}

/// Normalize a Telegram message. Messages without a sender are ignored.
pub fn inbound_from_message(msg: &Message) -> Option<InboundMessage> {
    let sender = msg.from.as_ref()?;

    let (kind, file_handle, file_name) = if msg.text().is_some() {
        (MessageKind::Text, None, None)
    } else if let Some(sizes) = msg.photo() {
        // Largest size is last
        let handle = sizes.last().map(|size| size.file.id.to_string());
        (MessageKind::Photo, handle, None)
    } else if let Some(video) = msg.video() {
        (
            MessageKind::Video,
            Some(video.file.id.to_string()),
            video.file_name.clone(),
        )
    } else if let Some(audio) = msg.audio() {
        (
            MessageKind::Audio,
            Some(audio.file.id.to_string()),
            audio.file_name.clone(),
        )
    } else if let Some(document) = msg.document() {
        (
            MessageKind::Document,
            Some(document.file.id.to_string()),
            document.file_name.clone(),
        )
    } else {
        (MessageKind::Unsupported, None, None)
    };

    Some(InboundMessage {
        sender_id: sender.id.0,
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        kind,
        text: msg.text().map(str::to_string),
        file_handle,
        file_name,
        caption: msg.caption().map(str::to_string),
        group_id: msg.media_group_id().map(|id| id.to_string()),
    })
}

/// Run the receive loop until `shutdown` is cancelled.
///
/// Every message is dispatched on its own task (tracked by `tracker`) so the
/// loop keeps receiving while earlier messages are still being published.
pub async fn run(
    bot: Bot,
    dispatcher: Arc<dispatch::Dispatcher>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message().endpoint(handle_message);

    let mut telegram = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![dispatcher, tracker])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build();

    // Building the listener talks to Telegram; a stop can arrive meanwhile.
    let listener = tokio::select! {
        listener = update_listeners::polling_default(bot) => listener,
        _ = shutdown.cancelled() => {
            info!("Stop requested before polling started");
            return Ok(());
        }
    };

    let shutdown_token = telegram.shutdown_token();
    // The returned future only reports completion; dispatch returning does too.
    let watcher = tokio::spawn(stop_when_cancelled(shutdown, move || {
        shutdown_token.shutdown().map(drop)
    }));

    telegram
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("telegram polling"),
        )
        .await;
    watcher.abort();

    info!("Telegram platform stopped");
    Ok(())
}

/// Waits for `shutdown`, then asks the dispatcher to stop until it accepts.
///
/// teloxide refuses a stop while the dispatcher is idle, so refusals are retried.
async fn stop_when_cancelled<F, E>(shutdown: CancellationToken, mut request_stop: F)
where
    F: FnMut() -> Result<(), E>,
    E: Display,
{
    shutdown.cancelled().await;
    loop {
        match request_stop() {
            Ok(()) => return,
            Err(e) => {
                debug!("Telegram dispatcher cannot stop yet ({}), retrying", e);
                tokio::time::sleep(STOP_RETRY).await;
            }
        }
    }
}

async fn handle_message(
    msg: Message,
    dispatcher: Arc<dispatch::Dispatcher>,
    tracker: TaskTracker,
) -> ResponseResult<()> {
    let Some(inbound) = inbound_from_message(&msg) else {
        debug!("Ignoring message {} without sender", msg.id.0);
        return Ok(());
    };

    tracker.spawn(async move {
        let outcome = dispatcher.dispatch(inbound).await;
        debug!("Dispatch finished: {:?}", outcome);
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(extra: serde_json::Value) -> Message {
        let mut value = json!({
            "message_id": 7,
            "date": 1_700_000_000,
            "chat": {"id": 42, "type": "private", "first_name": "Admin"},
            "from": {"id": 42, "is_bot": false, "first_name": "Admin"}
        });
        for (key, field) in extra.as_object().unwrap() {
            value[key] = field.clone();
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_message() {
        let msg = parse(json!({"text": "hello"}));
        let inbound = inbound_from_message(&msg).unwrap();
        assert_eq!(inbound.kind, MessageKind::Text);
        assert_eq!(inbound.text.as_deref(), Some("hello"));
        assert_eq!(inbound.sender_id, 42);
        assert_eq!(inbound.chat_id, 42);
        assert_eq!(inbound.message_id, 7);
        assert!(inbound.file_handle.is_none());
    }

    #[test]
    fn test_album_photo_uses_largest_size() {
        let msg = parse(json!({
            "media_group_id": "1357",
            "caption": "trip",
            "photo": [
                {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 100},
                {"file_id": "large", "file_unique_id": "l", "width": 1280, "height": 1280, "file_size": 9000}
            ]
        }));
        let inbound = inbound_from_message(&msg).unwrap();
        assert_eq!(inbound.kind, MessageKind::Photo);
        assert_eq!(inbound.file_handle.as_deref(), Some("large"));
        assert_eq!(inbound.caption.as_deref(), Some("trip"));
        assert_eq!(inbound.group_id.as_deref(), Some("1357"));
        assert!(inbound.is_album_member());
    }

    #[test]
    fn test_document_keeps_file_name() {
        let msg = parse(json!({
            "document": {"file_id": "doc", "file_unique_id": "d", "file_name": "report.pdf", "file_size": 10}
        }));
        let inbound = inbound_from_message(&msg).unwrap();
        assert_eq!(inbound.kind, MessageKind::Document);
        assert_eq!(inbound.file_handle.as_deref(), Some("doc"));
        assert_eq!(inbound.file_name.as_deref(), Some("report.pdf"));
        assert!(!inbound.is_album_member());
    }

    #[test]
    fn test_location_is_unsupported() {
        let msg = parse(json!({"location": {"latitude": 35.7, "longitude": 51.4}}));
        let inbound = inbound_from_message(&msg).unwrap();
        assert_eq!(inbound.kind, MessageKind::Unsupported);
        assert!(inbound.file_handle.is_none());
    }

    #[tokio::test]
    async fn test_stop_is_retried_until_dispatcher_accepts() {
        let attempts = std::cell::Cell::new(0);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stop = stop_when_cancelled(shutdown, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err("dispatcher is idle")
            } else {
                Ok(())
            }
        });
        tokio::time::timeout(Duration::from_secs(5), stop)
            .await
            .unwrap();
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn test_no_stop_attempt_before_cancellation() {
        let attempts = std::cell::Cell::new(0);
        let shutdown = CancellationToken::new();

        let stop = stop_when_cancelled(shutdown, || {
            attempts.set(attempts.get() + 1);
            Ok::<_, &str>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(100), stop)
            .await
            .is_err());
        assert_eq!(attempts.get(), 0);
    }
}
