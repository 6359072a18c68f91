use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{error, info, warn};

use crate::album::{AlbumCollector, Grouping};
use crate::config::Config;
use crate::platform::{InboundMessage, MessageKind, SourceChat};
use crate::publish::{PublishResult, Publisher};
use crate::relay::{FileCategory, FileRelay, RelayError, RelayedFile};

pub const ACCESS_DENIED: &str = "You don't have access...";
pub const DELIVERED: &str = "Your message has been sent to Eitaa and Bale.";
pub const FAILED: &str = "An error occurred while sending your message to Eitaa or Bale.";
pub const UNSUPPORTED_PLACEHOLDER: &str = "Unsupported message type received.";

/// Terminal state of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Denied,
    Delivered,
    Failed,
    /// Merged into an album another dispatch is relaying; no reply of its own.
    Absorbed,
}

impl Outcome {
    fn acknowledgment(self) -> Option<&'static str> {
        match self {
            Outcome::Denied => Some(ACCESS_DENIED),
            Outcome::Delivered => Some(DELIVERED),
            Outcome::Failed => Some(FAILED),
            Outcome::Absorbed => None,
        }
    }
}

/// Routes inbound messages to both destinations and acknowledges the sender.
pub struct Dispatcher {
    config: Arc<Config>,
    source: Arc<dyn SourceChat>,
    relay: FileRelay,
    eitaa: Arc<dyn Publisher>,
    bale: Arc<dyn Publisher>,
    albums: AlbumCollector,
}

impl Dispatcher {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn SourceChat>,
        eitaa: Arc<dyn Publisher>,
        bale: Arc<dyn Publisher>,
        scratch_dir: PathBuf,
    ) -> Self {
        let relay = FileRelay::new(Arc::clone(&source), scratch_dir, config.download_timeout);
        let albums = AlbumCollector::new(config.album_window);
        Self {
            config,
            source,
            relay,
            eitaa,
            bale,
            albums,
        }
    }

    /// Handle one inbound event end to end. Never fails; every error ends up
    /// in the log and in the acknowledgment.
    pub async fn dispatch(&self, msg: InboundMessage) -> Outcome {
        let chat_id = msg.chat_id;

        if !self.config.is_admin(msg.sender_id) {
            warn!("Rejected message from non-admin user {}", msg.sender_id);
            self.acknowledge(chat_id, Outcome::Denied).await;
            return Outcome::Denied;
        }

        info!("Received a {:?} message in chat {}", msg.kind, chat_id);

        let kind = msg.kind;
        let attempt = match kind {
            MessageKind::Text => match msg.text.as_deref() {
                Some(text) => Ok(self.publish_text(text).await),
                None => Ok(self.publish_text(UNSUPPORTED_PLACEHOLDER).await),
            },
            MessageKind::Photo if msg.is_album_member() => {
                match self.albums.collect(msg).await {
                    Grouping::Absorbed => return Outcome::Absorbed,
                    Grouping::Single(msg) => self.relay_single(&msg).await,
                    Grouping::Album(members) => self.relay_album(&members).await,
                }
            }
            MessageKind::Photo
            | MessageKind::Video
            | MessageKind::Audio
            | MessageKind::Document => self.relay_single(&msg).await,
            MessageKind::Unsupported => Ok(self.publish_text(UNSUPPORTED_PLACEHOLDER).await),
        };

        let outcome = match attempt {
            Ok(results) => {
                for result in &results {
                    if result.ok {
                        info!("{}: {}", result.destination, result.detail);
                    } else {
                        warn!("{}: {}", result.destination, result.detail);
                    }
                }
                if results.iter().all(|r| r.ok) {
                    Outcome::Delivered
                } else {
                    Outcome::Failed
                }
            }
            Err(e) => {
                error!("Relay failed for chat {}, nothing published: {}", chat_id, e);
                Outcome::Failed
            }
        };

        self.acknowledge(chat_id, outcome).await;
        outcome
    }

    async fn acknowledge(&self, chat_id: i64, outcome: Outcome) {
        let Some(text) = outcome.acknowledgment() else {
            return;
        };
        if let Err(e) = self.source.reply(chat_id, text).await {
            error!("Failed to acknowledge chat {}: {:#}", chat_id, e);
        }
    }

    async fn publish_text(&self, text: &str) -> Vec<PublishResult> {
        let (eitaa, bale) = tokio::join!(self.eitaa.send_text(text), self.bale.send_text(text));
        vec![
            PublishResult::from_attempt(self.eitaa.destination(), "text", eitaa),
            PublishResult::from_attempt(self.bale.destination(), "text", bale),
        ]
    }

    async fn publish_file(
        &self,
        file: &RelayedFile,
        eitaa_caption: Option<&str>,
        bale_caption: Option<&str>,
    ) -> Vec<PublishResult> {
        let (eitaa, bale) = tokio::join!(
            self.eitaa.send_file(file, eitaa_caption),
            self.bale.send_file(file, bale_caption)
        );
        let what = file.category().as_str();
        vec![
            PublishResult::from_attempt(self.eitaa.destination(), what, eitaa),
            PublishResult::from_attempt(self.bale.destination(), what, bale),
        ]
    }

    async fn fetch(
        &self,
        msg: &InboundMessage,
        file_name: Option<&str>,
    ) -> Result<RelayedFile, RelayError> {
        let category = category_of(msg.kind).ok_or(RelayError::MissingHandle)?;
        let handle = msg
            .file_handle
            .as_deref()
            .ok_or(RelayError::MissingHandle)?;
        self.relay.fetch(handle, category, file_name).await
    }

    async fn relay_single(&self, msg: &InboundMessage) -> Result<Vec<PublishResult>, RelayError> {
        let file = self.fetch(msg, msg.file_name.as_deref()).await?;
        let caption = msg.caption.as_deref();
        // `file` drops on return, which removes its scratch copy.
        Ok(self.publish_file(&file, caption, caption).await)
    }

    /// All members are relayed before anything is published, so one bad
    /// download aborts the whole album.
    async fn relay_album(
        &self,
        members: &[InboundMessage],
    ) -> Result<Vec<PublishResult>, RelayError> {
        let names: Vec<String> = members
            .iter()
            .map(|m| format!("photo_{}.jpg", m.file_handle.as_deref().unwrap_or_default()))
            .collect();
        let files = try_join_all(
            members
                .iter()
                .zip(&names)
                .map(|(member, name)| self.fetch(member, Some(name.as_str()))),
        )
        .await?;

        info!("Relaying album of {} photos", files.len());

        let mut results = Vec::with_capacity(files.len() * 2 + 2);
        for (member, file) in members.iter().zip(&files) {
            results.extend(
                self.publish_file(file, None, member.caption.as_deref())
                    .await,
            );
        }
        drop(files);

        let summary = album_summary(members);
        results.extend(self.publish_text(&summary).await);
        Ok(results)
    }
}

fn category_of(kind: MessageKind) -> Option<FileCategory> {
    match kind {
        MessageKind::Photo => Some(FileCategory::Photo),
        MessageKind::Video => Some(FileCategory::Video),
        MessageKind::Audio => Some(FileCategory::Audio),
        MessageKind::Document => Some(FileCategory::Document),
        MessageKind::Text | MessageKind::Unsupported => None,
    }
}

/// `Album: <caption>` followed by one file reference per line.
fn album_summary(members: &[InboundMessage]) -> String {
    let caption = members
        .first()
        .and_then(|m| m.caption.as_deref())
        .unwrap_or("Album");
    let handles: Vec<&str> = members
        .iter()
        .filter_map(|m| m.file_handle.as_deref())
        .collect();
    format!("Album: {}\n{}", caption, handles.join("\n"))
}
