pub mod telegram;

use async_trait::async_trait;

use crate::relay::RelayError;

/// What an inbound message carries, as far as relaying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Photo,
    Video,
    Audio,
    Document,
    Unsupported,
}

/// A message received from the source platform, normalized for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub sender_id: u64,
    pub chat_id: i64,
    pub message_id: i32,
    pub kind: MessageKind,
    pub text: Option<String>,
    /// Opaque file reference, only meaningful to the source platform
    pub file_handle: Option<String>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    /// Present only for album members
    pub group_id: Option<String>,
}

impl InboundMessage {
    pub fn is_album_member(&self) -> bool {
        self.kind == MessageKind::Photo && self.group_id.is_some()
    }
}

/// The platform messages are relayed from.
#[async_trait]
pub trait SourceChat: Send + Sync {
    /// Fetch the bytes behind a file handle.
    async fn download(&self, handle: &str) -> Result<Vec<u8>, RelayError>;

    /// Send a plain text reply to a chat.
    async fn reply(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
}
