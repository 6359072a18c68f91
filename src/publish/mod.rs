pub mod bale;
pub mod eitaa;

use async_trait::async_trait;
use thiserror::Error;

use crate::relay::RelayedFile;

pub use bale::BalePublisher;
pub use eitaa::EitaaPublisher;

/// The platforms messages are relayed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Eitaa,
    Bale,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Eitaa => write!(f, "eitaa"),
            Destination::Bale => write!(f, "bale"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("missing configuration `{0}`")]
    NotConfigured(&'static str),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    /// The destination answered but refused the message.
    #[error("rejected by destination: {0}")]
    Rejected(String),

    #[error("failed to read scratch file: {0}")]
    LocalFile(#[from] std::io::Error),
}

/// Outcome of one publish attempt against one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishResult {
    pub destination: Destination,
    pub ok: bool,
    pub detail: String,
}

impl PublishResult {
    pub fn from_attempt(
        destination: Destination,
        what: &str,
        attempt: Result<(), PublishError>,
    ) -> Self {
        match attempt {
            Ok(()) => Self {
                destination,
                ok: true,
                detail: format!("{} sent", what),
            },
            Err(e) => Self {
                destination,
                ok: false,
                detail: format!("{} failed: {}", what, e),
            },
        }
    }
}

/// A destination platform that accepts relayed content.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn destination(&self) -> Destination;

    async fn send_text(&self, text: &str) -> Result<(), PublishError>;

    async fn send_file(
        &self,
        file: &RelayedFile,
        caption: Option<&str>,
    ) -> Result<(), PublishError>;
}

/// Captions are only sent when they carry text.
pub(crate) fn non_empty_caption(caption: Option<&str>) -> Option<&str> {
    caption.filter(|c| !c.is_empty())
}
