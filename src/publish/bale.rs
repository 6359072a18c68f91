use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tracing::debug;

use super::{non_empty_caption, Destination, PublishError, Publisher};
use crate::config::Config;
use crate::relay::{FileCategory, RelayedFile};

pub const BALE_API_BASE: &str = "https://tapi.bale.ai";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Bale bot API: `bot{token}/{method}`, success decided by HTTP status.
pub struct BalePublisher {
    client: reqwest::Client,
    base_url: String,
    bot_token: Option<String>,
    channel_id: Option<i64>,
}

impl BalePublisher {
    pub fn new(client: reqwest::Client, bot_token: Option<String>, channel_id: Option<i64>) -> Self {
        Self {
            client,
            base_url: BALE_API_BASE.to_string(),
            bot_token,
            channel_id,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            config.bale_bot_token.clone(),
            config.bale_destination_channel_id,
        )
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn channel_id(&self) -> Result<i64, PublishError> {
        self.channel_id
            .ok_or(PublishError::NotConfigured("baledestinationchannelid"))
    }

    fn endpoint(&self, method: &str) -> Result<String, PublishError> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or(PublishError::NotConfigured("balebottoken"))?;
        Ok(format!(
            "{}/bot{}/{}",
            self.base_url.trim_end_matches('/'),
            token,
            method
        ))
    }

    async fn check(response: reqwest::Response) -> Result<(), PublishError> {
        let status = response.status();
        let body = response.text().await?;
        debug!("Bale API response ({}): {}", status, body);

        if status.is_success() {
            Ok(())
        } else {
            Err(PublishError::Rejected(format!("HTTP {}: {}", status, body)))
        }
    }
}

pub fn upload_method(category: FileCategory) -> &'static str {
    match category {
        FileCategory::Photo => "sendPhoto",
        FileCategory::Video => "sendVideo",
        FileCategory::Audio => "sendAudio",
        FileCategory::Document => "sendDocument",
    }
}

#[async_trait]
impl Publisher for BalePublisher {
    fn destination(&self) -> Destination {
        Destination::Bale
    }

    async fn send_text(&self, text: &str) -> Result<(), PublishError> {
        let url = self.endpoint("sendMessage")?;
        let request = SendMessageRequest {
            chat_id: self.channel_id()?,
            text,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        Self::check(response).await
    }

    async fn send_file(
        &self,
        file: &RelayedFile,
        caption: Option<&str>,
    ) -> Result<(), PublishError> {
        let category = file.category();
        let url = self.endpoint(upload_method(category))?;
        let chat_id = self.channel_id()?;

        // Uploads read from the scratch copy on disk.
        let bytes = tokio::fs::read(file.local_path()).await?;
        let part = Part::bytes(bytes).file_name(file.name().to_string());
        let mut form = Form::new()
            .part(category.as_str(), part)
            .text("chat_id", chat_id.to_string());
        if let Some(caption) = non_empty_caption(caption) {
            form = form.text("caption", caption.to_string());
        }

        let response = self.client.post(&url).multipart(form).send().await?;
        Self::check(response).await
    }
}
