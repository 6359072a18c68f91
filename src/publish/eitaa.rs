use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use super::{non_empty_caption, Destination, PublishError, Publisher};
use crate::config::Config;
use crate::relay::RelayedFile;

pub const EITAA_API_BASE: &str = "https://eitaayar.ir/api";

#[derive(Debug, Deserialize)]
struct EitaaResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Eitaa (eitaayar) API: token in the URL path, multipart bodies, JSON `ok` replies.
pub struct EitaaPublisher {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    channel_identifier: Option<String>,
}

impl EitaaPublisher {
    pub fn new(
        client: reqwest::Client,
        api_token: Option<String>,
        channel_identifier: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: EITAA_API_BASE.to_string(),
            api_token,
            channel_identifier,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            config.eitaa_api_token.clone(),
            config.eitaa_channel_identifier.clone(),
        )
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn chat_id(&self) -> Result<String, PublishError> {
        self.channel_identifier
            .as_deref()
            .map(normalize_channel_identifier)
            .ok_or(PublishError::NotConfigured("eitaachannelidentifier"))
    }

    async fn call(&self, method: &str, form: Form) -> Result<(), PublishError> {
        let token = self
            .api_token
            .as_deref()
            .ok_or(PublishError::NotConfigured("eitaaapitoken"))?;
        let url = format!("{}/{}/{}", self.base_url.trim_end_matches('/'), token, method);

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("Eitaa API response ({}): {}", status, body);

        let parsed: EitaaResponse = serde_json::from_str(&body).map_err(|e| {
            PublishError::InvalidResponse(format!("HTTP {}: {} ({})", status, body, e))
        })?;

        if parsed.ok {
            Ok(())
        } else {
            Err(PublishError::Rejected(parsed.description.unwrap_or(body)))
        }
    }
}

#[async_trait]
impl Publisher for EitaaPublisher {
    fn destination(&self) -> Destination {
        Destination::Eitaa
    }

    async fn send_text(&self, text: &str) -> Result<(), PublishError> {
        let form = Form::new()
            .text("chat_id", self.chat_id()?)
            .text("text", text.to_string());
        self.call("sendMessage", form).await
    }

    async fn send_file(
        &self,
        file: &RelayedFile,
        caption: Option<&str>,
    ) -> Result<(), PublishError> {
        let part = Part::bytes(file.bytes().to_vec()).file_name(file.name().to_string());
        let mut form = Form::new()
            .text("chat_id", self.chat_id()?)
            .part("file", part);
        if let Some(caption) = non_empty_caption(caption) {
            form = form.text("caption", caption.to_string());
        }
        self.call("sendFile", form).await
    }
}

/// Numeric ids pass through; aliases lose their leading `@`.
pub fn normalize_channel_identifier(identifier: &str) -> String {
    if identifier.parse::<i64>().is_ok() {
        identifier.to_string()
    } else {
        identifier.trim_start_matches('@').to_string()
    }
}
