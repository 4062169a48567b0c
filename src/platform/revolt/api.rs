//! Revolt REST and Autumn (file server) surface.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::platform::Platform;

pub const REVOLT_API_BASE: &str = "https://api.revolt.chat";
pub const AUTUMN_BASE: &str = "https://autumn.revolt.chat";

const BOT_TOKEN_HEADER: &str = "x-bot-token";

// ── Wire Types ───────────────────────────────────────────────────────────────

/// A file stored on Autumn.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RevoltFile {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RevoltUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<RevoltFile>,
    /// Present only on bot accounts.
    #[serde(default)]
    pub bot: Option<Value>,
}

impl RevoltUser {
    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RevoltChannel {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RevoltMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel: String,
    pub author: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<RevoltFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasqueradePayload {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendMessagePayload {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<MasqueradePayload>,
    /// Autumn file ids.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SentMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

// ── Trait ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait RevoltApi: Send + Sync {
    async fn fetch_user(&self, user_id: &str) -> Result<RevoltUser>;

    async fn get_channel(&self, channel_id: &str) -> Result<RevoltChannel>;

    async fn send_message(
        &self,
        channel_id: &str,
        payload: &SendMessagePayload,
    ) -> Result<SentMessage>;

    /// Fetch `source_url` and store it on Autumn. Returns the file id.
    async fn upload_attachment(&self, source_url: &str) -> Result<String>;
}

// ── HTTP Implementation ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RevoltHttp {
    client: Client,
    api_url: String,
    autumn_url: String,
    token: String,
}

impl RevoltHttp {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        autumn_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            autumn_url: autumn_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.header(BOT_TOKEN_HEADER, &self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Api {
            platform: Platform::Revolt,
            status: status.as_u16(),
            body,
        })
    }

    async fn try_upload(&self, source_url: &str) -> std::result::Result<String, String> {
        let source = self
            .client
            .get(source_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("fetch failed: {e}"))?;
        let content_type = source
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = source.bytes().await.map_err(|e| format!("read failed: {e}"))?;

        let part = Part::bytes(bytes.to_vec())
            .file_name(upload_file_name(source_url, &content_type))
            .mime_str(&content_type)
            .map_err(|e| format!("bad content type: {e}"))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/attachments", self.autumn_url))
            .header(BOT_TOKEN_HEADER, &self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("upload failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Autumn returned {status}: {body}"));
        }
        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| format!("bad Autumn response: {e}"))?;
        Ok(uploaded.id)
    }
}

#[async_trait]
impl RevoltApi for RevoltHttp {
    async fn fetch_user(&self, user_id: &str) -> Result<RevoltUser> {
        let request = self.client.get(format!("{}/users/{}", self.api_url, user_id));
        self.send(request).await
    }

    async fn get_channel(&self, channel_id: &str) -> Result<RevoltChannel> {
        let request = self
            .client
            .get(format!("{}/channels/{}", self.api_url, channel_id));
        match self.send(request).await {
            Err(RelayError::Api { status, .. }) if status == 403 || status == 404 => {
                Err(RelayError::InvalidChannel {
                    channel: channel_id.to_string(),
                    reason: "Invalid channel or missing permissions".into(),
                })
            }
            other => other,
        }
    }

    async fn send_message(
        &self,
        channel_id: &str,
        payload: &SendMessagePayload,
    ) -> Result<SentMessage> {
        let request = self
            .client
            .post(format!("{}/channels/{}/messages", self.api_url, channel_id))
            .header("Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .json(payload);
        self.send(request).await
    }

    async fn upload_attachment(&self, source_url: &str) -> Result<String> {
        self.try_upload(source_url)
            .await
            .map_err(|reason| RelayError::UploadFailed {
                url: source_url.to_string(),
                reason,
            })
    }
}

/// Last path segment of `url`, or a name derived from the MIME subtype.
fn upload_file_name(url: &str, content_type: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if name.contains('.') => name.to_string(),
        _ => {
            let ext = content_type
                .split('/')
                .nth(1)
                .and_then(|s| s.split(';').next())
                .unwrap_or("bin");
            format!("image.{ext}")
        }
    }
}
