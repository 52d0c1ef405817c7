//! Minimal Telegram Bot API client: just the calls the bot needs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::intake::{ContentKind, MediaRequest};
use crate::transport::{MessageRef, RemoteFile, Transport};

/// Extra time on top of the long-poll timeout before the HTTP request gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
    pub audio: Option<Attachment>,
    pub video: Option<Attachment>,
    pub voice: Option<Attachment>,
    pub video_note: Option<Attachment>,
    pub document: Option<Attachment>,
    pub photo: Option<Vec<Attachment>>,
}

impl Message {
    pub fn reference(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }

    /// The attachment carried by this message, if any, as a pipeline request.
    pub fn media_request(&self) -> Option<MediaRequest> {
        let (kind, attachment) = if let Some(a) = &self.audio {
            (ContentKind::Audio, a)
        } else if let Some(v) = &self.video {
            (ContentKind::Video, v)
        } else if let Some(v) = &self.voice {
            (ContentKind::Other("voice".into()), v)
        } else if let Some(v) = &self.video_note {
            (ContentKind::Other("video note".into()), v)
        } else if let Some(d) = &self.document {
            (ContentKind::Other("document".into()), d)
        } else {
            (ContentKind::Other("photo".into()), self.photo.as_ref()?.last()?)
        };

        Some(MediaRequest {
            content_kind: kind,
            file_name: attachment.file_name.clone(),
            reported_size: attachment.file_size.unwrap_or(0),
            handle: attachment.file_id.clone(),
        })
    }
}

/// `getFile` result.
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}

pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut request = self.client.post(self.method_url(method)).json(&body);
        if let Some(t) = timeout {
            request = request.timeout(t);
        }
        // Error URLs contain the bot token; strip them.
        let response = request.send().await.map_err(|e| Error::Http(e.without_url()))?;
        unwrap_response(method, response).await
    }

    /// Long-poll for new updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({ "offset": offset, "timeout": timeout_secs, "allowed_updates": ["message"] }),
            Some(Duration::from_secs(timeout_secs) + POLL_GRACE),
        )
        .await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<FileInfo> {
        self.call("getFile", json!({ "file_id": file_id }), None).await
    }

    /// Stream a file from Telegram's file storage into `dest`.
    pub async fn download_file(&self, file_path: &str, dest: &Path) -> Result<u64> {
        let url = format!("{}/file/bot{}/{file_path}", self.api_base, self.token);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Http(e.without_url()))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Http(e.without_url()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(path = %dest.display(), bytes = written, "file downloaded");
        Ok(written)
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<Message> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(id) = reply_to {
            body["reply_parameters"] = json!({
                "message_id": id,
                "allow_sending_without_reply": true,
            });
        }
        self.call("sendMessage", body, None).await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<bool> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
            None,
        )
        .await
    }

    /// Upload a local file with `sendDocument` (field `document`) or `sendVideo` (field `video`).
    pub async fn send_file(
        &self,
        chat_id: i64,
        method: &str,
        field: &str,
        path: &Path,
    ) -> Result<Message> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());
        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field.to_string(), multipart::Part::bytes(bytes).file_name(name));

        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Http(e.without_url()))?;
        unwrap_response(method, response).await
    }
}

async fn unwrap_response<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    let body: ApiResponse<T> = response.json().await.map_err(|e| Error::Http(e.without_url()))?;
    match body {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse { description, .. } => Err(Error::Transport(format!(
            "{method} failed ({status}): {}",
            description.unwrap_or_else(|| "no description".into())
        ))),
    }
}

/// [`Transport`] over the Bot API, with uploads audited to one operator chat.
pub struct TelegramTransport {
    client: Arc<TelegramClient>,
    operator_chat_id: i64,
}

impl TelegramTransport {
    pub fn new(client: Arc<TelegramClient>, operator_chat_id: i64) -> Self {
        Self {
            client,
            operator_chat_id,
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn file_info(&self, handle: &str) -> Result<RemoteFile> {
        let info = self.client.get_file(handle).await?;
        Ok(RemoteFile {
            handle: info.file_id,
            size: info.file_size,
            path: info.file_path,
        })
    }

    async fn download(&self, file: &RemoteFile, dest: &Path) -> Result<u64> {
        let path = file
            .path
            .as_deref()
            .ok_or_else(|| Error::Transport(format!("file {} has no download path", file.handle)))?;
        self.client.download_file(path, dest).await
    }

    async fn reply(&self, to: MessageRef, text: &str) -> Result<MessageRef> {
        let sent = self
            .client
            .send_message(to.chat_id, text, Some(to.message_id))
            .await?;
        Ok(sent.reference())
    }

    async fn delete(&self, message: MessageRef) -> Result<()> {
        self.client
            .delete_message(message.chat_id, message.message_id)
            .await
            .map(|_| ())
    }

    async fn forward_to_operator(&self, kind: &ContentKind, path: &Path) -> Result<()> {
        let (method, field) = match kind {
            ContentKind::Video => ("sendVideo", "video"),
            _ => ("sendDocument", "document"),
        };
        self.client
            .send_file(self.operator_chat_id, method, field, path)
            .await?;
        info!(method, "upload forwarded to operator");
        Ok(())
    }

    async fn notify_operator(&self, text: &str) -> Result<()> {
        self.client
            .send_message(self.operator_chat_id, text, None)
            .await
            .map(|_| ())
    }
}
