use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::intake::ContentKind;

/// A message that was sent or received, addressable for replies and deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Transport-side metadata of an attachment, fetched without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub handle: String,
    /// Size as reported by the transport, if it reports one.
    pub size: Option<u64>,
    /// Transport-specific retrieval path.
    pub path: Option<String>,
}

/// The messaging system requests arrive from and replies go back through.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Look up an attachment's metadata. Does not download it.
    async fn file_info(&self, handle: &str) -> Result<RemoteFile>;

    /// Download an attachment to `dest`, returning the number of bytes written.
    async fn download(&self, file: &RemoteFile, dest: &Path) -> Result<u64>;

    /// Reply to `to` with plain text.
    async fn reply(&self, to: MessageRef, text: &str) -> Result<MessageRef>;

    /// Delete a message the bot sent earlier.
    async fn delete(&self, message: MessageRef) -> Result<()>;

    /// Send a local file to the operator for auditing.
    async fn forward_to_operator(&self, kind: &ContentKind, path: &Path) -> Result<()>;

    /// Send a text notice to the operator.
    async fn notify_operator(&self, text: &str) -> Result<()>;
}
