//! External message channels: the mail provider the leads arrive on and the
//! chat channel that mirrors pipeline narration.

pub mod email;
pub mod telegram;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::pipeline::types::InboundMessage;

pub use email::{EmailConfig, ImapSmtpMailbox};
pub use telegram::{TelegramConfig, TelegramNotifier};

/// A threaded reply carrying one attachment.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: PathBuf,
    /// Identifier of the message being answered.
    pub in_reply_to: String,
    /// Conversation the reply must attach to.
    pub thread_id: Option<String>,
}

/// Mail provider collaborator.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// The newest inbound message, if the inbox has any.
    ///
    /// Not guaranteed to be monotonic: the same message may be returned again.
    async fn fetch_latest(&self) -> Result<Option<InboundMessage>, ChannelError>;

    /// Send a reply that threads under the original conversation.
    async fn send_reply(&self, reply: &ReplyRequest) -> Result<(), ChannelError>;
}

/// Chat notification collaborator.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    async fn send_text(&self, text: &str) -> Result<(), ChannelError>;

    async fn send_file(&self, path: &Path) -> Result<(), ChannelError>;
}
