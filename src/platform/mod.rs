pub mod discord;

use anyhow::Result;
use async_trait::async_trait;

/// A channel the relay can read from or publish into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: u64,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// True when the relay itself posted the message.
    pub is_relay: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Default,
    Reply,
    /// Joins, pins, boosts and other platform notices.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
}

impl AttachmentRef {
    pub fn is_image(&self) -> bool {
        if let Some(content_type) = &self.content_type {
            return content_type.starts_with("image/");
        }
        let lower = self.filename.to_lowercase();
        ["png", "jpg", "jpeg", "gif", "webp"]
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerRef {
    pub id: u64,
    pub name: String,
    pub url: String,
}

/// The parts of a received embed the relay looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedSnapshot {
    pub author_name: Option<String>,
    pub author_icon: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Pointer from a reply to the message it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// A message received from the chat platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: u64,
    pub guild_id: Option<u64>,
    pub channel: ChannelRef,
    pub author: Author,
    pub kind: MessageKind,
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
    pub stickers: Vec<StickerRef>,
    pub embeds: Vec<EmbedSnapshot>,
    pub reference: Option<MessageRef>,
}

impl IncomingMessage {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn has_media(&self) -> bool {
        !self.attachments.is_empty() || !self.stickers.is_empty()
    }

    pub fn jump_url(&self) -> String {
        let guild = self
            .guild_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "@me".to_string());
        format!(
            "https://discord.com/channels/{}/{}/{}",
            guild, self.channel.id, self.id
        )
    }
}

/// A file to re-upload with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFile {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationEmbed {
    pub author_name: Option<String>,
    pub author_icon: Option<String>,
    pub description: Option<String>,
    /// Either an http(s) URL or `attachment://<filename>`.
    pub image_url: Option<String>,
    pub color: u32,
}

/// Everything published into one target channel for one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundNotification {
    pub content: Option<String>,
    pub embeds: Vec<NotificationEmbed>,
    pub files: Vec<OutboundFile>,
}

impl OutboundNotification {
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, str::is_empty)
            && self.embeds.is_empty()
            && self.files.is_empty()
    }
}

/// Chat platform operations the relay depends on.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Look a text channel up by name within a guild.
    async fn find_channel(&self, guild_id: u64, name: &str) -> Result<Option<ChannelRef>>;

    /// Fetch the message a reply points at.
    async fn fetch_message(&self, reference: MessageRef) -> Result<Option<IncomingMessage>>;

    async fn publish(&self, channel: &ChannelRef, notification: OutboundNotification) -> Result<()>;
}
