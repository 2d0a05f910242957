use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use twilight_cache_inmemory::{DefaultInMemoryCache, ResourceType};
use twilight_gateway::{Event, EventTypeFlags, Intents, Shard, ShardId, StreamExt as _};
use twilight_http::error::ErrorType;
use twilight_http::Client as HttpClient;
use twilight_model::channel::message::sticker::{MessageSticker, StickerFormatType};
use twilight_model::channel::message::{Embed, Message, MessageType};
use twilight_model::channel::ChannelType;
use twilight_model::http::attachment::Attachment;
use twilight_model::id::marker::{ChannelMarker, GuildMarker, MessageMarker, UserMarker};
use twilight_model::id::Id;
use twilight_model::user::User;
use twilight_util::builder::embed::{EmbedAuthorBuilder, EmbedBuilder, ImageSource};

use crate::platform::{
    AttachmentRef, Author, ChannelRef, ChatPlatform, EmbedSnapshot, IncomingMessage, MessageKind,
    MessageRef, NotificationEmbed, OutboundFile, OutboundNotification, StickerRef,
};
use crate::relay::Relay;

/// Discord over the twilight gateway and REST client.
pub struct DiscordPlatform {
    token: String,
    http: Arc<HttpClient>,
    cache: DefaultInMemoryCache,
    downloads: reqwest::Client,
    relay_user: Id<UserMarker>,
}

impl DiscordPlatform {
    /// Build the REST client and find out which user the relay posts as.
    pub async fn connect(token: &str) -> Result<Self> {
        let http = Arc::new(
            HttpClient::builder()
                .token(token.to_string())
                .timeout(Duration::from_secs(30))
                .build(),
        );

        let me = http
            .current_user()
            .await
            .context("Failed to fetch the bot user")?
            .model()
            .await
            .context("Failed to parse the bot user")?;
        info!("Authenticated as {} (ID={})", me.name, me.id);

        let cache = DefaultInMemoryCache::builder()
            .resource_types(ResourceType::GUILD | ResourceType::CHANNEL)
            .build();

        let downloads = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build download client")?;

        Ok(Self {
            token: token.to_string(),
            http,
            cache,
            downloads,
            relay_user: me.id,
        })
    }

    async fn channel_name(&self, channel_id: Id<ChannelMarker>) -> String {
        let cached = self
            .cache
            .channel(channel_id)
            .and_then(|channel| channel.name.clone());
        if let Some(name) = cached {
            return name;
        }

        let fetched = match self.http.channel(channel_id).await {
            Ok(response) => response.model().await.ok().and_then(|c| c.name),
            Err(e) => {
                warn!("Failed to fetch channel {}: {}", channel_id, e);
                None
            }
        };
        fetched.unwrap_or_else(|| channel_id.to_string())
    }

    fn cached_channel(&self, guild_id: Id<GuildMarker>, name: &str) -> Option<Option<ChannelRef>> {
        let ids = self.cache.guild_channels(guild_id)?;
        let found = ids.value().iter().find_map(|id| {
            let channel = self.cache.channel(*id)?;
            (channel.kind == ChannelType::GuildText && channel.name.as_deref() == Some(name)).then(
                || ChannelRef {
                    id: id.get(),
                    name: name.to_string(),
                },
            )
        });
        Some(found)
    }

    async fn convert(&self, message: &Message) -> IncomingMessage {
        let kind = message_kind(message.kind);
        let reference = if kind == MessageKind::Reply {
            message.reference.as_ref().and_then(|r| {
                Some(MessageRef {
                    channel_id: r.channel_id.unwrap_or(message.channel_id).get(),
                    message_id: r.message_id?.get(),
                })
            })
        } else {
            None
        };

        IncomingMessage {
            id: message.id.get(),
            guild_id: message.guild_id.map(Id::get),
            channel: ChannelRef {
                id: message.channel_id.get(),
                name: self.channel_name(message.channel_id).await,
            },
            author: Author {
                id: message.author.id.get(),
                display_name: display_name(message),
                avatar_url: avatar_url(&message.author),
                is_relay: message.author.id == self.relay_user,
            },
            kind,
            text: message.content.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|a| AttachmentRef {
                    url: a.url.clone(),
                    filename: a.filename.clone(),
                    content_type: a.content_type.clone(),
                })
                .collect(),
            stickers: message.sticker_items.iter().map(sticker_ref).collect(),
            embeds: message.embeds.iter().map(embed_snapshot).collect(),
            reference,
        }
    }

    async fn download(&self, files: &[OutboundFile]) -> Vec<Attachment> {
        let mut attachments = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            match self.fetch_bytes(&file.url).await {
                Ok(bytes) => attachments.push(Attachment::from_bytes(
                    file.filename.clone(),
                    bytes,
                    index as u64,
                )),
                Err(e) => warn!("Failed to download {}: {:#}", file.url, e),
            }
        }
        attachments
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .downloads
            .get(url)
            .send()
            .await
            .context("Failed to request attachment")?
            .error_for_status()?
            .bytes()
            .await
            .context("Failed to read attachment body")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn find_channel(&self, guild_id: u64, name: &str) -> Result<Option<ChannelRef>> {
        let Some(guild_id) = Id::<GuildMarker>::new_checked(guild_id) else {
            return Ok(None);
        };
        if let Some(found) = self.cached_channel(guild_id, name) {
            return Ok(found);
        }

        debug!("Channel cache miss for guild {}, asking the API", guild_id);
        let channels = self
            .http
            .guild_channels(guild_id)
            .await
            .context("Failed to list guild channels")?
            .models()
            .await
            .context("Failed to parse guild channels")?;

        Ok(channels
            .into_iter()
            .find(|c| c.kind == ChannelType::GuildText && c.name.as_deref() == Some(name))
            .map(|c| ChannelRef {
                id: c.id.get(),
                name: name.to_string(),
            }))
    }

    async fn fetch_message(&self, reference: MessageRef) -> Result<Option<IncomingMessage>> {
        let (Some(channel_id), Some(message_id)) = (
            Id::<ChannelMarker>::new_checked(reference.channel_id),
            Id::<MessageMarker>::new_checked(reference.message_id),
        ) else {
            return Ok(None);
        };

        match self.http.message(channel_id, message_id).await {
            Ok(response) => {
                let message = response
                    .model()
                    .await
                    .context("Failed to parse referenced message")?;
                Ok(Some(self.convert(&message).await))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e).context("Failed to fetch referenced message"),
        }
    }

    async fn publish(&self, channel: &ChannelRef, notification: OutboundNotification) -> Result<()> {
        let channel_id = Id::<ChannelMarker>::new_checked(channel.id)
            .with_context(|| format!("Invalid channel ID: {}", channel.id))?;

        let embeds = notification
            .embeds
            .iter()
            .map(build_embed)
            .collect::<Result<Vec<_>>>()?;
        let attachments = self.download(&notification.files).await;

        let mut request = self.http.create_message(channel_id);
        if let Some(content) = notification.content.as_deref() {
            request = request.content(content);
        }
        if !embeds.is_empty() {
            request = request.embeds(&embeds);
        }
        if !attachments.is_empty() {
            request = request.attachments(&attachments);
        }

        request
            .await
            .with_context(|| format!("Failed to send message to '{}'", channel.name))?;
        Ok(())
    }
}

/// Listen on the gateway and hand every new message to the relay. Each
/// message is processed on its own task so a slow translation only delays
/// that message.
pub async fn run(platform: Arc<DiscordPlatform>, relay: Arc<Relay>) -> Result<()> {
    let intents = Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT;
    let mut shard = Shard::new(ShardId::ONE, platform.token.clone(), intents);

    info!("Starting Discord gateway...");

    let flags = EventTypeFlags::READY
        | EventTypeFlags::MESSAGE_CREATE
        | EventTypeFlags::GUILD_CREATE
        | EventTypeFlags::GUILD_DELETE
        | EventTypeFlags::CHANNEL_CREATE
        | EventTypeFlags::CHANNEL_UPDATE
        | EventTypeFlags::CHANNEL_DELETE;

    while let Some(item) = shard.next_event(flags).await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                error!("Error receiving gateway event: {}", e);
                continue;
            }
        };

        platform.cache.update(&event);

        match event {
            Event::Ready(ready) => {
                info!(
                    "Gateway READY as {} in {} guild(s)",
                    ready.user.name,
                    ready.guilds.len()
                );
            }
            Event::MessageCreate(msg) => {
                let platform = platform.clone();
                let relay = relay.clone();
                // Conversion may hit HTTP for uncached channels; keep it off the event loop.
                tokio::spawn(async move {
                    let incoming = platform.convert(&msg.0).await;
                    let outcome = relay.handle(&incoming).await;
                    debug!("Message {} => {:?}", incoming.id, outcome);
                });
            }
            _ => {}
        }
    }

    warn!("Gateway event stream ended");
    Ok(())
}

fn is_not_found(error: &twilight_http::Error) -> bool {
    matches!(error.kind(), ErrorType::Response { status, .. } if status.get() == 404)
}

fn message_kind(kind: MessageType) -> MessageKind {
    match kind {
        MessageType::Regular | MessageType::ChatInputCommand | MessageType::ContextMenuCommand => {
            MessageKind::Default
        }
        MessageType::Reply => MessageKind::Reply,
        _ => MessageKind::System,
    }
}

fn display_name(message: &Message) -> String {
    message
        .member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .or_else(|| message.author.global_name.clone())
        .unwrap_or_else(|| message.author.name.clone())
}

fn avatar_url(user: &User) -> Option<String> {
    user.avatar.map(|hash| {
        let ext = if hash.is_animated() { "gif" } else { "png" };
        format!("https://cdn.discordapp.com/avatars/{}/{}.{}", user.id, hash, ext)
    })
}

fn sticker_url(id: u64, format: StickerFormatType) -> String {
    let ext = match format {
        StickerFormatType::Gif => "gif",
        StickerFormatType::Lottie => "json",
        _ => "png",
    };
    format!("https://media.discordapp.net/stickers/{id}.{ext}")
}

fn sticker_ref(sticker: &MessageSticker) -> StickerRef {
    StickerRef {
        id: sticker.id.get(),
        name: sticker.name.clone(),
        url: sticker_url(sticker.id.get(), sticker.format_type),
    }
}

fn embed_snapshot(embed: &Embed) -> EmbedSnapshot {
    EmbedSnapshot {
        author_name: embed.author.as_ref().map(|a| a.name.clone()),
        author_icon: embed.author.as_ref().and_then(|a| a.icon_url.clone()),
        description: embed.description.clone(),
        image_url: embed.image.as_ref().map(|i| i.url.clone()),
    }
}

fn build_embed(embed: &NotificationEmbed) -> Result<Embed> {
    let mut builder = EmbedBuilder::new().color(embed.color);

    if let Some(name) = &embed.author_name {
        let mut author = EmbedAuthorBuilder::new(name.clone());
        if let Some(icon) = &embed.author_icon {
            author = author.icon_url(ImageSource::url(icon.clone())?);
        }
        builder = builder.author(author.build());
    }
    if let Some(description) = &embed.description {
        builder = builder.description(description.clone());
    }
    if let Some(image) = &embed.image_url {
        let source = match image.strip_prefix("attachment://") {
            Some(filename) => ImageSource::attachment(filename)?,
            None => ImageSource::url(image.clone())?,
        };
        builder = builder.image(source);
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kinds() {
        assert_eq!(message_kind(MessageType::Regular), MessageKind::Default);
        assert_eq!(message_kind(MessageType::Reply), MessageKind::Reply);
        assert_eq!(message_kind(MessageType::UserJoin), MessageKind::System);
    }

    #[test]
    fn test_sticker_url_by_format() {
        assert_eq!(
            sticker_url(42, StickerFormatType::Png),
            "https://media.discordapp.net/stickers/42.png"
        );
        assert_eq!(
            sticker_url(42, StickerFormatType::Gif),
            "https://media.discordapp.net/stickers/42.gif"
        );
    }

    #[test]
    fn test_build_embed_maps_fields() {
        let embed = build_embed(&NotificationEmbed {
            author_name: Some("Mika said:".to_string()),
            author_icon: Some("https://cdn.discordapp.com/avatars/1/abc.png".to_string()),
            description: Some("こんにちは".to_string()),
            image_url: Some("attachment://map.png".to_string()),
            color: 0x3498db,
        })
        .unwrap();

        let author = embed.author.as_ref().unwrap();
        assert_eq!(author.name, "Mika said:");
        assert_eq!(
            author.icon_url.as_deref(),
            Some("https://cdn.discordapp.com/avatars/1/abc.png")
        );
        assert_eq!(embed.description.as_deref(), Some("こんにちは"));
        assert_eq!(embed.image.as_ref().unwrap().url, "attachment://map.png");
        assert_eq!(embed.color, Some(0x3498db));

        let snapshot = embed_snapshot(&embed);
        assert_eq!(snapshot.author_name.as_deref(), Some("Mika said:"));
        assert_eq!(snapshot.image_url.as_deref(), Some("attachment://map.png"));
    }

    #[test]
    fn test_build_embed_rejects_bad_image_url() {
        let result = build_embed(&NotificationEmbed {
            image_url: Some("ftp://example.com/x.png".to_string()),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
