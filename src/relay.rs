use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::{ChannelLanguage, ChannelLanguageMap, RelayConfig};
use crate::notify::{self, OriginKind, ReplyQuote};
use crate::platform::{ChatPlatform, IncomingMessage, MessageKind};
use crate::translator::{Translation, TranslationRequest, Translator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    SystemMessage,
    NoGuild,
    UnmappedChannel,
    NothingToRelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Ignored(IgnoreReason),
    Mirrored,
    Forwarded { published: usize, skipped: usize },
}

enum TargetResult {
    Published,
    Skipped,
}

/// Fans inbound messages out to the other language channels.
pub struct Relay {
    channels: ChannelLanguageMap,
    translator: Translator,
    platform: Arc<dyn ChatPlatform>,
    settings: RelayConfig,
}

impl Relay {
    pub fn new(
        channels: ChannelLanguageMap,
        translator: Translator,
        platform: Arc<dyn ChatPlatform>,
        settings: RelayConfig,
    ) -> Self {
        Self {
            channels,
            translator,
            platform,
            settings,
        }
    }

    /// Process one inbound message to completion. Failures for individual
    /// targets are logged and counted as skipped.
    pub async fn handle(&self, message: &IncomingMessage) -> RelayOutcome {
        if message.author.is_relay {
            return RelayOutcome::Ignored(IgnoreReason::OwnMessage);
        }

        let Some(guild_id) = message.guild_id else {
            return RelayOutcome::Ignored(IgnoreReason::NoGuild);
        };

        let Some(source_language) = self.channels.language_of(&message.channel.name) else {
            return RelayOutcome::Ignored(IgnoreReason::UnmappedChannel);
        };

        if message.kind == MessageKind::System {
            if !self.settings.mirror_system_messages {
                return RelayOutcome::Ignored(IgnoreReason::SystemMessage);
            }
            let notification = notify::mirror(message);
            if notification.is_empty() {
                return RelayOutcome::Ignored(IgnoreReason::NothingToRelay);
            }
            if let Err(e) = self.platform.publish(&message.channel, notification).await {
                error!("Failed to mirror notice in '{}': {:#}", message.channel.name, e);
            }
            return RelayOutcome::Mirrored;
        }

        if !message.has_text() && !message.has_media() {
            return RelayOutcome::Ignored(IgnoreReason::NothingToRelay);
        }

        info!(
            "Relaying message {} from {} in '{}' ({})",
            message.id, message.author.display_name, message.channel.name, source_language
        );

        let referenced = self.resolve_reference(message).await;

        let tasks = self.channels.targets(&message.channel.name).map(|target| {
            self.relay_to(message, guild_id, source_language, target, referenced.as_ref())
        });
        let results = join_all(tasks).await;

        let published = results
            .iter()
            .filter(|r| matches!(r, TargetResult::Published))
            .count();
        RelayOutcome::Forwarded {
            published,
            skipped: results.len() - published,
        }
    }

    async fn resolve_reference(&self, message: &IncomingMessage) -> Option<IncomingMessage> {
        let reference = message.reference?;
        match self.platform.fetch_message(reference).await {
            Ok(Some(referenced)) => Some(referenced),
            Ok(None) => {
                debug!("Referenced message {} is gone", reference.message_id);
                None
            }
            Err(e) => {
                warn!(
                    "Failed to fetch referenced message {}: {:#}",
                    reference.message_id, e
                );
                None
            }
        }
    }

    async fn relay_to(
        &self,
        message: &IncomingMessage,
        guild_id: u64,
        source_language: &str,
        target: &ChannelLanguage,
        referenced: Option<&IncomingMessage>,
    ) -> TargetResult {
        let channel = match self.platform.find_channel(guild_id, &target.name).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                debug!("Channel '{}' not found, skipping", target.name);
                return TargetResult::Skipped;
            }
            Err(e) => {
                warn!("Failed to look up channel '{}': {:#}", target.name, e);
                return TargetResult::Skipped;
            }
        };

        let color = self.settings.embed_color;

        let body = if message.has_text() {
            let translation = self
                .translator
                .translate(&TranslationRequest {
                    text: &message.text,
                    source_language,
                    target_language: &target.language,
                    channel: &message.channel.name,
                    message_id: message.id,
                    record: true,
                })
                .await;
            if let Translation::Failed(e) = &translation {
                debug!("No translation for '{}' ({}), skipping", target.name, e);
                return TargetResult::Skipped;
            }
            let translated = translation.into_text();
            if translated.is_empty() {
                debug!("No translation for '{}', skipping", target.name);
                return TargetResult::Skipped;
            }
            notify::translated_embeds(&message.author, &translated, color)
        } else {
            Vec::new()
        };

        let reply = match referenced {
            Some(referenced) => Some(self.render_reply(referenced, source_language, target).await),
            None => None,
        };

        let media = notify::media_payload(
            &message.author,
            &message.attachments,
            &message.stickers,
            color,
        );
        let has_media = !media.0.is_empty() || !media.1.is_empty();
        let text_only = (!body.is_empty() && has_media)
            .then(|| notify::compose(reply.as_ref(), body.clone(), Default::default(), color));
        let notification = notify::compose(reply.as_ref(), body, media, color);

        let err = match self.platform.publish(&channel, notification).await {
            Ok(()) => {
                debug!("Published message {} to '{}'", message.id, target.name);
                return TargetResult::Published;
            }
            Err(e) => e,
        };

        // Upload rejected: fall back to the text alone.
        let Some(text_only) = text_only else {
            error!("Failed to publish to '{}': {:#}", target.name, err);
            return TargetResult::Skipped;
        };
        warn!(
            "Failed to publish media to '{}', retrying without it: {:#}",
            target.name, err
        );
        match self.platform.publish(&channel, text_only).await {
            Ok(()) => {
                debug!("Published text of message {} to '{}'", message.id, target.name);
                TargetResult::Published
            }
            Err(e) => {
                error!("Failed to publish to '{}': {:#}", target.name, e);
                TargetResult::Skipped
            }
        }
    }

    /// Describe the message a reply answers, in the target channel's language.
    pub async fn render_reply(
        &self,
        referenced: &IncomingMessage,
        fallback_language: &str,
        target: &ChannelLanguage,
    ) -> ReplyQuote {
        let link = referenced.jump_url();
        let language = self
            .channels
            .language_of(&referenced.channel.name)
            .unwrap_or(fallback_language);

        if referenced.author.is_relay {
            let Some(origin) = notify::relay_origin(referenced) else {
                return ReplyQuote::Link {
                    author: referenced.author.display_name.clone(),
                    icon: referenced.author.avatar_url.clone(),
                    link,
                };
            };
            return match origin.kind {
                OriginKind::Text(text) => {
                    self.quote_text(
                        origin.author,
                        origin.icon,
                        &text,
                        language,
                        referenced,
                        target,
                        link,
                    )
                    .await
                }
                OriginKind::Attachment(filename) => ReplyQuote::Attachment {
                    author: origin.author,
                    icon: origin.icon,
                    filename,
                    link,
                },
                OriginKind::Sticker(name) => ReplyQuote::Sticker {
                    author: origin.author,
                    icon: origin.icon,
                    name,
                    link,
                },
            };
        }

        let author = referenced.author.display_name.clone();
        let icon = referenced.author.avatar_url.clone();

        if referenced.has_text() {
            return self
                .quote_text(author, icon, &referenced.text, language, referenced, target, link)
                .await;
        }
        if let Some(attachment) = referenced.attachments.first() {
            return ReplyQuote::Attachment {
                author,
                icon,
                filename: attachment.filename.clone(),
                link,
            };
        }
        if let Some(sticker) = referenced.stickers.first() {
            return ReplyQuote::Sticker {
                author,
                icon,
                name: sticker.name.clone(),
                link,
            };
        }
        ReplyQuote::Link { author, icon, link }
    }

    #[allow(clippy::too_many_arguments)]
    async fn quote_text(
        &self,
        author: String,
        icon: Option<String>,
        text: &str,
        language: &str,
        referenced: &IncomingMessage,
        target: &ChannelLanguage,
        link: String,
    ) -> ReplyQuote {
        if language == target.language {
            return ReplyQuote::Quoted {
                author,
                icon,
                text: text.trim().to_string(),
                link,
            };
        }

        let translation = self
            .translator
            .translate(&TranslationRequest {
                text,
                source_language: language,
                target_language: &target.language,
                channel: &referenced.channel.name,
                message_id: referenced.id,
                record: false,
            })
            .await;

        match translation.text() {
            Some(translated) => ReplyQuote::Quoted {
                author,
                icon,
                text: translated.to_string(),
                link,
            },
            None => ReplyQuote::Link { author, icon, link },
        }
    }
}
