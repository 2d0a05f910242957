//! Rendering of relay notifications and recovery of attribution from
//! notifications the relay posted earlier.

use std::collections::HashSet;

use crate::platform::{
    AttachmentRef, Author, EmbedSnapshot, IncomingMessage, NotificationEmbed, OutboundFile,
    OutboundNotification, StickerRef,
};

/// Discord's embed description limit.
pub const EMBED_DESCRIPTION_LIMIT: usize = 4096;
/// Discord accepts at most ten embeds and ten files per message.
pub const MAX_EMBEDS: usize = 10;
pub const MAX_FILES: usize = 10;
const QUOTE_LIMIT: usize = 1000;

const SAID: &str = " said:";
const SHARED_IMAGE: &str = " shared an image:";
const SHARED_FILE: &str = " shared a file:";
const SHARED_STICKER: &str = " shared a sticker:";
const REPLYING_TO: &str = "↪ Replying to ";

/// How a forwarded reply describes the message it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyQuote {
    /// The referenced text, translated into the target language.
    Quoted {
        author: String,
        icon: Option<String>,
        text: String,
        link: String,
    },
    Attachment {
        author: String,
        icon: Option<String>,
        filename: String,
        link: String,
    },
    Sticker {
        author: String,
        icon: Option<String>,
        name: String,
        link: String,
    },
    /// Nothing translatable; point at the original.
    Link {
        author: String,
        icon: Option<String>,
        link: String,
    },
}

impl ReplyQuote {
    pub fn author(&self) -> &str {
        match self {
            ReplyQuote::Quoted { author, .. }
            | ReplyQuote::Attachment { author, .. }
            | ReplyQuote::Sticker { author, .. }
            | ReplyQuote::Link { author, .. } => author,
        }
    }

    pub fn link(&self) -> &str {
        match self {
            ReplyQuote::Quoted { link, .. }
            | ReplyQuote::Attachment { link, .. }
            | ReplyQuote::Sticker { link, .. }
            | ReplyQuote::Link { link, .. } => link,
        }
    }

    fn icon(&self) -> Option<String> {
        match self {
            ReplyQuote::Quoted { icon, .. }
            | ReplyQuote::Attachment { icon, .. }
            | ReplyQuote::Sticker { icon, .. }
            | ReplyQuote::Link { icon, .. } => icon.clone(),
        }
    }

    pub fn to_embed(&self, color: u32) -> NotificationEmbed {
        let jump = format!("[Jump to message]({})", self.link());
        let description = match self {
            ReplyQuote::Quoted { text, .. } => {
                format!("> {}\n{}", quote_lines(&truncate(text, QUOTE_LIMIT)), jump)
            }
            ReplyQuote::Attachment {
                author, filename, ..
            } => format!("{author} shared an attachment: `{filename}`\n{jump}"),
            ReplyQuote::Sticker { author, name, .. } => {
                format!("{author} shared a sticker: {name}\n{jump}")
            }
            ReplyQuote::Link { .. } => jump,
        };
        NotificationEmbed {
            author_name: Some(format!("{REPLYING_TO}{}", self.author())),
            author_icon: self.icon(),
            description: Some(description),
            image_url: None,
            color,
        }
    }
}

/// What a relay-authored message originally carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginKind {
    Text(String),
    /// Forwarded image or file, with its file name when it can be recovered.
    Attachment(String),
    Sticker(String),
}

/// Attribution recovered from a relay-authored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOrigin {
    pub author: String,
    pub icon: Option<String>,
    pub kind: OriginKind,
}

/// Recover the original author and payload of a message the relay posted.
///
/// Reply-quote embeds are skipped; the first attributed embed wins. Text
/// that was split over several embeds is joined back together.
pub fn relay_origin(message: &IncomingMessage) -> Option<RelayOrigin> {
    let mut embeds = message.embeds.iter().skip_while(|e| is_reply_quote(e));
    let first = embeds.next()?;
    let name = first.author_name.as_deref()?;

    if let Some(author) = name.strip_suffix(SAID) {
        let mut text = first.description.clone().unwrap_or_default();
        for continuation in embeds.take_while(|e| e.author_name.is_none()) {
            if let Some(more) = &continuation.description {
                text.push_str(more);
            }
        }
        return Some(RelayOrigin {
            author: author.to_string(),
            icon: first.author_icon.clone(),
            kind: OriginKind::Text(text),
        });
    }

    let (author, kind) = if let Some(author) = name.strip_suffix(SHARED_IMAGE) {
        (author, OriginKind::Attachment(image_label(first)))
    } else if let Some(author) = name.strip_suffix(SHARED_FILE) {
        let label = first
            .description
            .as_deref()
            .map(|d| d.trim_matches('`').to_string())
            .unwrap_or_else(|| "file".to_string());
        (author, OriginKind::Attachment(label))
    } else if let Some(author) = name.strip_suffix(SHARED_STICKER) {
        let label = first.description.clone().unwrap_or_default();
        (author, OriginKind::Sticker(label))
    } else {
        return None;
    };
    Some(RelayOrigin {
        author: author.to_string(),
        icon: first.author_icon.clone(),
        kind,
    })
}

/// Last path segment of the embed image, without query string.
fn image_label(embed: &EmbedSnapshot) -> String {
    embed
        .image_url
        .as_deref()
        .and_then(|url| url.split(['?', '#']).next())
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(|name| name.trim_start_matches("attachment://").to_string())
        .unwrap_or_else(|| "image".to_string())
}

fn is_reply_quote(embed: &EmbedSnapshot) -> bool {
    embed
        .author_name
        .as_deref()
        .is_some_and(|n| n.starts_with(REPLYING_TO))
}

/// Embeds carrying a translated text, split to fit the description limit.
/// Only the first chunk is attributed.
pub fn translated_embeds(author: &Author, text: &str, color: u32) -> Vec<NotificationEmbed> {
    split_message(text, EMBED_DESCRIPTION_LIMIT)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| NotificationEmbed {
            author_name: (i == 0).then(|| format!("{}{SAID}", author.display_name)),
            author_icon: if i == 0 { author.avatar_url.clone() } else { None },
            description: Some(chunk),
            image_url: None,
            color,
        })
        .collect()
}

/// Embeds and re-uploads forwarding a message's attachments and stickers.
pub fn media_payload(
    author: &Author,
    attachments: &[AttachmentRef],
    stickers: &[StickerRef],
    color: u32,
) -> (Vec<NotificationEmbed>, Vec<OutboundFile>) {
    let mut embeds = Vec::new();
    let mut files = Vec::new();
    let mut taken = HashSet::new();

    for attachment in attachments.iter().take(MAX_FILES) {
        let filename = upload_name(&attachment.filename, files.len(), &mut taken);
        let (suffix, image_url, description) = if attachment.is_image() {
            (SHARED_IMAGE, Some(format!("attachment://{filename}")), None)
        } else {
            (SHARED_FILE, None, Some(format!("`{}`", attachment.filename)))
        };
        embeds.push(NotificationEmbed {
            author_name: Some(format!("{}{suffix}", author.display_name)),
            author_icon: author.avatar_url.clone(),
            description,
            image_url,
            color,
        });
        files.push(OutboundFile {
            url: attachment.url.clone(),
            filename,
        });
    }

    for sticker in stickers {
        embeds.push(NotificationEmbed {
            author_name: Some(format!("{}{SHARED_STICKER}", author.display_name)),
            author_icon: author.avatar_url.clone(),
            description: Some(sticker.name.clone()),
            image_url: Some(sticker.url.clone()),
            color,
        });
    }

    (embeds, files)
}

/// Assemble the notification for one target channel.
pub fn compose(
    reply: Option<&ReplyQuote>,
    body: Vec<NotificationEmbed>,
    media: (Vec<NotificationEmbed>, Vec<OutboundFile>),
    color: u32,
) -> OutboundNotification {
    let (media_embeds, files) = media;
    let mut embeds = Vec::with_capacity(body.len() + media_embeds.len() + 1);
    if let Some(reply) = reply {
        embeds.push(reply.to_embed(color));
    }
    embeds.extend(body);
    embeds.extend(media_embeds);
    embeds.truncate(MAX_EMBEDS);
    OutboundNotification {
        content: None,
        embeds,
        files,
    }
}

/// Verbatim copy of a platform notice, files included.
pub fn mirror(message: &IncomingMessage) -> OutboundNotification {
    let mut taken = HashSet::new();
    let files = message
        .attachments
        .iter()
        .take(MAX_FILES)
        .enumerate()
        .map(|(i, a)| OutboundFile {
            url: a.url.clone(),
            filename: upload_name(&a.filename, i, &mut taken),
        })
        .collect();
    OutboundNotification {
        content: message.has_text().then(|| message.text.clone()),
        embeds: Vec::new(),
        files,
    }
}

/// Split long text at newline or space boundaries into chunks of at most
/// `max_len` characters.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());

        let actual_end = if end < rest.len() {
            rest[..end]
                .rfind('\n')
                .or_else(|| rest[..end].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(rest[..actual_end].to_string());
        rest = &rest[actual_end..];
    }

    chunks
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}…", &text[..i]),
        None => text.to_string(),
    }
}

fn quote_lines(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join("\n> ")
}

/// Sanitized upload name, prefixed with its index when another file in the
/// same message already cleaned to the same name.
fn upload_name(name: &str, index: usize, taken: &mut HashSet<String>) -> String {
    let base = sanitize_filename(name, index);
    let mut candidate = base.clone();
    let mut n = index;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{n}_{base}");
        n += 1;
    }
    candidate
}

/// Discord rewrites unusual characters in upload names, which breaks
/// `attachment://` references, so keep names to a safe alphabet.
fn sanitize_filename(name: &str, index: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        format!("file_{index}")
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ChannelRef, MessageKind};

    fn author() -> Author {
        Author {
            id: 7,
            display_name: "Mika".to_string(),
            avatar_url: Some("https://cdn.example.com/mika.png".to_string()),
            is_relay: false,
        }
    }

    fn relay_message(embeds: Vec<EmbedSnapshot>) -> IncomingMessage {
        IncomingMessage {
            id: 3,
            guild_id: Some(1),
            channel: ChannelRef {
                id: 2,
                name: "日本語".to_string(),
            },
            author: Author {
                id: 99,
                display_name: "relay".to_string(),
                avatar_url: None,
                is_relay: true,
            },
            kind: MessageKind::Default,
            text: String::new(),
            attachments: Vec::new(),
            stickers: Vec::new(),
            embeds,
            reference: None,
        }
    }

    fn snapshot(embed: &NotificationEmbed) -> EmbedSnapshot {
        EmbedSnapshot {
            author_name: embed.author_name.clone(),
            author_icon: embed.author_icon.clone(),
            description: embed.description.clone(),
            image_url: embed.image_url.clone(),
        }
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn test_split_prefers_whitespace() {
        let chunks = split_message("aaaa bbbb cccc", 10);
        assert_eq!(chunks, vec!["aaaa bbbb ", "cccc"]);
        assert_eq!(chunks.concat(), "aaaa bbbb cccc");
    }

    #[test]
    fn test_split_multibyte_without_whitespace() {
        let text = "日本語".repeat(5);
        let chunks = split_message(&text, 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_translated_embeds_attribute_first_chunk_only() {
        let text = "word ".repeat(2000);
        let embeds = translated_embeds(&author(), &text, 1);
        assert!(embeds.len() > 1);
        assert_eq!(embeds[0].author_name.as_deref(), Some("Mika said:"));
        assert!(embeds[1..].iter().all(|e| e.author_name.is_none()));
    }

    #[test]
    fn test_relay_origin_round_trips_split_text() {
        let text = "word ".repeat(2000);
        let embeds = translated_embeds(&author(), &text, 1);
        let quote = ReplyQuote::Link {
            author: "Someone".to_string(),
            icon: None,
            link: "https://discord.com/channels/1/2/3".to_string(),
        };
        let mut snapshots = vec![snapshot(&quote.to_embed(1))];
        snapshots.extend(embeds.iter().map(snapshot));

        let origin = relay_origin(&relay_message(snapshots)).unwrap();
        assert_eq!(origin.author, "Mika");
        assert_eq!(origin.icon.as_deref(), Some("https://cdn.example.com/mika.png"));
        assert_eq!(origin.kind, OriginKind::Text(text));
    }

    #[test]
    fn test_relay_origin_for_media() {
        let attachments = vec![AttachmentRef {
            url: "https://cdn.example.com/a b.png".to_string(),
            filename: "a b.png".to_string(),
            content_type: Some("image/png".to_string()),
        }];
        let stickers = vec![StickerRef {
            id: 5,
            name: "wave".to_string(),
            url: "https://media.discordapp.net/stickers/5.png".to_string(),
        }];
        let (embeds, files) = media_payload(&author(), &attachments, &stickers, 1);

        assert_eq!(files[0].filename, "a_b.png");
        assert_eq!(embeds[0].image_url.as_deref(), Some("attachment://a_b.png"));

        let image = relay_message(vec![snapshot(&embeds[0])]);
        assert_eq!(
            relay_origin(&image).unwrap().kind,
            OriginKind::Attachment("a_b.png".to_string())
        );

        // After upload the platform reports a CDN URL instead.
        let mut uploaded = snapshot(&embeds[0]);
        uploaded.image_url =
            Some("https://cdn.discordapp.com/attachments/1/2/a_b.png?ex=1&is=2".to_string());
        assert_eq!(
            relay_origin(&relay_message(vec![uploaded])).unwrap().kind,
            OriginKind::Attachment("a_b.png".to_string())
        );

        let sticker = relay_origin(&relay_message(vec![snapshot(&embeds[1])])).unwrap();
        assert_eq!(sticker.author, "Mika");
        assert_eq!(sticker.kind, OriginKind::Sticker("wave".to_string()));
    }

    #[test]
    fn test_relay_origin_ignores_unattributed() {
        assert!(relay_origin(&relay_message(Vec::new())).is_none());
        let plain = EmbedSnapshot {
            author_name: Some("Patch notes".to_string()),
            ..Default::default()
        };
        assert!(relay_origin(&relay_message(vec![plain])).is_none());
    }

    #[test]
    fn test_attachment_quote_mentions_author_and_link() {
        let quote = ReplyQuote::Attachment {
            author: "Mika".to_string(),
            icon: None,
            filename: "map.png".to_string(),
            link: "https://discord.com/channels/1/2/3".to_string(),
        };
        let embed = quote.to_embed(1);
        assert_eq!(embed.author_name.as_deref(), Some("↪ Replying to Mika"));
        let description = embed.description.unwrap();
        assert!(description.contains("Mika shared an attachment: `map.png`"));
        assert!(description.contains("(https://discord.com/channels/1/2/3)"));
    }

    #[test]
    fn test_compose_caps_embeds() {
        let body = vec![NotificationEmbed::default(); 12];
        let notification = compose(None, body, (Vec::new(), Vec::new()), 1);
        assert_eq!(notification.embeds.len(), MAX_EMBEDS);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("スクショ.png", 0), "____.png");
        assert_eq!(sanitize_filename("...", 3), "file_3");
        assert_eq!(sanitize_filename("ok-name_1.jpg", 0), "ok-name_1.jpg");
    }

    #[test]
    fn test_colliding_upload_names_stay_distinct() {
        let attachments: Vec<AttachmentRef> = ["画像.png", "写真.png", "__.png"]
            .iter()
            .enumerate()
            .map(|(i, name)| AttachmentRef {
                url: format!("https://cdn.example/{i}"),
                filename: name.to_string(),
                content_type: Some("image/png".to_string()),
            })
            .collect();

        let (embeds, files) = media_payload(&author(), &attachments, &[], 0);

        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["__.png", "1___.png", "2___.png"]);
        let images: Vec<_> = embeds
            .iter()
            .filter_map(|e| e.image_url.as_deref())
            .collect();
        assert_eq!(
            images,
            vec![
                "attachment://__.png",
                "attachment://1___.png",
                "attachment://2___.png"
            ]
        );
    }
}
