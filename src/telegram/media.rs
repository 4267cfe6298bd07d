//! Mapping Telegram posts onto the routing model, and media download.
//!
//! Bot API media kinds are translated into a [`MediaDescriptor`] carrying
//! the same attribute set the classifier understands, so the classifier
//! never has to know which Telegram field a file came from.

use chrono::Utc;
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::{debug, warn};

use crate::routing::{
    DocumentAttribute, DocumentDescriptor, InboundMessage, MediaDescriptor, MediaKind,
    SourceChannel,
};

/// Largest file the Bot API lets a bot download (20 MB).
pub const MAX_DOWNLOAD_BYTES: u32 = 20_971_520;

/// Mime types Telegram uses for the three sticker formats.
const STATIC_STICKER_MIME: &str = "image/webp";
const ANIMATED_STICKER_MIME: &str = "application/x-tgsticker";
const VIDEO_STICKER_MIME: &str = "video/webm";

/// Build the routing view of a channel post.
pub fn inbound_from_message(msg: &Message) -> InboundMessage {
    let text = msg.text().or_else(|| msg.caption()).map(str::to_owned);
    InboundMessage {
        id: msg.id.0,
        text,
        group_key: msg.media_group_id().map(ToString::to_string),
        media: media_from_message(msg),
        date: msg.date,
        source: source_from_chat(&msg.chat),
    }
}

/// Channel identity: title, falling back to the numeric id.
pub fn source_from_chat(chat: &teloxide::types::Chat) -> SourceChannel {
    SourceChannel {
        id: chat.id.0,
        title: chat
            .title()
            .map_or_else(|| chat.id.0.to_string(), str::to_owned),
        handle: chat.username().map(str::to_owned),
    }
}

/// Describe the media attached to a post, if any.
pub fn media_from_message(msg: &Message) -> Option<MediaDescriptor> {
    if let Some(photos) = msg.photo() {
        // Largest size is last by Telegram convention.
        let photo = photos.last()?;
        return Some(MediaDescriptor {
            file_id: photo.file.id.clone(),
            kind: MediaKind::Photo,
        });
    }

    if let Some(sticker) = msg.sticker() {
        let mime = if sticker.is_video() {
            VIDEO_STICKER_MIME
        } else if sticker.is_animated() {
            ANIMATED_STICKER_MIME
        } else {
            STATIC_STICKER_MIME
        };
        return Some(document(
            &sticker.file.id,
            Some(mime.to_owned()),
            vec![DocumentAttribute::Sticker],
        ));
    }

    if let Some(voice) = msg.voice() {
        let mime = voice
            .mime_type
            .as_ref()
            .map_or_else(|| "audio/ogg".to_owned(), ToString::to_string);
        return Some(document(
            &voice.file.id,
            Some(mime),
            vec![DocumentAttribute::Audio { voice: true }],
        ));
    }

    if let Some(note) = msg.video_note() {
        return Some(document(
            &note.file.id,
            Some("video/mp4".to_owned()),
            vec![DocumentAttribute::Video { round: true }],
        ));
    }

    if let Some(audio) = msg.audio() {
        let mut attributes = vec![DocumentAttribute::Audio { voice: false }];
        push_filename(&mut attributes, audio.file_name.as_deref());
        return Some(document(
            &audio.file.id,
            audio.mime_type.as_ref().map(ToString::to_string),
            attributes,
        ));
    }

    if let Some(video) = msg.video() {
        let mut attributes = vec![DocumentAttribute::Video { round: false }];
        push_filename(&mut attributes, video.file_name.as_deref());
        return Some(document(
            &video.file.id,
            video.mime_type.as_ref().map(ToString::to_string),
            attributes,
        ));
    }

    if let Some(animation) = msg.animation() {
        let mut attributes = vec![DocumentAttribute::Animated];
        push_filename(&mut attributes, animation.file_name.as_deref());
        return Some(document(
            &animation.file.id,
            animation.mime_type.as_ref().map(ToString::to_string),
            attributes,
        ));
    }

    if let Some(doc) = msg.document() {
        let mut attributes = Vec::new();
        push_filename(&mut attributes, doc.file_name.as_deref());
        return Some(document(
            &doc.file.id,
            doc.mime_type.as_ref().map(ToString::to_string),
            attributes,
        ));
    }

    None
}

fn document(
    file_id: &str,
    mime_type: Option<String>,
    attributes: Vec<DocumentAttribute>,
) -> MediaDescriptor {
    MediaDescriptor {
        file_id: file_id.to_owned(),
        kind: MediaKind::Document(DocumentDescriptor {
            mime_type,
            attributes,
        }),
    }
}

fn push_filename(attributes: &mut Vec<DocumentAttribute>, name: Option<&str>) {
    if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
        attributes.push(DocumentAttribute::Filename(sanitize_filename(name)));
    }
}

/// Sanitize a declared filename before it is handed to the sink.
///
/// Replaces path separators (`/`, `\`) with underscores and strips leading
/// dots. Returns a timestamp-based fallback name if the result would be
/// empty.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .replace(['/', '\\'], "_")
        .trim_start_matches('.')
        .to_owned();

    if sanitized.is_empty() {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        format!("file_{timestamp}")
    } else {
        sanitized
    }
}

/// Download a file from Telegram by file ID into memory.
///
/// Returns `None` when:
/// - `get_file` fails (network or auth error)
/// - the file exceeds [`MAX_DOWNLOAD_BYTES`]
/// - `download_file` fails
pub async fn download_bytes(bot: &Bot, file_id: &str) -> Option<Vec<u8>> {
    let file = match bot.get_file(file_id).await {
        Ok(file) => file,
        Err(e) => {
            warn!(file_id, error = %e, "get_file failed");
            return None;
        }
    };

    if file.size > MAX_DOWNLOAD_BYTES {
        warn!(
            file_id,
            size = file.size,
            limit = MAX_DOWNLOAD_BYTES,
            "file exceeds download limit, skipping"
        );
        return None;
    }

    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut buf).await {
        warn!(file_id, error = %e, "download_file failed");
        return None;
    }

    debug!(file_id, bytes = buf.len(), "media downloaded");
    Some(buf)
}
