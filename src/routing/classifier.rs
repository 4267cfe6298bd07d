//! Media classification: source attachment → sink category, mime, filename.
//!
//! Documents are matched against [`DOCUMENT_RULES`] top to bottom; the first
//! rule whose predicate holds decides the outcome. Adding an attribute
//! variant means adding a flag to [`AttributeFlags`] and, if it needs its
//! own outcome, a row to the table.

use std::collections::HashSet;

use super::{
    ClassifiedMedia, DocumentAttribute, DocumentDescriptor, MediaCategory, MediaDescriptor,
    MediaKind,
};

/// Mime types the WhatsApp Cloud API accepts for media messages.
pub const SINK_SUPPORTED_MIMES: &[&str] = &[
    "audio/aac",
    "audio/mp4",
    "audio/mpeg",
    "audio/amr",
    "audio/ogg",
    "audio/opus",
    "application/vnd.ms-powerpoint",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/pdf",
    "text/plain",
    "application/vnd.ms-excel",
    "image/jpeg",
    "image/png",
    "image/webp",
    "video/mp4",
    "video/3gpp",
];

/// Mime used when a document does not declare one.
const FALLBACK_MIME: &str = "application/octet-stream";

/// Filename used when a document does not declare one.
const FALLBACK_FILENAME: &str = "file";

/// Set of mime types the sink accepts, built from the static table plus
/// operator-configured extras.
#[derive(Debug, Clone)]
pub struct SupportedMimes {
    mimes: HashSet<String>,
}

impl SupportedMimes {
    /// Static table extended with `extra` entries.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut mimes: HashSet<String> =
            SINK_SUPPORTED_MIMES.iter().map(|m| (*m).to_owned()).collect();
        mimes.extend(extra.into_iter().map(Into::into));
        Self { mimes }
    }

    /// Whether `mime` can be delivered to the sink.
    pub fn contains(&self, mime: &str) -> bool {
        self.mimes.contains(mime)
    }
}

impl Default for SupportedMimes {
    fn default() -> Self {
        Self::with_extra(std::iter::empty::<String>())
    }
}

/// Attribute summary collected in one pass over a document's attributes.
#[derive(Debug, Default, Clone, Copy)]
struct AttributeFlags<'a> {
    filename: Option<&'a str>,
    video: bool,
    round: bool,
    audio: bool,
    voice: bool,
    sticker: bool,
    animated: bool,
}

impl<'a> AttributeFlags<'a> {
    fn collect(attributes: &'a [DocumentAttribute]) -> Self {
        let mut flags = Self::default();
        for attribute in attributes {
            match attribute {
                DocumentAttribute::Filename(name) => flags.filename = Some(name.as_str()),
                DocumentAttribute::Video { round } => {
                    flags.video = true;
                    flags.round |= *round;
                }
                DocumentAttribute::Audio { voice } => {
                    flags.audio = true;
                    flags.voice |= *voice;
                }
                DocumentAttribute::Sticker => flags.sticker = true,
                DocumentAttribute::Animated => flags.animated = true,
            }
        }
        flags
    }
}

/// How a rule picks the outgoing mime type.
#[derive(Debug, Clone, Copy)]
enum MimeChoice {
    Declared,
    Forced(&'static str),
}

/// How a rule picks the outgoing filename.
#[derive(Debug, Clone, Copy)]
enum FilenameChoice {
    Declared,
    Forced(&'static str),
}

/// One row of the document classification table.
struct DocumentRule {
    name: &'static str,
    matches: fn(&AttributeFlags<'_>) -> bool,
    category: MediaCategory,
    mime: MimeChoice,
    filename: FilenameChoice,
}

/// Priority-ordered classification rules for documents.
const DOCUMENT_RULES: &[DocumentRule] = &[
    DocumentRule {
        name: "sticker",
        matches: |f| f.sticker,
        category: MediaCategory::Sticker,
        mime: MimeChoice::Declared,
        filename: FilenameChoice::Forced("sticker.webp"),
    },
    DocumentRule {
        name: "voice",
        matches: |f| f.voice,
        category: MediaCategory::Audio,
        mime: MimeChoice::Forced("audio/ogg"),
        filename: FilenameChoice::Forced("voice.ogg"),
    },
    DocumentRule {
        name: "audio",
        matches: |f| f.audio,
        category: MediaCategory::Audio,
        mime: MimeChoice::Declared,
        filename: FilenameChoice::Declared,
    },
    DocumentRule {
        name: "video_note",
        matches: |f| f.video && f.round,
        category: MediaCategory::Video,
        mime: MimeChoice::Declared,
        filename: FilenameChoice::Forced("video_note.mp4"),
    },
    DocumentRule {
        name: "video",
        matches: |f| f.video || f.animated,
        category: MediaCategory::Video,
        mime: MimeChoice::Declared,
        filename: FilenameChoice::Declared,
    },
    DocumentRule {
        name: "document",
        matches: |_| true,
        category: MediaCategory::Document,
        mime: MimeChoice::Declared,
        filename: FilenameChoice::Declared,
    },
];

/// Classify the media attached to a message, if any.
pub fn classify(media: Option<&MediaDescriptor>) -> Option<ClassifiedMedia> {
    match media.map(|m| &m.kind) {
        Some(MediaKind::Photo) => classify_parts(true, None),
        Some(MediaKind::Document(doc)) => classify_parts(false, Some(doc)),
        None => classify_parts(false, None),
    }
}

/// Classify from the raw inputs: a photo flag and an optional document.
///
/// A photo wins over any document. Neither present means no media.
pub fn classify_parts(
    has_photo: bool,
    document: Option<&DocumentDescriptor>,
) -> Option<ClassifiedMedia> {
    if has_photo {
        return Some(ClassifiedMedia {
            category: MediaCategory::Image,
            mime_type: "image/jpeg".to_owned(),
            filename: "photo.jpg".to_owned(),
        });
    }

    let document = document?;
    let flags = AttributeFlags::collect(&document.attributes);
    let rule = DOCUMENT_RULES.iter().find(|rule| (rule.matches)(&flags))?;
    tracing::trace!(rule = rule.name, "document classified");

    let mime_type = match rule.mime {
        MimeChoice::Forced(mime) => mime.to_owned(),
        MimeChoice::Declared => document
            .mime_type
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(FALLBACK_MIME)
            .to_owned(),
    };
    let filename = match rule.filename {
        FilenameChoice::Forced(name) => name.to_owned(),
        FilenameChoice::Declared => flags.filename.unwrap_or(FALLBACK_FILENAME).to_owned(),
    };

    Some(ClassifiedMedia {
        category: rule.category,
        mime_type,
        filename,
    })
}
