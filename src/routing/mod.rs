//! Message routing and aggregation engine.
//!
//! Takes one inbound channel post at a time and turns it into sink
//! deliveries:
//! - [`album::AlbumAggregator`] coalesces posts sharing a media group
//! - [`classifier`] maps source media onto sink categories
//! - [`filter::FilterPipeline`] runs first-skip-wins content rules
//! - [`chunker`] keeps every payload inside the sink's size limits
//! - [`pipeline::ForwardingPipeline`] ties them together per unit of work
//!
//! The feed, the sink and the rule backend are reached only through the
//! traits defined here, so the engine runs the same against the real
//! adapters and against in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::HttpError;

pub mod album;
pub mod chunker;
pub mod classifier;
pub mod filter;
pub mod format;
pub mod pipeline;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// The channel a message was posted in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceChannel {
    /// Feed-scoped chat identifier.
    pub id: i64,
    /// Display label used in headers and notices.
    pub title: String,
    /// Public handle (without `@`), when the channel has one.
    pub handle: Option<String>,
}

/// A single post observed on the source feed.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Feed-scoped message identifier.
    pub id: i32,
    /// Text or caption, if any.
    pub text: Option<String>,
    /// Album marker shared by all posts of one media group.
    pub group_key: Option<String>,
    /// Attached media, if any.
    pub media: Option<MediaDescriptor>,
    /// When the post was published.
    pub date: DateTime<Utc>,
    /// Channel the post came from.
    pub source: SourceChannel,
}

impl InboundMessage {
    /// Returns the text if it contains anything besides whitespace.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Opaque reference to media attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Feed-side file reference used to fetch the bytes.
    pub file_id: String,
    /// What kind of media the feed reported.
    pub kind: MediaKind,
}

/// Shape of attached media as reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// A compressed photo.
    Photo,
    /// Any file-like attachment, described by its attributes.
    Document(DocumentDescriptor),
}

/// Mime type plus attribute set of a file-like attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentDescriptor {
    /// Declared mime type.
    pub mime_type: Option<String>,
    /// Attributes in the order the feed reported them.
    pub attributes: Vec<DocumentAttribute>,
}

/// Closed set of document attributes the classifier understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentAttribute {
    /// Declared original filename.
    Filename(String),
    /// Video stream; `round` marks a circular video note.
    Video {
        /// Whether the video is a round video note.
        round: bool,
    },
    /// Audio stream; `voice` marks a recorded voice message.
    Audio {
        /// Whether the audio is a voice recording.
        voice: bool,
    },
    /// Sticker.
    Sticker,
    /// Animation (GIF-like).
    Animated,
}

/// Sink-facing media category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Audio or voice note.
    Audio,
    /// Generic file.
    Document,
    /// Sticker.
    Sticker,
}

impl MediaCategory {
    /// Wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }

    /// Whether the sink renders a caption for this category.
    pub fn accepts_caption(self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::Document)
    }
}

impl std::fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedMedia {
    /// Sink category.
    pub category: MediaCategory,
    /// Mime type to upload with.
    pub mime_type: String,
    /// Filename to upload with.
    pub filename: String,
}

/// Per-payload size limits enforced by the sink, in characters.
///
/// Defaults are the WhatsApp Cloud API limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkLimits {
    /// Maximum length of a text message body.
    pub max_text_len: usize,
    /// Maximum length of a media caption.
    pub max_caption_len: usize,
}

impl Default for SinkLimits {
    fn default() -> Self {
        Self {
            max_text_len: crate::whatsapp::MAX_TEXT_LEN,
            max_caption_len: crate::whatsapp::MAX_CAPTION_LEN,
        }
    }
}

/// Acknowledgement returned by the sink for a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Sink-assigned message identifier, when reported.
    pub message_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a [`Sink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Transport or status failure talking to the sink.
    #[error("sink request failed: {0}")]
    Http(#[from] HttpError),

    /// The sink answered with a body we could not interpret.
    #[error("sink response parse error: {0}")]
    Parse(String),
}

/// Error that aborts the current unit of work.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// A delivery to the sink failed.
    #[error("delivery failed: {0}")]
    Sink(#[from] SinkError),
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Source side: media download and deep-link resolution.
///
/// Message intake itself is push-based (an mpsc channel owned by the
/// adapter); this trait covers what the pipeline pulls on demand.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Download the bytes of the message's media. `None` when the media is
    /// missing or could not be fetched.
    async fn fetch_media_bytes(&self, message: &InboundMessage) -> Option<Vec<u8>>;

    /// Public deep link to the message, if the chat exposes one.
    fn resolve_chat_link(&self, message: &InboundMessage) -> Option<String>;
}

/// Outbound side: the chat recipient messages are delivered to.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Send a plain text message. The body never exceeds the text limit.
    async fn send_text(&self, text: &str) -> Result<DeliveryReceipt, SinkError>;

    /// Upload media bytes and return the sink's media identifier.
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        filename: &str,
    ) -> Result<String, SinkError>;

    /// Send previously uploaded media, optionally captioned.
    async fn send_media(
        &self,
        category: MediaCategory,
        media_id: &str,
        caption: Option<&str>,
    ) -> Result<DeliveryReceipt, SinkError>;
}

pub use filter::{FilterError, RuleDecision, RuleEvaluator};
