//! Per-unit forwarding: filter, classify, fetch, upload, send.
//!
//! A unit is either a single post or a completed album. Filtering happens
//! before any media is fetched, so rejected content never costs a
//! download or an upload.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::album::{AlbumAggregator, CompletedAlbum};
use super::chunker;
use super::classifier::{self, SupportedMimes};
use super::filter::{FilterPipeline, FilterVerdict};
use super::format;
use super::{
    ClassifiedMedia, FeedSource, ForwardError, InboundMessage, Sink, SinkError, SinkLimits,
};

/// Where an inbound message went on intake.
#[derive(Debug, Clone, PartialEq)]
pub enum Intake {
    /// Handed to the album aggregator; its outcome arrives with the album.
    Buffered,
    /// Not part of an album; process it now.
    Immediate(InboundMessage),
}

/// Why a unit was not delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A filter rule rejected the text.
    Filtered {
        /// Name of the rejecting rule.
        rule: String,
    },
    /// The sink cannot carry the media type.
    UnsupportedMedia {
        /// Offending mime type.
        mime_type: String,
    },
}

/// Terminal state of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Joined a pending album.
    Buffered,
    /// Content reached the sink.
    Delivered {
        /// Number of media items sent (0 for text-only deliveries).
        media: usize,
    },
    /// A notice was sent instead of the content.
    Skipped {
        /// What caused the skip.
        reason: SkipReason,
    },
    /// Nothing was sent.
    Dropped,
}

/// Drives units of work from intake to the sink.
pub struct ForwardingPipeline {
    feed: Arc<dyn FeedSource>,
    sink: Arc<dyn Sink>,
    aggregator: AlbumAggregator,
    filter: Option<FilterPipeline>,
    limits: SinkLimits,
    supported_mimes: SupportedMimes,
}

impl std::fmt::Debug for ForwardingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingPipeline")
            .field("aggregator", &self.aggregator)
            .field("filter", &self.filter)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ForwardingPipeline {
    /// Pipeline with default limits, the static mime table and no filter.
    pub fn new(feed: Arc<dyn FeedSource>, sink: Arc<dyn Sink>, aggregator: AlbumAggregator) -> Self {
        Self {
            feed,
            sink,
            aggregator,
            filter: None,
            limits: SinkLimits::default(),
            supported_mimes: SupportedMimes::default(),
        }
    }

    /// Enable content filtering.
    #[must_use]
    pub fn with_filter(mut self, filter: Option<FilterPipeline>) -> Self {
        self.filter = filter;
        self
    }

    /// Override the sink size limits.
    #[must_use]
    pub fn with_limits(mut self, limits: SinkLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Override the set of deliverable mime types.
    #[must_use]
    pub fn with_supported_mimes(mut self, supported_mimes: SupportedMimes) -> Self {
        self.supported_mimes = supported_mimes;
        self
    }

    /// Route a message: album members go to the aggregator, the rest come
    /// back for immediate processing.
    pub fn intake(&self, message: InboundMessage) -> Intake {
        match message.group_key.clone() {
            Some(group_key) => {
                debug!(
                    channel = %message.source.title,
                    message_id = message.id,
                    group = %group_key,
                    "album member buffered"
                );
                self.aggregator.add(group_key, message);
                Intake::Buffered
            }
            None => Intake::Immediate(message),
        }
    }

    /// [`intake`](Self::intake) followed by processing when the message is
    /// not an album member.
    ///
    /// # Errors
    ///
    /// Returns an error when a direct send to the sink fails.
    pub async fn accept(&self, message: InboundMessage) -> Result<UnitOutcome, ForwardError> {
        match self.intake(message) {
            Intake::Buffered => Ok(UnitOutcome::Buffered),
            Intake::Immediate(message) => self.process_single(&message).await,
        }
    }

    /// Complete every pending album now. Returns how many were flushed.
    pub fn flush_albums(&self) -> usize {
        self.aggregator.flush_all()
    }

    /// Number of albums still buffering.
    pub fn pending_albums(&self) -> usize {
        self.aggregator.pending_count()
    }

    /// Forward a single, non-album message.
    ///
    /// # Errors
    ///
    /// Returns an error when a send to the sink fails. A failed media
    /// download is not an error: the text is sent instead, if any.
    pub async fn process_single(
        &self,
        message: &InboundMessage,
    ) -> Result<UnitOutcome, ForwardError> {
        let channel = message.source.title.as_str();
        let link = self.feed.resolve_chat_link(message);
        let link = link.as_deref();
        let text = message.non_empty_text();

        if let Some(text) = text {
            if let Some(verdict) = self.run_filter(channel, text).await {
                self.send_text(&format::skip_notice(channel, &verdict, link))
                    .await?;
                info!(channel, message_id = message.id, rule = %verdict.rule, "message skipped by filter");
                return Ok(UnitOutcome::Skipped {
                    reason: SkipReason::Filtered { rule: verdict.rule },
                });
            }
        }

        let Some(media) = classifier::classify(message.media.as_ref()) else {
            let Some(text) = text else {
                debug!(channel, message_id = message.id, "empty message dropped");
                return Ok(UnitOutcome::Dropped);
            };
            self.send_text(&format::text_message(channel, message.date, text, link))
                .await?;
            info!(channel, message_id = message.id, "forwarded text");
            return Ok(UnitOutcome::Delivered { media: 0 });
        };

        if !self.supported_mimes.contains(&media.mime_type) {
            self.send_text(&format::unsupported_notice(channel, &media.mime_type, link))
                .await?;
            info!(channel, message_id = message.id, mime = %media.mime_type, "skipped unsupported media");
            return Ok(UnitOutcome::Skipped {
                reason: SkipReason::UnsupportedMedia {
                    mime_type: media.mime_type,
                },
            });
        }

        let caption = format::caption(channel, message.date, text, link);

        let Some(bytes) = self.feed.fetch_media_bytes(message).await else {
            warn!(channel, message_id = message.id, "could not download media");
            return match text {
                Some(text) => {
                    self.send_text(&format::text_message(channel, message.date, text, link))
                        .await?;
                    Ok(UnitOutcome::Delivered { media: 0 })
                }
                None => Ok(UnitOutcome::Dropped),
            };
        };

        let trailing = self
            .deliver_media(&media, bytes, Some(&caption), text.is_some())
            .await?;
        if let Some(trailing) = trailing {
            self.send_text(&trailing).await?;
        }
        info!(channel, message_id = message.id, category = %media.category, "forwarded media");
        Ok(UnitOutcome::Delivered { media: 1 })
    }

    /// Forward a completed album.
    ///
    /// The first non-empty text among the members is the album text; it is
    /// filtered once for the whole album and becomes the caption of the
    /// first member that is actually delivered. Members that are
    /// unsupported, undownloadable, or rejected by the sink are left out.
    ///
    /// # Errors
    ///
    /// Returns an error when the skip notice, the caption overflow, or the
    /// text fallback cannot be sent.
    pub async fn process_album(&self, album: CompletedAlbum) -> Result<UnitOutcome, ForwardError> {
        let CompletedAlbum {
            group_key,
            source,
            messages,
        } = album;
        let Some(first) = messages.first() else {
            return Ok(UnitOutcome::Dropped);
        };

        let channel = source.title.as_str();
        let album_text = messages.iter().find_map(InboundMessage::non_empty_text);
        let link = self.feed.resolve_chat_link(first);
        let link = link.as_deref();
        let timestamp = first.date;

        if let Some(text) = album_text {
            if let Some(verdict) = self.run_filter(channel, text).await {
                self.send_text(&format::skip_notice(channel, &verdict, link))
                    .await?;
                info!(
                    channel,
                    group = %group_key,
                    members = messages.len(),
                    rule = %verdict.rule,
                    "album skipped by filter"
                );
                return Ok(UnitOutcome::Skipped {
                    reason: SkipReason::Filtered { rule: verdict.rule },
                });
            }
        }

        let mut caption = Some(format::caption(channel, timestamp, album_text, link));
        let mut delivered: usize = 0;

        for message in &messages {
            let Some(media) = classifier::classify(message.media.as_ref()) else {
                continue;
            };
            if !self.supported_mimes.contains(&media.mime_type) {
                info!(channel, group = %group_key, mime = %media.mime_type, "skipped unsupported album member");
                continue;
            }
            let Some(bytes) = self.feed.fetch_media_bytes(message).await else {
                warn!(channel, group = %group_key, message_id = message.id, "could not download album member");
                continue;
            };

            let delivery = self
                .deliver_media(&media, bytes, caption.as_deref(), album_text.is_some())
                .await;
            match delivery {
                Ok(trailing) => {
                    caption = None;
                    delivered = delivered.saturating_add(1);
                    debug!(channel, group = %group_key, category = %media.category, "forwarded album member");
                    if let Some(trailing) = trailing {
                        self.send_text(&trailing).await?;
                    }
                }
                Err(e) => {
                    warn!(channel, group = %group_key, message_id = message.id, error = %e, "album member delivery failed");
                }
            }
        }

        if delivered > 0 {
            info!(channel, group = %group_key, delivered, "forwarded album");
            return Ok(UnitOutcome::Delivered { media: delivered });
        }

        match album_text {
            Some(text) => {
                self.send_text(&format::text_message(channel, timestamp, text, link))
                    .await?;
                info!(channel, group = %group_key, "forwarded album as text only");
                Ok(UnitOutcome::Delivered { media: 0 })
            }
            None => {
                debug!(channel, group = %group_key, "album had nothing deliverable");
                Ok(UnitOutcome::Dropped)
            }
        }
    }

    /// Evaluate the filter, returning the verdict only when it is a skip.
    async fn run_filter(&self, channel: &str, text: &str) -> Option<FilterVerdict> {
        let filter = self.filter.as_ref()?;
        let verdict = filter.evaluate(text).await;
        info!(
            channel,
            rule = %verdict.rule,
            action = verdict.action.as_str(),
            reason = %verdict.reason,
            "filter verdict"
        );
        verdict.is_skip().then_some(verdict)
    }

    /// Send `text` as one or more messages, each within the text limit.
    async fn send_text(&self, text: &str) -> Result<(), SinkError> {
        for chunk in chunker::split(text, self.limits.max_text_len) {
            self.sink.send_text(&chunk).await?;
        }
        Ok(())
    }

    /// Upload and send one media item.
    ///
    /// Returns the part of the caption that could not ride on the media;
    /// the caller delivers it as trailing text. That is the overflow past
    /// the caption limit, or, for categories without captions, the whole
    /// caption when it carries body text (a bare header is dropped).
    async fn deliver_media(
        &self,
        media: &ClassifiedMedia,
        bytes: Vec<u8>,
        caption: Option<&str>,
        has_body: bool,
    ) -> Result<Option<String>, SinkError> {
        let media_id = self
            .sink
            .upload_media(bytes, &media.mime_type, &media.filename)
            .await?;

        match caption {
            Some(caption) if media.category.accepts_caption() => {
                let (head, overflow) = chunker::split_caption(caption, self.limits.max_caption_len);
                self.sink
                    .send_media(media.category, &media_id, Some(&head))
                    .await?;
                Ok(overflow)
            }
            Some(caption) if has_body => {
                self.sink.send_media(media.category, &media_id, None).await?;
                Ok(Some(caption.to_owned()))
            }
            _ => {
                self.sink.send_media(media.category, &media_id, None).await?;
                Ok(None)
            }
        }
    }
}
