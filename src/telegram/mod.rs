//! Telegram feed adapter: channel-post listener and media access.
//!
//! The bot must be a member (admin) of every source channel so the Bot API
//! delivers `channel_post` updates. Posts from chats outside the configured
//! list are ignored. Accepted posts are converted to [`InboundMessage`] and
//! pushed into an mpsc channel; the routing side pulls media through
//! [`TelegramFeed`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use teloxide::dispatching::{ShutdownToken, UpdateFilterExt};
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::routing::format::source_link;
use crate::routing::{FeedSource, InboundMessage};

pub mod media;

// ---------------------------------------------------------------------------
// Channel allow-list
// ---------------------------------------------------------------------------

/// Source channels to listen to, by numeric id or public handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFilter {
    ids: HashSet<i64>,
    handles: HashSet<String>,
}

impl ChannelFilter {
    /// Parse config entries: numeric ids (`-1001234567890`) or handles
    /// (`@news` or `news`, case-insensitive).
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut filter = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match entry.parse::<i64>() {
                Ok(id) => {
                    filter.ids.insert(id);
                }
                Err(_) => {
                    filter
                        .handles
                        .insert(entry.trim_start_matches('@').to_lowercase());
                }
            }
        }
        filter
    }

    /// Whether a chat with this id and optional handle is a source.
    pub fn allows(&self, chat_id: i64, handle: Option<&str>) -> bool {
        self.ids.contains(&chat_id)
            || handle.is_some_and(|h| self.handles.contains(&h.to_lowercase()))
    }

    /// Number of configured entries.
    pub fn len(&self) -> usize {
        self.ids.len().saturating_add(self.handles.len())
    }

    /// Whether no channel is configured.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.handles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Shared dependencies injected into teloxide handlers via `dptree::deps!`.
#[derive(Clone)]
struct ListenerState {
    channels: Arc<ChannelFilter>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

/// Handle to the running update dispatcher.
pub struct TelegramListener {
    shutdown: ShutdownToken,
    handle: JoinHandle<()>,
}

impl TelegramListener {
    /// Stop polling for updates and wait for the dispatcher to exit.
    pub async fn stop(self) {
        match self.shutdown.shutdown() {
            Ok(done) => done.await,
            Err(_) => debug!("telegram dispatcher was not running"),
        }
        if let Err(e) = self.handle.await {
            warn!(error = %e, "telegram dispatcher task failed");
        }
    }
}

/// Start listening for channel posts.
///
/// Returns immediately. The dispatcher runs as a background Tokio task and
/// feeds accepted posts into `inbound_tx`; dropping the receiver makes the
/// handler discard further posts.
pub fn spawn_listener(
    bot: Bot,
    channels: ChannelFilter,
    inbound_tx: mpsc::Sender<InboundMessage>,
) -> TelegramListener {
    let state = ListenerState {
        channels: Arc::new(channels),
        inbound_tx,
    };

    let handler = Update::filter_channel_post().endpoint(handle_channel_post);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_update| async {})
        .build();
    let shutdown = dispatcher.shutdown_token();

    info!("telegram dispatcher starting");
    let handle = tokio::spawn(async move {
        dispatcher.dispatch().await;
        info!("telegram dispatcher stopped");
    });

    TelegramListener { shutdown, handle }
}

/// Handle an incoming channel post.
async fn handle_channel_post(msg: Message, state: ListenerState) -> ResponseResult<()> {
    if !state.channels.allows(msg.chat.id.0, msg.chat.username()) {
        debug!(chat_id = msg.chat.id.0, "post from unconfigured chat ignored");
        return Ok(());
    }

    let inbound = media::inbound_from_message(&msg);
    debug!(
        channel = %inbound.source.title,
        message_id = inbound.id,
        group = ?inbound.group_key,
        "channel post received"
    );

    if state.inbound_tx.send(inbound).await.is_err() {
        warn!("intake channel closed, dropping channel post");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Feed source
// ---------------------------------------------------------------------------

/// [`FeedSource`] that downloads media through the Bot API.
#[derive(Clone)]
pub struct TelegramFeed {
    bot: Bot,
    link_base: String,
}

impl TelegramFeed {
    /// Feed using `bot` for downloads and `link_base` (e.g. `https://t.me`)
    /// for deep links.
    pub fn new(bot: Bot, link_base: String) -> Self {
        Self { bot, link_base }
    }
}

#[async_trait]
impl FeedSource for TelegramFeed {
    async fn fetch_media_bytes(&self, message: &InboundMessage) -> Option<Vec<u8>> {
        let media = message.media.as_ref()?;
        media::download_bytes(&self.bot, &media.file_id).await
    }

    fn resolve_chat_link(&self, message: &InboundMessage) -> Option<String> {
        source_link(&self.link_base, message.source.handle.as_deref(), message.id)
    }
}
