//! Text rendering for forwarded content and operator notices.

use chrono::{DateTime, Local, Utc};

use super::filter::FilterVerdict;

/// Deep-link prefix for public Telegram channels.
pub const TELEGRAM_LINK_BASE: &str = "https://t.me";

/// Deep link `<base>/<handle>/<message_id>`, or `None` for a missing or
/// blank handle.
pub fn source_link(base_url: &str, handle: Option<&str>, message_id: i32) -> Option<String> {
    let handle = handle.map(|h| h.trim().trim_start_matches('@'))?;
    if handle.is_empty() {
        return None;
    }
    Some(format!(
        "{}/{handle}/{message_id}",
        base_url.trim_end_matches('/')
    ))
}

/// `[<channel>] <YYYY-MM-DD HH:MM>` in local time, plus the link on its own line.
pub fn header(channel: &str, timestamp: DateTime<Utc>, link: Option<&str>) -> String {
    let local = timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let mut header = format!("[{channel}] {local}");
    push_link(&mut header, link);
    header
}

/// Header followed by a blank line and the body text.
pub fn text_message(
    channel: &str,
    timestamp: DateTime<Utc>,
    text: &str,
    link: Option<&str>,
) -> String {
    format!("{}\n\n{text}", header(channel, timestamp, link))
}

/// Media caption: the header, plus the text when there is any.
pub fn caption(
    channel: &str,
    timestamp: DateTime<Utc>,
    text: Option<&str>,
    link: Option<&str>,
) -> String {
    match text.filter(|t| !t.trim().is_empty()) {
        Some(text) => text_message(channel, timestamp, text, link),
        None => header(channel, timestamp, link),
    }
}

/// Notice sent instead of content rejected by a filter rule.
pub fn skip_notice(channel: &str, verdict: &FilterVerdict, link: Option<&str>) -> String {
    let mut notice = format!(
        "[Skipped from {channel}] ({}) {}",
        verdict.rule, verdict.reason
    );
    push_link(&mut notice, link);
    notice
}

/// Notice sent instead of media the sink cannot carry.
pub fn unsupported_notice(channel: &str, mime_type: &str, link: Option<&str>) -> String {
    let mut notice = format!("[{channel}] Unsupported media ({mime_type}) - view on Telegram");
    push_link(&mut notice, link);
    notice
}

fn push_link(text: &mut String, link: Option<&str>) {
    if let Some(link) = link {
        text.push('\n');
        text.push_str(link);
    }
}
