//! WhatsApp sink: Cloud API client delivering to a single recipient.
//!
//! Size limits are not enforced here; the routing pipeline chunks text and
//! captions before they reach [`client::WhatsAppClient`].

pub mod client;

pub use client::{WhatsAppClient, DEFAULT_API_BASE};

/// Maximum text body length accepted by the Cloud API.
pub const MAX_TEXT_LEN: usize = 4096;

/// Maximum media caption length accepted by the Cloud API.
pub const MAX_CAPTION_LEN: usize = 1024;
