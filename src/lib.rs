//! Channel relay: forwards Telegram channel posts to a WhatsApp recipient.
//!
//! Posts arrive from a Telegram bot sitting in the source channels, are
//! optionally screened by LLM-judged filter rules, have their media
//! classified and re-uploaded, and are delivered through the WhatsApp
//! Cloud API. Albums are coalesced into one delivery.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod providers;
pub mod routing;
pub mod service;

pub mod telegram;
pub mod whatsapp;
