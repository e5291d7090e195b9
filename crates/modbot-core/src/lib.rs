//! Core domain + application logic for the chat moderation bot.
//!
//! This crate is intentionally transport-agnostic. Twitch / Google Sheets /
//! Reddit live behind ports (traits) implemented in adapter crates.

pub mod autoquotes;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod logging;
pub mod messaging;
pub mod quotes;
pub mod reddit;
pub mod retry;
pub mod sheets;
pub mod storage;
pub mod tasks;

pub use errors::{Error, Result};
