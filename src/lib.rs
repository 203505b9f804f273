//! Herald: a keyword-triggered audience collector and notifier.
//!
//! Watches one chat room, records every distinct sender of a message that
//! contains the configured keyword, and later delivers an outbound message
//! to each of them with pacing and bounded retry. An operator drives the
//! whole thing with a handful of slash commands.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audience;
pub mod commands;
pub mod config;
pub mod console;
pub mod control;
pub mod dispatch;
pub mod ingest;
pub mod logging;
pub mod matcher;
pub mod platform;
