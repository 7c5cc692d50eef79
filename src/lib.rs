#![forbid(unsafe_code)]

//! Sandboxed multi-language live-preview engine.
//!
//! Edits flow through a debounced [`session::LiveSession`], are validated
//! and transformed into a self-contained HTML artifact, and run inside a
//! fresh isolation context per generation. Only the newest generation's
//! events ever reach the published result.

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod errors;
pub mod lexer;
pub mod models;
pub mod sandbox;
pub mod session;
pub mod source_watcher;
pub mod transform;
pub mod validator;

pub use config::PreviewConfig;
pub use errors::{AppError, Result};
pub use session::{LiveSession, Subscription};
pub use transform::transform;
pub use validator::validate;
