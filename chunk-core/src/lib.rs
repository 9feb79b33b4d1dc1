//! # Chunk Core Library
//!
//! State and invariants of the chat assistant, free of any chat platform or
//! model provider:
//!
//! - **Profiles**: what the assistant durably knows about each user, with a
//!   hysteresis merge so noisy extractions cannot flip facts back and forth.
//! - **Rate limiting**: a sliding window per user and action category.
//! - **Guessing game**: a per-channel state machine with one session at a time.
//!
//! Everything here is synchronous. The only blocking call is the profile
//! backend write, which async callers should move to a blocking pool.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod game;
pub mod metrics;
pub mod persistence;
pub mod profile;
pub mod rate_limit;
pub mod safety;
pub mod types;

pub use config::ChunkConfig;
pub use error::ChunkError;
pub use game::{GameError, GameManager, GameSession, GameStatus, GuessOutcome};
pub use persistence::{JsonDirBackend, MemoryBackend, ProfileBackend, SqliteBackend};
pub use profile::ProfileStore;
pub use rate_limit::{ActionCategory, RateDecision, RateLimiter};
pub use types::*;
