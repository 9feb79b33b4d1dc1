//! # chunk-bot: Command Dispatch for the Chat Assistant
//!
//! This crate sits between a chat gateway and the core components. It
//! parses each inbound message, charges it against the user's rate budget,
//! routes it, and formats the reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        chat gateway / console           │
//! │  ┌───────────────────────────────────┐  │
//! │  │          chunk-bot                │  │
//! │  │  ┌─────────────┐ ┌─────────────┐  │  │
//! │  │  │  Command    │ │ Dispatcher  │  │  │
//! │  │  └──────┬──────┘ └──────┬──────┘  │  │
//! │  │         ▼               ▼         │  │
//! │  │    ┌─────────────────────────┐    │  │
//! │  │    │      chunk-core         │    │  │
//! │  │    └─────────────────────────┘    │  │
//! │  │    ┌─────────────────────────┐    │  │
//! │  │    │      chunk-llm          │    │  │
//! │  │    └─────────────────────────┘    │  │
//! │  └───────────────────────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `command`: prefix command parsing and budget categories
//! - `dispatcher`: `CommandDispatcher::handle(event) -> Reply`
//! - `reply`: user-visible text
//! - `console`: line protocol of the console gateway binary
//! - `telemetry`: tracing subscriber setup

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]

pub mod command;
pub mod console;
pub mod dispatcher;
pub mod reply;
pub mod telemetry;

pub use command::Command;
pub use dispatcher::{CommandDispatcher, InboundEvent, Reply, SideAction};
