//! # chunk-llm: Language Model Layer for the Chat Assistant
//!
//! Everything that talks to a language model goes through this crate:
//!   - **Ollama** (local, default)
//!   - **OpenAI-compatible API**
//!   - **Gemini**
//!
//! The only model-backed operation is fact extraction, which is built to
//! degrade gracefully:
//!   - JSON output requested from every provider
//!   - Strict decode, soft failure
//!   - Retry on transient transport errors only
//!   - Process-wide throttle on outbound calls
//!
//! # Architecture
//!
//! ```text
//! FactExtractor ──► PromptTemplate ──► ApiThrottle ──► Completion (LlmClient)
//!       ▲                                                   │
//!       └─────────────── parse::decode_extraction ◄─────────┘
//! ```

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod extractor;
pub mod parse;
pub mod prompt;
pub mod testing;
pub mod throttle;
pub mod types;

pub use client::{Completion, LlmClient, LlmProvider};
pub use error::LlmError;
pub use extractor::{Extraction, ExtractionStatus, FactExtractor};
pub use throttle::ApiThrottle;
pub use types::{LlmRequest, LlmResponse};
