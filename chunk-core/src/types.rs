//! Core type definitions for the assistant's user memory.
//!
//! All persisted types are serde-serializable; the on-disk shape is whatever
//! the selected backend makes of the JSON encoding.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Stable platform-owned identifier of a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Identifier of a chat channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

/// Identifier of the message a fact was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Wrap a platform identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(UserId);
string_id!(ChannelId);
string_id!(MessageId);

// ---------------------------------------------------------------------------
// Facts
// ---------------------------------------------------------------------------

/// A normalized fact key, e.g. `favorite_color`.
///
/// Normalization lowercases, trims, and joins every run of whitespace,
/// hyphens, or underscores into a single `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactKey(String);

impl FactKey {
    /// Normalize a raw key. Returns `None` if nothing meaningful is left.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let joined = raw
            .trim()
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");

        if joined.is_empty() {
            None
        } else {
            Some(Self(joined))
        }
    }

    /// The normalized key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key rendered for humans (`favorite_color` → `favorite color`).
    #[must_use]
    pub fn readable(&self) -> String {
        self.0.replace('_', " ")
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored fact about a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    /// The believed value.
    pub value: String,
    /// Confidence in the value (0.0 to 1.0).
    pub confidence: f32,
    /// When this fact was last written or reinforced.
    pub updated_at: DateTime<Utc>,
    /// Message the current value came from, if known.
    #[serde(default)]
    pub source_message_id: Option<MessageId>,
}

/// A fact proposed by extraction, not yet reconciled with the profile.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFact {
    /// Normalized key.
    pub key: FactKey,
    /// Proposed value.
    pub value: String,
    /// Extraction confidence, clamped to [0, 1].
    pub confidence: f32,
    /// Text span of the message that supports the fact.
    pub raw_text_span: Option<String>,
    /// Message the fact was extracted from.
    pub source_message_id: Option<MessageId>,
}

impl CandidateFact {
    /// Create a candidate, clamping confidence into [0, 1].
    #[must_use]
    pub fn new(key: FactKey, value: impl Into<String>, confidence: f32) -> Self {
        Self {
            key,
            value: value.into().trim().to_string(),
            confidence: clamp_confidence(confidence),
            raw_text_span: None,
            source_message_id: None,
        }
    }

    /// Attach the supporting text span.
    #[must_use]
    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.raw_text_span = Some(span.into());
        self
    }

    /// Attach the source message.
    #[must_use]
    pub fn with_source(mut self, message: MessageId) -> Self {
        self.source_message_id = Some(message);
        self
    }
}

/// Clamp a confidence into [0, 1], mapping NaN to 0.
#[must_use]
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Everything the assistant durably knows about one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Owner of the profile.
    pub user_id: UserId,
    /// Facts keyed by normalized key.
    #[serde(default)]
    pub facts: BTreeMap<FactKey, FactRecord>,
    /// Interests observed in the user's messages.
    #[serde(default)]
    pub topics: BTreeSet<String>,
    /// When the profile was first created.
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// A fresh, empty profile.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            facts: BTreeMap::new(),
            topics: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Whether nothing is known about the user.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.topics.is_empty()
    }

    /// Look up a fact by raw (un-normalized) key.
    #[must_use]
    pub fn fact(&self, raw_key: &str) -> Option<&FactRecord> {
        FactKey::new(raw_key).and_then(|k| self.facts.get(&k))
    }

    /// Compact one-line-per-fact summary used as model context.
    #[must_use]
    pub fn context_summary(&self, max_facts: usize) -> String {
        self.facts
            .iter()
            .take(max_facts)
            .map(|(k, f)| format!("- {k}: {} (confidence {:.2})", f.value, f.confidence))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of reconciling candidates with a stored profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Keys that did not exist before.
    pub added: Vec<FactKey>,
    /// Keys whose value was replaced.
    pub updated: Vec<FactKey>,
    /// Keys whose value was kept (same value, or a change that did not clear the margin).
    pub unchanged: Vec<FactKey>,
    /// Topics that were new to the profile.
    pub topics_added: Vec<String>,
    /// Keys removed because the user said they no longer hold.
    pub retracted: Vec<FactKey>,
}

impl MergeResult {
    /// Whether the merge taught us anything new.
    #[must_use]
    pub fn learned_anything(&self) -> bool {
        !self.added.is_empty()
            || !self.updated.is_empty()
            || !self.topics_added.is_empty()
            || !self.retracted.is_empty()
    }
}
