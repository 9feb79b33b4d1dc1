//! Input hygiene for model-extracted data.
//!
//! Model output is untrusted: it can echo prompt-injection payloads, links,
//! or code back at us. Everything stored in a profile passes through here.
//!   Layer 1: Length and emptiness
//!   Layer 2: URL and code-pattern rejection
//!   Layer 3: Special-character ratio (flagged, not rejected)

/// Result of a safety check on a candidate value.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyVerdict {
    /// Content passed all checks.
    Approved,
    /// Content looks odd but is kept.
    Flagged {
        /// Why the content was flagged.
        reason: String,
        /// Severity score (0.0 to 1.0).
        score: f32,
    },
    /// Content must not be stored.
    Rejected {
        /// Why the content was rejected.
        reason: String,
    },
}

impl SafetyVerdict {
    /// Whether the content may be stored.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

const CODE_PATTERNS: [&str; 10] = [
    "```", "<script", "select ", "drop table", "eval(", "exec(",
    "import ", "require(", "function ", "{{",
];

/// Validate a fact value before it is stored.
#[must_use]
pub fn validate_fact_value(value: &str, max_chars: usize) -> SafetyVerdict {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return SafetyVerdict::Rejected {
            reason: "Value is empty".to_string(),
        };
    }

    let chars = trimmed.chars().count();
    if chars > max_chars {
        return SafetyVerdict::Rejected {
            reason: format!("Value too long: {chars} chars (max: {max_chars})"),
        };
    }

    let lower = trimmed.to_lowercase();
    if lower.contains("http://") || lower.contains("https://") || lower.contains("www.") {
        return SafetyVerdict::Rejected {
            reason: "URLs are not stored as facts".to_string(),
        };
    }

    if CODE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return SafetyVerdict::Rejected {
            reason: "Code-like content is not stored as facts".to_string(),
        };
    }

    let special = trimmed
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !",.'\"!?;:-()/&".contains(*c))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = special as f32 / chars.max(1) as f32;
    if ratio > 0.3 {
        return SafetyVerdict::Flagged {
            reason: "High ratio of special characters".to_string(),
            score: ratio,
        };
    }

    SafetyVerdict::Approved
}

/// Normalize an interest topic.
///
/// Lowercases, strips everything but ASCII letters, digits and spaces,
/// collapses whitespace, and keeps only topics of 2..=30 characters.
#[must_use]
pub fn clean_topic(raw: &str) -> Option<String> {
    let filtered: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    let topic = filtered.split_whitespace().collect::<Vec<_>>().join(" ");

    (2..=30).contains(&topic.len()).then_some(topic)
}
