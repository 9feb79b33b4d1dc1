//! Strict decoding of the extraction response.
//!
//! The model is asked for
//! `{"facts": [{"key", "value", "confidence"?, "span"?}], "topics": [...], "retract": [...]}`.
//! Decoding either yields [`ParsedFacts`] or an error saying why not:
//! [`LlmError::ParseError`] when the text is not JSON at all,
//! [`LlmError::SchemaValidation`] when it is JSON of the wrong shape.
//! Individual fact entries of the wrong shape are dropped and counted.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::LlmError;

/// A fact entry exactly as the model produced it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawFact {
    /// Attribute name, not yet normalized.
    pub key: String,
    /// Attribute value.
    pub value: Scalar,
    /// Model-reported confidence, if any.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Supporting text from the message.
    #[serde(default, alias = "raw_text_span")]
    pub span: Option<String>,
}

/// A JSON scalar accepted as a fact value (`"21"`, `21`, `true`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// A string.
    Text(String),
    /// A number.
    Number(serde_json::Number),
    /// A boolean.
    Bool(bool),
}

impl Scalar {
    /// The value as text.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// Successfully decoded extraction response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFacts {
    /// Well-formed fact entries.
    pub facts: Vec<RawFact>,
    /// Interest topics, uncleaned.
    pub topics: Vec<String>,
    /// Keys the user said no longer hold, not yet normalized.
    pub retract: Vec<String>,
    /// Fact entries dropped for having the wrong shape.
    pub rejected: usize,
}

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````).
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let body = &trimmed[start + 3..];
    // Skip the info string (`json`, `JSON`, ...) up to the end of the line.
    let body = match body.find('\n') {
        Some(nl) if body[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &body[nl + 1..],
        _ => body,
    };
    let body = body.find("```").map_or(body, |end| &body[..end]);
    body.trim()
}

/// Decode a model response into facts and topics.
///
/// # Errors
/// [`LlmError::ParseError`] if the (fence-stripped) text is not JSON,
/// [`LlmError::SchemaValidation`] if it is not an object with a `facts`
/// array, or `topics` or `retract` is not an array of strings.
pub fn decode_extraction(text: &str) -> Result<ParsedFacts, LlmError> {
    let body = strip_code_fences(text);
    let value: Value =
        serde_json::from_str(body).map_err(|e| LlmError::ParseError(e.to_string()))?;

    let Value::Object(mut root) = value else {
        return Err(LlmError::SchemaValidation("expected a JSON object".into()));
    };

    let Some(Value::Array(entries)) = root.remove("facts") else {
        return Err(LlmError::SchemaValidation("missing \"facts\" array".into()));
    };

    let mut parsed = ParsedFacts {
        topics: string_list(root.remove("topics"), "topics")?,
        retract: string_list(root.remove("retract"), "retract")?,
        ..ParsedFacts::default()
    };
    for entry in entries {
        match serde_json::from_value::<RawFact>(entry) {
            Ok(fact) => parsed.facts.push(fact),
            Err(e) => {
                debug!(error = %e, "Dropping malformed fact entry");
                parsed.rejected += 1;
            }
        }
    }
    Ok(parsed)
}

fn string_list(raw: Option<Value>, field: &str) -> Result<Vec<String>, LlmError> {
    match raw {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw)
            .map_err(|e| LlmError::SchemaValidation(format!("\"{field}\": {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_json() {
        let parsed = decode_extraction(
            r#"{"facts":[{"key":"job","value":"nurse","confidence":0.9,"span":"I am a nurse"}],"topics":["medicine"]}"#,
        )
        .expect("decode");
        assert_eq!(parsed.facts.len(), 1);
        assert_eq!(parsed.facts[0].key, "job");
        assert_eq!(parsed.facts[0].confidence, Some(0.9));
        assert_eq!(parsed.facts[0].span.as_deref(), Some("I am a nurse"));
        assert_eq!(parsed.topics, vec!["medicine".to_string()]);
    }

    #[test]
    fn strips_markdown_fences() {
        let text = "Sure!\n```json\n{\"facts\": [], \"topics\": []}\n```\n";
        assert_eq!(strip_code_fences(text), "{\"facts\": [], \"topics\": []}");
        assert_eq!(strip_code_fences("```{\"facts\":[]}```"), "{\"facts\":[]}");
        assert!(decode_extraction(text).expect("decode").facts.is_empty());
    }

    #[test]
    fn scalar_values_become_text() {
        let parsed = decode_extraction(
            r#"{"facts":[{"key":"age","value":21},{"key":"vegan","value":true}]}"#,
        )
        .expect("decode");
        let values: Vec<String> = parsed.facts.into_iter().map(|f| f.value.into_text()).collect();
        assert_eq!(values, vec!["21".to_string(), "true".to_string()]);
    }

    #[test]
    fn malformed_entries_are_counted_not_fatal() {
        let parsed = decode_extraction(
            r#"{"facts":[{"key":"pet","value":"cat"},{"value":"no key"},"just a string",{"key":"x","value":{"nested":1}}]}"#,
        )
        .expect("decode");
        assert_eq!(parsed.facts.len(), 1);
        assert_eq!(parsed.rejected, 3);
    }

    #[test]
    fn retract_list_is_optional() {
        let parsed = decode_extraction(r#"{"facts":[],"retract":["Pet","job"]}"#).expect("decode");
        assert_eq!(parsed.retract, vec!["Pet".to_string(), "job".to_string()]);
        assert!(decode_extraction(r#"{"facts":[]}"#).expect("decode").retract.is_empty());
    }

    #[test]
    fn not_json_is_parse_error() {
        assert!(matches!(
            decode_extraction("I could not find any facts."),
            Err(LlmError::ParseError(_))
        ));
    }

    #[test]
    fn wrong_shape_is_schema_error() {
        for text in [
            r#"["You are 21 years old"]"#,
            r#"{"topics": []}"#,
            r#"{"facts": {"key": "a"}}"#,
            r#"{"facts": [], "topics": "music"}"#,
            r#"{"facts": [], "retract": "pet"}"#,
            r#"{"facts": [], "retract": [1, 2]}"#,
        ] {
            assert!(
                matches!(decode_extraction(text), Err(LlmError::SchemaValidation(_))),
                "{text}"
            );
        }
    }
}
