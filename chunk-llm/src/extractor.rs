//! Fact extraction: one message in, candidate facts out.
//!
//! ```text
//! message ─► gate (enabled, min words) ─► prompt(message, known facts)
//!         ─► throttle ─► model call (retry on transient failure)
//!         ─► strict decode ─► normalize + sanitize + threshold ─► candidates
//! ```
//!
//! Extraction is best-effort. Every failure after the gate ends in an empty
//! result marked [`ExtractionStatus::Failed`]; nothing is raised to the
//! caller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use chunk_core::config::{ExtractionConfig, LlmConfig};
use chunk_core::safety::{clean_topic, validate_fact_value};
use chunk_core::types::{clamp_confidence, CandidateFact, FactKey, MessageId, UserId, UserProfile};

use crate::client::Completion;
use crate::error::LlmError;
use crate::parse::{decode_extraction, ParsedFacts};
use crate::prompt::PromptTemplate;
use crate::throttle::ApiThrottle;
use crate::types::{LlmRequest, LlmResponse};

const MAX_TOPICS: usize = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// How an extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// The model answered and the answer decoded (possibly to nothing).
    Parsed,
    /// No model call was made (disabled, no provider, or message too short).
    Skipped,
    /// The call or the decode failed; treated as "nothing learned".
    Failed,
}

/// Result of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Accepted candidates, at most one per key.
    pub facts: Vec<CandidateFact>,
    /// Cleaned interest topics.
    pub topics: Vec<String>,
    /// Keys the user said no longer hold. Never overlaps `facts`.
    pub retract: Vec<FactKey>,
    /// How the extraction ended.
    pub status: ExtractionStatus,
}

impl Extraction {
    fn empty(status: ExtractionStatus) -> Self {
        Self {
            facts: Vec::new(),
            topics: Vec::new(),
            retract: Vec::new(),
            status,
        }
    }
}

/// Turns user messages into candidate facts via a language model.
#[derive(Debug)]
pub struct FactExtractor<C> {
    client: C,
    prompt: PromptTemplate,
    extraction: ExtractionConfig,
    llm: LlmConfig,
    throttle: Option<Arc<ApiThrottle>>,
}

impl<C: Completion> FactExtractor<C> {
    /// Create an extractor using the built-in prompt and no throttle.
    #[must_use]
    pub fn new(client: C, extraction: ExtractionConfig, llm: LlmConfig) -> Self {
        Self {
            client,
            prompt: PromptTemplate::builtin(),
            extraction,
            llm,
            throttle: None,
        }
    }

    /// Use a different prompt template.
    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    /// Route every model call through a shared throttle.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Arc<ApiThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// The extraction settings in use.
    #[must_use]
    pub fn config(&self) -> &ExtractionConfig {
        &self.extraction
    }

    /// Whether extraction is enabled and a model backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.extraction.enabled && self.client.is_available()
    }

    /// Whether a message is long enough to be worth a model call.
    #[must_use]
    pub fn worth_extracting(&self, text: &str) -> bool {
        text.split_whitespace().count() >= self.extraction.min_words
    }

    /// Candidate facts in `text`. Empty on any failure.
    pub async fn extract(
        &self,
        user: &UserId,
        text: &str,
        profile: &UserProfile,
    ) -> Vec<CandidateFact> {
        self.extract_detailed(user, text, profile, None).await.facts
    }

    /// Candidate facts and topics in `text`, with how the extraction ended.
    ///
    /// `source` is recorded on every candidate as its provenance.
    pub async fn extract_detailed(
        &self,
        user: &UserId,
        text: &str,
        profile: &UserProfile,
        source: Option<&MessageId>,
    ) -> Extraction {
        if !self.is_available() || !self.worth_extracting(text) {
            return Extraction::empty(ExtractionStatus::Skipped);
        }

        let known = profile.context_summary(self.extraction.max_context_facts);
        let (system, user_prompt) = self.prompt.render(text, &known);
        let mut request = LlmRequest::new(system, user_prompt).with_config(&self.llm).json();
        if let Some(max_tokens) = self.prompt.max_tokens {
            request.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.prompt.temperature {
            request.temperature = temperature;
        }

        let response = match self.call_with_retry(user, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(user = %user, error = %e, "Fact extraction call failed");
                return Extraction::empty(ExtractionStatus::Failed);
            }
        };

        let parsed = match decode_extraction(&response.text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(
                    user = %user,
                    prompt_version = %self.prompt.version,
                    error = %e,
                    "Unusable extraction response"
                );
                return Extraction::empty(ExtractionStatus::Failed);
            }
        };

        let extraction = self.accept(parsed, source);
        debug!(
            user = %user,
            facts = extraction.facts.len(),
            topics = extraction.topics.len(),
            retract = extraction.retract.len(),
            latency_ms = response.latency_ms,
            "Extracted facts"
        );
        extraction
    }

    /// One model call, repeated only after transient transport failures.
    async fn call_with_retry(
        &self,
        user: &UserId,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let mut attempt = 0;
        loop {
            let result = {
                let _permit = match &self.throttle {
                    Some(throttle) => Some(throttle.acquire().await?),
                    None => None,
                };
                self.client.complete(request).await
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.llm.max_retries => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    debug!(user = %user, attempt, error = %e, "Retrying extraction call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if attempt > 0 => {
                    return Err(LlmError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Normalize, sanitize, and threshold decoded entries.
    fn accept(&self, parsed: ParsedFacts, source: Option<&MessageId>) -> Extraction {
        let mut facts: Vec<CandidateFact> = Vec::new();

        for raw in parsed.facts {
            let Some(key) = FactKey::new(&raw.key) else {
                continue;
            };
            let value = raw.value.into_text();
            let verdict = validate_fact_value(&value, self.extraction.max_value_chars);
            if !verdict.is_storable() {
                debug!(key = %key, verdict = ?verdict, "Dropping unsafe fact value");
                continue;
            }

            let confidence =
                clamp_confidence(raw.confidence.unwrap_or(self.extraction.default_confidence));
            if confidence < self.extraction.min_confidence {
                continue;
            }

            let mut candidate = CandidateFact::new(key, value, confidence);
            if let Some(span) = raw.span.filter(|s| !s.trim().is_empty()) {
                candidate = candidate.with_span(span);
            }
            if let Some(message) = source {
                candidate = candidate.with_source(message.clone());
            }

            // Keep the most confident candidate per key.
            match facts.iter_mut().find(|f| f.key == candidate.key) {
                Some(existing) if existing.confidence < candidate.confidence => *existing = candidate,
                Some(_) => {}
                None => facts.push(candidate),
            }
        }

        let mut seen = BTreeSet::new();
        let topics = parsed
            .topics
            .iter()
            .filter_map(|t| clean_topic(t))
            .filter(|t| seen.insert(t.clone()))
            .take(MAX_TOPICS)
            .collect();

        // A key asserted in the same answer is not retracted.
        let mut retract: Vec<FactKey> = Vec::new();
        for key in parsed.retract.iter().filter_map(|k| FactKey::new(k)) {
            if !retract.contains(&key) && !facts.iter().any(|f| f.key == key) {
                retract.push(key);
            }
        }

        Extraction {
            facts,
            topics,
            retract,
            status: ExtractionStatus::Parsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;
    use chunk_core::config::MergeConfig;
    use chunk_core::{MemoryBackend, ProfileStore};

    fn extractor(script: ScriptedCompletion) -> FactExtractor<ScriptedCompletion> {
        FactExtractor::new(script, ExtractionConfig::default(), LlmConfig::default())
    }

    fn profile() -> UserProfile {
        UserProfile::new(UserId::new("u"))
    }

    const MESSAGE: &str = "my favorite color is definitely blue";

    #[tokio::test]
    async fn accepts_well_formed_facts() {
        let script = ScriptedCompletion::replies([
            r#"{"facts":[{"key":"Favorite Color","value":"blue","confidence":0.9,"span":"favorite color is definitely blue"}],"topics":["Art!"]}"#,
        ]);
        let ex = extractor(script);
        let out = ex
            .extract_detailed(&UserId::new("u"), MESSAGE, &profile(), Some(&MessageId::new("m1")))
            .await;

        assert_eq!(out.status, ExtractionStatus::Parsed);
        assert_eq!(out.facts.len(), 1);
        assert_eq!(out.facts[0].key.as_str(), "favorite_color");
        assert_eq!(out.facts[0].source_message_id, Some(MessageId::new("m1")));
        assert_eq!(out.topics, vec!["art".to_string()]);
    }

    #[tokio::test]
    async fn missing_confidence_defaults_and_low_confidence_drops() {
        let script = ScriptedCompletion::replies([
            r#"{"facts":[{"key":"pet","value":"cat"},{"key":"city","value":"Paris","confidence":0.2}]}"#,
        ]);
        let facts = extractor(script).extract(&UserId::new("u"), MESSAGE, &profile()).await;

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].key.as_str(), "pet");
        assert!((facts[0].confidence - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn unsafe_values_are_dropped() {
        let script = ScriptedCompletion::replies([
            r#"{"facts":[{"key":"site","value":"https://evil.example"},{"key":"job","value":"baker","confidence":0.8}]}"#,
        ]);
        let facts = extractor(script).extract(&UserId::new("u"), MESSAGE, &profile()).await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "baker");
    }

    #[tokio::test]
    async fn duplicate_keys_keep_most_confident() {
        let script = ScriptedCompletion::replies([
            r#"{"facts":[{"key":"pet","value":"cat","confidence":0.6},{"key":"pet","value":"dog","confidence":0.9}]}"#,
        ]);
        let facts = extractor(script).extract(&UserId::new("u"), MESSAGE, &profile()).await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "dog");
    }

    #[tokio::test]
    async fn retractions_are_normalized() {
        let script = ScriptedCompletion::replies([
            r#"{"facts":[{"key":"job","value":"pilot","confidence":0.9}],"retract":["Pet","pet","JOB","  "]}"#,
        ]);
        let out = extractor(script)
            .extract_detailed(&UserId::new("u"), MESSAGE, &profile(), None)
            .await;
        assert_eq!(out.status, ExtractionStatus::Parsed);
        assert_eq!(out.retract, vec![FactKey::new("pet").expect("key")]);
        assert_eq!(out.facts.len(), 1);
    }

    #[test]
    fn availability_needs_enabled_and_backend() {
        assert!(extractor(ScriptedCompletion::default()).is_available());
        assert!(!extractor(ScriptedCompletion::default().unavailable()).is_available());
        let disabled = FactExtractor::new(
            ScriptedCompletion::default(),
            ExtractionConfig {
                enabled: false,
                ..ExtractionConfig::default()
            },
            LlmConfig::default(),
        );
        assert!(!disabled.is_available());
    }

    #[tokio::test]
    async fn garbage_response_fails_soft() {
        let script = ScriptedCompletion::replies(["I'm sorry, I can't help with that."]);
        let ex = extractor(script);
        let out = ex.extract_detailed(&UserId::new("u"), MESSAGE, &profile(), None).await;
        assert_eq!(out.status, ExtractionStatus::Failed);
        assert!(out.facts.is_empty());
    }

    #[tokio::test]
    async fn short_message_makes_no_call() {
        let script = ScriptedCompletion::replies([r#"{"facts":[]}"#]);
        let ex = extractor(script);
        let out = ex.extract_detailed(&UserId::new("u"), "hi there", &profile(), None).await;
        assert_eq!(out.status, ExtractionStatus::Skipped);
        assert_eq!(ex.client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_only() {
        let script = ScriptedCompletion::new([
            Err(LlmError::Timeout(100)),
            Err(LlmError::Http { status: 502, body: String::new() }),
            Ok(r#"{"facts":[{"key":"job","value":"pilot","confidence":0.9}]}"#.to_string()),
        ]);
        let ex = extractor(script);
        let facts = ex.extract(&UserId::new("u"), MESSAGE, &profile()).await;
        assert_eq!(facts.len(), 1);
        assert_eq!(ex.client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let script = ScriptedCompletion::new([
            Err(LlmError::Timeout(100)),
            Err(LlmError::Timeout(100)),
            Err(LlmError::Timeout(100)),
            Ok(r#"{"facts":[{"key":"job","value":"pilot"}]}"#.to_string()),
        ]);
        let ex = extractor(script);
        let out = ex.extract_detailed(&UserId::new("u"), MESSAGE, &profile(), None).await;
        assert_eq!(out.status, ExtractionStatus::Failed);
        assert_eq!(ex.client.calls(), 3);
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let script = ScriptedCompletion::new([
            Err(LlmError::Http { status: 429, body: "quota".into() }),
            Ok(r#"{"facts":[]}"#.to_string()),
        ]);
        let ex = extractor(script);
        let out = ex.extract_detailed(&UserId::new("u"), MESSAGE, &profile(), None).await;
        assert_eq!(out.status, ExtractionStatus::Failed);
        assert_eq!(ex.client.calls(), 1);
    }

    #[tokio::test]
    async fn empty_but_valid_response_is_not_retried() {
        let script = ScriptedCompletion::replies([r#"{"facts":[],"topics":[]}"#, r#"{"facts":[]}"#]);
        let ex = extractor(script);
        let out = ex.extract_detailed(&UserId::new("u"), MESSAGE, &profile(), None).await;
        assert_eq!(out.status, ExtractionStatus::Parsed);
        assert_eq!(ex.client.calls(), 1);
    }

    #[tokio::test]
    async fn known_facts_reach_the_prompt() {
        let store = ProfileStore::new(Arc::new(MemoryBackend::new()), MergeConfig::default());
        let user = UserId::new("u");
        store
            .merge(&user, &[CandidateFact::new(FactKey::new("pet").expect("key"), "hamster", 0.9)])
            .expect("seed");

        let script = ScriptedCompletion::replies([r#"{"facts":[]}"#]);
        let ex = extractor(script);
        ex.extract(&user, MESSAGE, &store.get(&user)).await;

        let sent = ex.client.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].user.contains("pet: hamster"));
        assert!(sent[0].user.contains(MESSAGE));
        assert!(sent[0].json_mode);
    }
}
