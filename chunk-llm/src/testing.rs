//! In-process [`Completion`] double for tests.
//!
//! Answers calls from a fixed script, in order, and records every request
//! it saw. Once the script runs out, calls fail with `Unavailable`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::client::Completion;
use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse};

/// Scripted language model.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    seen: Mutex<Vec<LlmRequest>>,
    calls: AtomicUsize,
    offline: bool,
}

impl ScriptedCompletion {
    /// A double that plays back `script`.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// A double that answers with each text in turn.
    #[must_use]
    pub fn replies<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(t.to_string())))
    }

    /// Report no configured backend, like a client built for provider `none`.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Append one more scripted answer.
    pub fn push(&self, answer: Result<String, LlmError>) {
        self.script.lock().push_back(answer);
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.seen.lock().clone()
    }
}

impl Completion for ScriptedCompletion {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(text)) => Ok(LlmResponse::text(text)),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::Unavailable("script exhausted".into())),
        }
    }

    fn is_available(&self) -> bool {
        !self.offline
    }
}
