//! Per-user profile store.
//!
//! Owns every user's facts and topics, reconciles extracted candidates with
//! what is already known, and writes every confirmed change through the
//! backend before reporting success.
//!
//! ## Merge policy
//!
//! For each candidate, in order:
//! 1. Unknown key: the fact is added.
//! 2. Same value (case-insensitive): kept. If the confidence differs the
//!    stored confidence becomes the larger of the two and `updated_at` is
//!    refreshed; identical data is a literal no-op.
//! 3. Different value: replaced only when the new confidence beats the stored
//!    one by more than `hysteresis_margin`, so two equally unsure extractions
//!    cannot flip a fact back and forth.
//!
//! Retracted keys are removed before candidates are applied, so a key that
//! is both retracted and asserted ends up holding the asserted value.
//!
//! ## Concurrency
//!
//! Each user has a slot guarded by its own mutex. A mutation holds the slot
//! for the whole read-modify-write, so merges for one user never interleave
//! while different users proceed in parallel. The new profile is built on a
//! copy and swapped in only after the backend accepted it.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::MergeConfig;
use crate::error::{ChunkError, Result};
use crate::persistence::ProfileBackend;
use crate::safety::clean_topic;
use crate::types::{CandidateFact, FactKey, FactRecord, MergeResult, UserId, UserProfile};

const CONFIDENCE_EPSILON: f32 = 1e-6;

#[derive(Debug, Default)]
struct Slot {
    /// `None` until the profile was read from the backend.
    profile: Option<UserProfile>,
}

/// Store of user profiles backed by a [`ProfileBackend`].
#[derive(Debug)]
pub struct ProfileStore {
    backend: Arc<dyn ProfileBackend>,
    policy: MergeConfig,
    slots: DashMap<UserId, Arc<Mutex<Slot>>>,
}

impl ProfileStore {
    /// Create a store over `backend` with the given merge policy.
    #[must_use]
    pub fn new(backend: Arc<dyn ProfileBackend>, policy: MergeConfig) -> Self {
        Self {
            backend,
            policy,
            slots: DashMap::new(),
        }
    }

    /// The backend this store writes through.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ProfileBackend> {
        &self.backend
    }

    fn slot(&self, user: &UserId) -> Arc<Mutex<Slot>> {
        Arc::clone(self.slots.entry(user.clone()).or_default().value())
    }

    /// Load the slot's profile if it is not cached yet.
    fn ensure_loaded<'a>(&self, user: &UserId, slot: &'a mut Slot) -> Result<&'a mut UserProfile> {
        if slot.profile.is_none() {
            let loaded = self
                .backend
                .read(user)?
                .unwrap_or_else(|| UserProfile::new(user.clone()));
            slot.profile = Some(loaded);
        }
        slot.profile.as_mut().ok_or_else(|| ChunkError::Persistence {
            user: user.to_string(),
            reason: "profile slot empty after load".to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The user's current profile.
    ///
    /// A user never seen before gets an empty profile. A backend read
    /// failure is logged and also yields an empty profile, which is not
    /// cached so the next call retries the read.
    #[must_use]
    pub fn get(&self, user: &UserId) -> UserProfile {
        let slot = self.slot(user);
        let mut guard = slot.lock();
        match self.ensure_loaded(user, &mut guard) {
            Ok(profile) => profile.clone(),
            Err(e) => {
                warn!(user = %user, error = %e, "Profile read failed, serving empty profile");
                UserProfile::new(user.clone())
            }
        }
    }

    /// Snapshot of the profile for display. Same as [`Self::get`].
    #[must_use]
    pub fn list(&self, user: &UserId) -> UserProfile {
        self.get(user)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Reconcile candidate facts with the stored profile.
    ///
    /// # Errors
    /// Returns a persistence error if the profile could not be loaded or the
    /// changed profile could not be written. In that case nothing changed.
    pub fn merge(&self, user: &UserId, candidates: &[CandidateFact]) -> Result<MergeResult> {
        self.merge_with_topics(user, candidates, &[])
    }

    /// Reconcile candidate facts and interest topics in one atomic step.
    ///
    /// Topics are cleaned before insertion; ones that clean to nothing are
    /// ignored.
    ///
    /// # Errors
    /// Returns a persistence error if the profile could not be loaded or the
    /// changed profile could not be written. In that case nothing changed.
    pub fn merge_with_topics(
        &self,
        user: &UserId,
        candidates: &[CandidateFact],
        topics: &[String],
    ) -> Result<MergeResult> {
        self.reconcile(user, candidates, topics, &[])
    }

    /// Retract facts the user said no longer hold, then merge candidates and
    /// topics, all in one atomic step. Retracting an unknown key is a no-op.
    ///
    /// # Errors
    /// Returns a persistence error if the profile could not be loaded or the
    /// changed profile could not be written. In that case nothing changed.
    pub fn reconcile(
        &self,
        user: &UserId,
        candidates: &[CandidateFact],
        topics: &[String],
        retract: &[FactKey],
    ) -> Result<MergeResult> {
        let start = Instant::now();
        let slot = self.slot(user);
        let mut guard = slot.lock();
        let current = self.ensure_loaded(user, &mut guard)?;

        let mut next = current.clone();
        let (result, dirty) = apply_merge(&mut next, candidates, topics, retract, self.policy);

        if dirty {
            self.persist(user, &next)?;
            *current = next;
        }

        debug!(
            user = %user,
            added = result.added.len(),
            updated = result.updated.len(),
            unchanged = result.unchanged.len(),
            topics_added = result.topics_added.len(),
            retracted = result.retracted.len(),
            written = dirty,
            elapsed_us = start.elapsed().as_micros(),
            "Merged candidate facts"
        );
        Ok(result)
    }

    /// Remove every fact whose key or value contains `query`
    /// (case-insensitive). Returns how many facts were removed.
    ///
    /// A blank query matches nothing; profiles are never wiped wholesale.
    ///
    /// # Errors
    /// Returns a persistence error if the profile could not be loaded or the
    /// change could not be written. In that case nothing changed.
    pub fn delete_matching(&self, user: &UserId, query: &str) -> Result<usize> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(0);
        }

        let slot = self.slot(user);
        let mut guard = slot.lock();
        let current = self.ensure_loaded(user, &mut guard)?;

        let mut next = current.clone();
        let before = next.facts.len();
        next.facts.retain(|key, record| {
            !(key.as_str().contains(&needle)
                || key.readable().contains(&needle)
                || record.value.to_lowercase().contains(&needle))
        });
        let removed = before - next.facts.len();

        if removed > 0 {
            self.persist(user, &next)?;
            *current = next;
            debug!(user = %user, removed, "Forgot matching facts");
        }
        Ok(removed)
    }

    fn persist(&self, user: &UserId, profile: &UserProfile) -> Result<()> {
        self.backend.write(user, profile).map_err(|e| {
            error!(user = %user, error = %e, "Profile write failed");
            match e {
                ChunkError::Persistence { .. } => e,
                other => ChunkError::Persistence {
                    user: user.to_string(),
                    reason: other.to_string(),
                },
            }
        })
    }

    /// Number of users with a cached slot.
    #[must_use]
    pub fn cached_users(&self) -> usize {
        self.slots.len()
    }
}

/// Apply retractions, candidates and topics to `profile`. Returns the
/// outcome and whether anything that must be persisted changed.
fn apply_merge(
    profile: &mut UserProfile,
    candidates: &[CandidateFact],
    topics: &[String],
    retract: &[FactKey],
    policy: MergeConfig,
) -> (MergeResult, bool) {
    let now = Utc::now();
    let mut result = MergeResult::default();
    let mut dirty = false;

    for key in retract {
        if profile.facts.remove(key).is_some() {
            result.retracted.push(key.clone());
            dirty = true;
        }
    }

    for candidate in candidates {
        let Some(stored) = profile.facts.get_mut(&candidate.key) else {
            profile.facts.insert(
                candidate.key.clone(),
                FactRecord {
                    value: candidate.value.clone(),
                    confidence: candidate.confidence,
                    updated_at: now,
                    source_message_id: candidate.source_message_id.clone(),
                },
            );
            result.added.push(candidate.key.clone());
            dirty = true;
            continue;
        };

        if stored.value.eq_ignore_ascii_case(&candidate.value) {
            if (stored.confidence - candidate.confidence).abs() > CONFIDENCE_EPSILON {
                stored.confidence = stored.confidence.max(candidate.confidence);
                stored.updated_at = now;
                dirty = true;
            }
            result.unchanged.push(candidate.key.clone());
        } else if candidate.confidence > stored.confidence + policy.hysteresis_margin {
            stored.value.clone_from(&candidate.value);
            stored.confidence = candidate.confidence;
            stored.updated_at = now;
            stored.source_message_id.clone_from(&candidate.source_message_id);
            result.updated.push(candidate.key.clone());
            dirty = true;
        } else {
            result.unchanged.push(candidate.key.clone());
        }
    }

    for topic in topics.iter().filter_map(|t| clean_topic(t)) {
        if profile.topics.insert(topic.clone()) {
            result.topics_added.push(topic);
            dirty = true;
        }
    }

    (result, dirty)
}
