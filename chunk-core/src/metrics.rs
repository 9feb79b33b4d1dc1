//! Runtime counters.
//!
//! Lock-free `AtomicU64` counters incremented on the request path and read
//! on demand (status command, shutdown log, Prometheus scrape text).

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for high-frequency events.
#[derive(Debug)]
pub struct Counters {
    /// Inbound events handled.
    pub messages_handled: AtomicU64,
    /// Events denied by the rate limiter.
    pub rate_limited: AtomicU64,
    /// Extraction calls made.
    pub extractions: AtomicU64,
    /// Extractions that produced nothing because the model call or decode failed.
    pub extraction_failures: AtomicU64,
    /// Facts added to profiles.
    pub facts_added: AtomicU64,
    /// Facts whose value was replaced.
    pub facts_updated: AtomicU64,
    /// Facts removed because the user said they no longer hold.
    pub facts_retracted: AtomicU64,
    /// Profile writes that failed.
    pub persistence_failures: AtomicU64,
    /// Games started.
    pub games_started: AtomicU64,
    /// Games won.
    pub games_won: AtomicU64,
    /// Games lost by running out of attempts.
    pub games_lost: AtomicU64,
    /// Games ended or expired.
    pub games_aborted: AtomicU64,
}

impl Counters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages_handled: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            extractions: AtomicU64::new(0),
            extraction_failures: AtomicU64::new(0),
            facts_added: AtomicU64::new(0),
            facts_updated: AtomicU64::new(0),
            facts_retracted: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            games_started: AtomicU64::new(0),
            games_won: AtomicU64::new(0),
            games_lost: AtomicU64::new(0),
            games_aborted: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            messages_handled: load(&self.messages_handled),
            rate_limited: load(&self.rate_limited),
            extractions: load(&self.extractions),
            extraction_failures: load(&self.extraction_failures),
            facts_added: load(&self.facts_added),
            facts_updated: load(&self.facts_updated),
            facts_retracted: load(&self.facts_retracted),
            persistence_failures: load(&self.persistence_failures),
            games_started: load(&self.games_started),
            games_won: load(&self.games_won),
            games_lost: load(&self.games_lost),
            games_aborted: load(&self.games_aborted),
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Inbound events handled.
    pub messages_handled: u64,
    /// Rate-limited events.
    pub rate_limited: u64,
    /// Extraction calls.
    pub extractions: u64,
    /// Failed extractions.
    pub extraction_failures: u64,
    /// Facts added.
    pub facts_added: u64,
    /// Facts updated.
    pub facts_updated: u64,
    /// Facts retracted.
    pub facts_retracted: u64,
    /// Failed profile writes.
    pub persistence_failures: u64,
    /// Games started.
    pub games_started: u64,
    /// Games won.
    pub games_won: u64,
    /// Games lost.
    pub games_lost: u64,
    /// Games aborted.
    pub games_aborted: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows = [
            ("chunk_messages_handled_total", "Inbound events handled", self.messages_handled),
            ("chunk_rate_limited_total", "Events denied by the rate limiter", self.rate_limited),
            ("chunk_extractions_total", "Fact extraction calls", self.extractions),
            ("chunk_extraction_failures_total", "Extractions that failed soft", self.extraction_failures),
            ("chunk_facts_added_total", "Facts added to profiles", self.facts_added),
            ("chunk_facts_updated_total", "Facts replaced in profiles", self.facts_updated),
            ("chunk_facts_retracted_total", "Facts retracted from profiles", self.facts_retracted),
            ("chunk_persistence_failures_total", "Failed profile writes", self.persistence_failures),
            ("chunk_games_started_total", "Guessing games started", self.games_started),
            ("chunk_games_won_total", "Guessing games won", self.games_won),
            ("chunk_games_lost_total", "Guessing games lost", self.games_lost),
            ("chunk_games_aborted_total", "Guessing games ended or expired", self.games_aborted),
        ];

        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}
