//! Sliding-window rate limiter, keyed by (user, action category).
//!
//! Each key owns the timestamps of its admitted calls inside the trailing
//! window. Expired entries are trimmed lazily on every check, and
//! [`RateLimiter::sweep`] drops windows that have gone fully idle.
//!
//! Checks for the same key are serialized by the map's shard lock, so two
//! concurrent checks can never both take the last slot.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::types::UserId;

/// Budget category. Categories never share a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// Plain messages that trigger a model call.
    Chat,
    /// Game commands.
    Game,
    /// Informational commands.
    Info,
    /// Fact removal.
    Forget,
    /// Profile display.
    MyData,
    /// Everything else.
    Default,
}

impl ActionCategory {
    /// Every category.
    pub const ALL: [Self; 6] = [
        Self::Chat,
        Self::Game,
        Self::Info,
        Self::Forget,
        Self::MyData,
        Self::Default,
    ];
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Chat => "chat",
            Self::Game => "game",
            Self::Info => "info",
            Self::Forget => "forget",
            Self::MyData => "mydata",
            Self::Default => "default",
        };
        f.write_str(name)
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The call was admitted and recorded.
    Allowed,
    /// The window is full.
    Denied {
        /// Time until the oldest recorded call leaves the window.
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether the call was admitted.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-user, per-category sliding window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimitConfig,
    windows: DashMap<(UserId, ActionCategory), VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given per-category limits.
    #[must_use]
    pub fn new(limits: RateLimitConfig) -> Self {
        Self {
            limits,
            windows: DashMap::new(),
        }
    }

    /// Check and record a call at the current instant.
    pub fn check(&self, user: &UserId, category: ActionCategory) -> RateDecision {
        let mut window = self.windows.entry((user.clone(), category)).or_default();
        // Read the clock under the key's lock so recorded instants stay ordered.
        let now = Instant::now();
        self.evaluate(&mut window, category, now, user)
    }

    /// Check and record a call at an explicit instant.
    pub fn check_at(&self, user: &UserId, category: ActionCategory, now: Instant) -> RateDecision {
        let mut window = self.windows.entry((user.clone(), category)).or_default();
        self.evaluate(&mut window, category, now, user)
    }

    fn evaluate(
        &self,
        window: &mut VecDeque<Instant>,
        category: ActionCategory,
        now: Instant,
        user: &UserId,
    ) -> RateDecision {
        let limit = self.limits.limit_for(category);
        let span = limit.window();

        window.retain(|&t| now.saturating_duration_since(t) < span);

        if window.len() < limit.max_calls as usize {
            window.push_back(now);
            return RateDecision::Allowed;
        }

        let retry_after = window
            .iter()
            .min()
            .map_or(span, |&oldest| span - now.saturating_duration_since(oldest));

        debug!(
            user = %user,
            category = %category,
            retry_after_ms = retry_after.as_millis(),
            "Rate limit reached"
        );
        RateDecision::Denied { retry_after }
    }

    /// Number of calls currently recorded for a key (after trimming at `now`).
    #[must_use]
    pub fn recorded(&self, user: &UserId, category: ActionCategory, now: Instant) -> usize {
        let span = self.limits.limit_for(category).window();
        self.windows
            .get(&(user.clone(), category))
            .map_or(0, |w| {
                w.iter()
                    .filter(|&&t| now.saturating_duration_since(t) < span)
                    .count()
            })
    }

    /// Drop expired entries everywhere and forget fully idle windows.
    ///
    /// Returns how many windows were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|(_, category), window| {
            let span = self.limits.limit_for(*category).window();
            window.retain(|&t| now.saturating_duration_since(t) < span);
            !window.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "Swept idle rate windows");
        }
        removed
    }

    /// Number of tracked (user, category) windows.
    #[must_use]
    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}
