//! Number-guessing game, one session per channel.
//!
//! ```text
//!            start
//!              │
//!              ▼
//!   ┌──────► Active ──── correct guess ────► Won      (removed)
//!   │          │
//!   └─ hint ◄──┤──── end / idle expiry / out of attempts ──► Aborted (removed)
//! ```
//!
//! Terminal sessions are never kept: the manager drops a session in the same
//! critical section that moves it to `Won` or `Aborted`. All transitions for
//! a channel happen under that channel's map entry lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::info;

use crate::config::GameConfig;
use crate::types::{ChannelId, UserId};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    /// Accepting guesses.
    Active,
    /// The secret was guessed.
    Won,
    /// Ended by a user, the timer, or running out of attempts.
    Aborted,
}

/// One channel's game.
#[derive(Debug, Clone)]
pub struct GameSession {
    channel_id: ChannelId,
    owner: UserId,
    max_value: u32,
    secret: u32,
    attempts: u32,
    max_attempts: u32,
    status: GameStatus,
    last_activity: Instant,
}

impl GameSession {
    /// Channel the game runs in.
    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// User who started the game.
    #[must_use]
    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Inclusive upper bound of the secret.
    #[must_use]
    pub fn max_value(&self) -> u32 {
        self.max_value
    }

    /// The number to guess.
    #[must_use]
    pub fn secret(&self) -> u32 {
        self.secret
    }

    /// In-bounds guesses made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempt limit (0 = unlimited).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> GameStatus {
        self.status
    }

    fn remaining(&self) -> Option<u32> {
        (self.max_attempts > 0).then(|| self.max_attempts.saturating_sub(self.attempts))
    }
}

/// Result of a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    /// The secret is smaller than the guess.
    TooHigh {
        /// Attempts used so far.
        attempts: u32,
        /// Attempts left, if limited.
        remaining: Option<u32>,
    },
    /// The secret is larger than the guess.
    TooLow {
        /// Attempts used so far.
        attempts: u32,
        /// Attempts left, if limited.
        remaining: Option<u32>,
    },
    /// Correct. The session is gone.
    Won {
        /// Attempts it took, including this one.
        attempts: u32,
        /// The secret.
        secret: u32,
    },
    /// Wrong, and that was the last attempt. The session is gone.
    Lost {
        /// The secret.
        secret: u32,
        /// Attempts used.
        attempts: u32,
    },
    /// Outside `1..=max_value`. Nothing changed.
    Invalid {
        /// The session's upper bound.
        max_value: u32,
    },
}

/// Game operations that cannot proceed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// A session already runs in the channel.
    #[error("a game is already running in channel {0}")]
    AlreadyActive(ChannelId),
    /// No session runs in the channel.
    #[error("no game is running in channel {0}")]
    NoActiveSession(ChannelId),
    /// The requested upper bound is below 2.
    #[error("max value must be at least 2, got {0}")]
    InvalidMaxValue(i64),
    /// Only the owner may end this game.
    #[error("only {0} can end this game")]
    NotOwner(UserId),
}

/// Owner of all active sessions.
#[derive(Debug)]
pub struct GameManager {
    sessions: DashMap<ChannelId, GameSession>,
    rng: Mutex<StdRng>,
    config: GameConfig,
}

impl GameManager {
    /// Create a manager seeded from OS entropy.
    #[must_use]
    pub fn new(config: GameConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a manager with a fixed seed, for reproducible secrets.
    #[must_use]
    pub fn with_seed(config: GameConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GameConfig, rng: StdRng) -> Self {
        Self {
            sessions: DashMap::new(),
            rng: Mutex::new(rng),
            config,
        }
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Start a game in `channel` with a secret drawn uniformly from
    /// `1..=max_value`.
    ///
    /// # Errors
    /// [`GameError::InvalidMaxValue`] if `max_value < 2` or does not fit,
    /// [`GameError::AlreadyActive`] if the channel already has a game.
    pub fn start(
        &self,
        channel: &ChannelId,
        owner: &UserId,
        max_value: i64,
    ) -> Result<GameSession, GameError> {
        let max_value = u32::try_from(max_value)
            .ok()
            .filter(|&m| m >= 2)
            .ok_or(GameError::InvalidMaxValue(max_value))?;

        match self.sessions.entry(channel.clone()) {
            Entry::Occupied(_) => Err(GameError::AlreadyActive(channel.clone())),
            Entry::Vacant(slot) => {
                let secret = self.rng.lock().gen_range(1..=max_value);
                let session = GameSession {
                    channel_id: channel.clone(),
                    owner: owner.clone(),
                    max_value,
                    secret,
                    attempts: 0,
                    max_attempts: self.config.max_attempts,
                    status: GameStatus::Active,
                    last_activity: Instant::now(),
                };
                slot.insert(session.clone());
                info!(channel = %channel, owner = %owner, max_value, "Game started");
                Ok(session)
            }
        }
    }

    /// Guess the secret. Any user in the channel may guess.
    ///
    /// # Errors
    /// [`GameError::NoActiveSession`] if the channel has no game.
    pub fn guess(
        &self,
        channel: &ChannelId,
        user: &UserId,
        value: i64,
    ) -> Result<GuessOutcome, GameError> {
        let Entry::Occupied(mut entry) = self.sessions.entry(channel.clone()) else {
            return Err(GameError::NoActiveSession(channel.clone()));
        };
        let session = entry.get_mut();

        if value < 1 || value > i64::from(session.max_value) {
            return Ok(GuessOutcome::Invalid {
                max_value: session.max_value,
            });
        }

        session.attempts += 1;
        session.last_activity = Instant::now();
        let attempts = session.attempts;
        let secret = session.secret;

        if value == i64::from(secret) {
            session.status = GameStatus::Won;
            entry.remove();
            info!(channel = %channel, user = %user, attempts, "Game won");
            return Ok(GuessOutcome::Won { attempts, secret });
        }

        if session.max_attempts > 0 && attempts >= session.max_attempts {
            session.status = GameStatus::Aborted;
            entry.remove();
            info!(channel = %channel, attempts, "Game lost, out of attempts");
            return Ok(GuessOutcome::Lost { secret, attempts });
        }

        let remaining = session.remaining();
        if value > i64::from(secret) {
            Ok(GuessOutcome::TooHigh { attempts, remaining })
        } else {
            Ok(GuessOutcome::TooLow { attempts, remaining })
        }
    }

    /// End the channel's game. Returns the final session.
    ///
    /// # Errors
    /// [`GameError::NoActiveSession`] if the channel has no game, or
    /// [`GameError::NotOwner`] when `owner_only_end` is set and `user` did
    /// not start it.
    pub fn end(&self, channel: &ChannelId, user: &UserId) -> Result<GameSession, GameError> {
        let Entry::Occupied(entry) = self.sessions.entry(channel.clone()) else {
            return Err(GameError::NoActiveSession(channel.clone()));
        };
        if self.config.owner_only_end && entry.get().owner != *user {
            return Err(GameError::NotOwner(entry.get().owner.clone()));
        }

        let (_, mut session) = entry.remove_entry();
        session.status = GameStatus::Aborted;
        info!(channel = %channel, user = %user, attempts = session.attempts, "Game ended");
        Ok(session)
    }

    /// Abort every session idle for at least `max_idle` as of `now`.
    /// Returns the channels whose game expired.
    pub fn expire_idle(&self, max_idle: Duration, now: Instant) -> Vec<ChannelId> {
        let mut expired = Vec::new();
        self.sessions.retain(|channel, session| {
            if now.saturating_duration_since(session.last_activity) >= max_idle {
                session.status = GameStatus::Aborted;
                expired.push(channel.clone());
                false
            } else {
                true
            }
        });
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired idle games");
        }
        expired
    }

    /// Snapshot of the channel's active session.
    #[must_use]
    pub fn session(&self, channel: &ChannelId) -> Option<GameSession> {
        self.sessions.get(channel).map(|s| s.clone())
    }

    /// Number of active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> GameManager {
        GameManager::with_seed(GameConfig::default(), 7)
    }

    fn ids() -> (ChannelId, UserId) {
        (ChannelId::new("general"), UserId::new("alice"))
    }

    #[test]
    fn start_creates_active_session_in_bounds() {
        let gm = manager();
        let (ch, user) = ids();
        let session = gm.start(&ch, &user, 10).expect("start");

        assert_eq!(session.status(), GameStatus::Active);
        assert_eq!(session.attempts(), 0);
        assert!((1..=10).contains(&session.secret()));
        assert_eq!(gm.active_count(), 1);
    }

    #[test]
    fn second_start_is_already_active() {
        let gm = manager();
        let (ch, user) = ids();
        gm.start(&ch, &user, 10).expect("start");
        assert_eq!(
            gm.start(&ch, &UserId::new("bob"), 50).expect_err("dup"),
            GameError::AlreadyActive(ch.clone())
        );
        assert_eq!(gm.session(&ch).expect("session").max_value(), 10);
    }

    #[test]
    fn rejects_tiny_or_negative_max() {
        let gm = manager();
        let (ch, user) = ids();
        for bad in [-5, 0, 1, i64::from(u32::MAX) + 1] {
            assert_eq!(gm.start(&ch, &user, bad).expect_err("bad"), GameError::InvalidMaxValue(bad));
        }
        assert_eq!(gm.active_count(), 0);
    }

    #[test]
    fn out_of_bounds_guess_changes_nothing() {
        let gm = manager();
        let (ch, user) = ids();
        gm.start(&ch, &user, 10).expect("start");

        assert_eq!(gm.guess(&ch, &user, 11), Ok(GuessOutcome::Invalid { max_value: 10 }));
        assert_eq!(gm.guess(&ch, &user, 0), Ok(GuessOutcome::Invalid { max_value: 10 }));
        assert_eq!(gm.session(&ch).expect("session").attempts(), 0);
    }

    #[test]
    fn hints_point_at_secret() {
        let gm = manager();
        let (ch, user) = ids();
        let secret = gm.start(&ch, &user, 100).expect("start").secret();

        if secret < 100 {
            assert!(matches!(gm.guess(&ch, &user, 100), Ok(GuessOutcome::TooHigh { attempts: 1, .. })));
        }
        if secret > 1 {
            assert!(matches!(gm.guess(&ch, &user, 1), Ok(GuessOutcome::TooLow { .. })));
        }
    }

    #[test]
    fn winning_removes_session() {
        let gm = manager();
        let (ch, user) = ids();
        let secret = gm.start(&ch, &user, 10).expect("start").secret();

        let outcome = gm.guess(&ch, &UserId::new("bob"), i64::from(secret)).expect("guess");
        assert_eq!(outcome, GuessOutcome::Won { attempts: 1, secret });
        assert!(gm.session(&ch).is_none());
        assert_eq!(
            gm.guess(&ch, &user, 1).expect_err("gone"),
            GameError::NoActiveSession(ch.clone())
        );
        gm.start(&ch, &user, 10).expect("restart after win");
    }

    #[test]
    fn running_out_of_attempts_loses() {
        let config = GameConfig {
            max_attempts: 2,
            ..GameConfig::default()
        };
        let gm = GameManager::with_seed(config, 1);
        let (ch, user) = ids();
        let secret = gm.start(&ch, &user, 100).expect("start").secret();
        let wrong = if secret == 1 { 2 } else { 1 };

        assert!(matches!(
            gm.guess(&ch, &user, wrong),
            Ok(GuessOutcome::TooLow { remaining: Some(1), .. } | GuessOutcome::TooHigh { remaining: Some(1), .. })
        ));
        assert_eq!(gm.guess(&ch, &user, wrong), Ok(GuessOutcome::Lost { secret, attempts: 2 }));
        assert!(gm.session(&ch).is_none());
    }

    #[test]
    fn end_without_game_fails() {
        let gm = manager();
        let (ch, user) = ids();
        assert_eq!(gm.end(&ch, &user).expect_err("none"), GameError::NoActiveSession(ch));
    }

    #[test]
    fn end_aborts_and_removes() {
        let gm = manager();
        let (ch, user) = ids();
        gm.start(&ch, &user, 10).expect("start");
        let ended = gm.end(&ch, &UserId::new("bob")).expect("anyone may end");
        assert_eq!(ended.status(), GameStatus::Aborted);
        assert_eq!(gm.active_count(), 0);
    }

    #[test]
    fn owner_only_end_is_enforced() {
        let config = GameConfig {
            owner_only_end: true,
            ..GameConfig::default()
        };
        let gm = GameManager::with_seed(config, 3);
        let (ch, user) = ids();
        gm.start(&ch, &user, 10).expect("start");

        assert_eq!(
            gm.end(&ch, &UserId::new("bob")).expect_err("not owner"),
            GameError::NotOwner(user.clone())
        );
        assert!(gm.end(&ch, &user).is_ok());
    }

    #[test]
    fn channels_are_independent() {
        let gm = manager();
        let user = UserId::new("alice");
        gm.start(&ChannelId::new("a"), &user, 10).expect("a");
        gm.start(&ChannelId::new("b"), &user, 10).expect("b");
        assert_eq!(gm.active_count(), 2);
    }

    #[test]
    fn expire_idle_aborts_stale_sessions() {
        let gm = manager();
        let user = UserId::new("alice");
        gm.start(&ChannelId::new("a"), &user, 10).expect("a");

        let now = Instant::now();
        assert!(gm.expire_idle(Duration::from_secs(300), now).is_empty());

        let later = now + Duration::from_secs(301);
        assert_eq!(gm.expire_idle(Duration::from_secs(300), later), vec![ChannelId::new("a")]);
        assert_eq!(gm.active_count(), 0);
    }

    #[test]
    fn seeded_managers_agree() {
        let (ch, user) = ids();
        let a = GameManager::with_seed(GameConfig::default(), 99);
        let b = GameManager::with_seed(GameConfig::default(), 99);
        assert_eq!(
            a.start(&ch, &user, 1000).expect("a").secret(),
            b.start(&ch, &user, 1000).expect("b").secret()
        );
    }
}
