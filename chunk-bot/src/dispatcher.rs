//! Per-event orchestration.
//!
//! ```text
//! event ─► parse ─► RateLimiter::check ─┬─ Denied ─► "please wait"
//!                                       └─ Allowed ─┬─ game command ─► GameManager
//!                                                   ├─ profile command ─► ProfileStore
//!                                                   └─ plain message ─► FactExtractor ─► ProfileStore::reconcile
//! ```
//!
//! The dispatcher owns no mutable state of its own. All mutation happens
//! inside the component it routes to. Profile store calls may hit disk, so
//! they run on the blocking pool; game and rate-limit transitions are
//! in-memory and run inline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use chunk_core::config::ChunkConfig;
use chunk_core::error::Result as CoreResult;
use chunk_core::metrics::Counters;
use chunk_core::{
    ActionCategory, ChannelId, ChunkError, GameManager, GuessOutcome, MessageId, ProfileBackend,
    ProfileStore, RateDecision, RateLimiter, UserId, UserProfile,
};
use chunk_llm::{Completion, ExtractionStatus, FactExtractor};

use crate::command::Command;
use crate::reply;

/// One inbound message as delivered by the chat gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Author.
    pub user: UserId,
    /// Channel the message was posted in.
    pub channel: ChannelId,
    /// Platform message id, recorded as fact provenance.
    pub message_id: Option<MessageId>,
    /// Raw message text.
    pub text: String,
}

impl InboundEvent {
    /// An event without a message id.
    #[must_use]
    pub fn new(user: impl Into<String>, channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: UserId::new(user),
            channel: ChannelId::new(channel),
            message_id: None,
            text: text.into(),
        }
    }

    /// Attach the platform message id.
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(MessageId::new(id));
        self
    }
}

/// Side-channel action for the gateway to perform on the inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideAction {
    /// Add an emoji reaction.
    React(&'static str),
}

/// What the gateway should do in response to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Message to post, if any.
    pub text: Option<String>,
    /// Action to take on the inbound message, if any.
    pub action: Option<SideAction>,
}

impl Reply {
    /// Do nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Post `text`.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            action: None,
        }
    }

    fn with_action(mut self, action: SideAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Whether the gateway has nothing to do.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.text.is_none() && self.action.is_none()
    }
}

const LEARNED_REACTION: &str = "🧠";
const WON_REACTION: &str = "🎉";

/// Top-level entry point for inbound events.
#[derive(Debug)]
pub struct CommandDispatcher<C> {
    store: Arc<ProfileStore>,
    limiter: Arc<RateLimiter>,
    games: Arc<GameManager>,
    extractor: FactExtractor<C>,
    counters: Arc<Counters>,
    prefix: String,
}

impl<C: Completion> CommandDispatcher<C> {
    /// Assemble a dispatcher from ready-made components.
    #[must_use]
    pub fn new(
        store: Arc<ProfileStore>,
        limiter: Arc<RateLimiter>,
        games: Arc<GameManager>,
        extractor: FactExtractor<C>,
        counters: Arc<Counters>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            limiter,
            games,
            extractor,
            counters,
            prefix: prefix.into(),
        }
    }

    /// Build every component from configuration around `backend` and `extractor`.
    #[must_use]
    pub fn from_config(
        config: &ChunkConfig,
        backend: Arc<dyn ProfileBackend>,
        extractor: FactExtractor<C>,
    ) -> Self {
        Self::new(
            Arc::new(ProfileStore::new(backend, config.merge)),
            Arc::new(RateLimiter::new(config.rate_limits.clone())),
            Arc::new(GameManager::new(config.game.clone())),
            extractor,
            Arc::new(Counters::new()),
            config.general.command_prefix.clone(),
        )
    }

    /// The profile store.
    #[must_use]
    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    /// The rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The game manager.
    #[must_use]
    pub fn games(&self) -> &Arc<GameManager> {
        &self.games
    }

    /// The fact extractor.
    #[must_use]
    pub fn extractor(&self) -> &FactExtractor<C> {
        &self.extractor
    }

    /// Runtime counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Handle one inbound event.
    pub async fn handle(&self, event: &InboundEvent) -> Reply {
        Counters::bump(&self.counters.messages_handled);
        match Command::parse(&event.text, &self.prefix) {
            Some(command) => self.handle_command(event, command).await,
            None => self.handle_message(event).await,
        }
    }

    /// Abort games idle for at least `max_idle`. Returns the expired channels.
    pub fn expire_idle_games(&self, max_idle: Duration) -> Vec<ChannelId> {
        let expired = self.games.expire_idle(max_idle, Instant::now());
        Counters::add(&self.counters.games_aborted, expired.len());
        expired
    }

    /// Drop fully expired rate windows. Returns how many were dropped.
    pub fn sweep_rate_windows(&self) -> usize {
        self.limiter.sweep(Instant::now())
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// `Some(reply)` when the user is over budget for `category`.
    fn over_budget(&self, user: &UserId, category: ActionCategory) -> Option<Reply> {
        match self.limiter.check(user, category) {
            RateDecision::Allowed => None,
            RateDecision::Denied { retry_after } => {
                Counters::bump(&self.counters.rate_limited);
                Some(Reply::text(reply::rate_limited(category, retry_after)))
            }
        }
    }

    async fn handle_command(&self, event: &InboundEvent, command: Command) -> Reply {
        if let Some(denied) = self.over_budget(&event.user, command.category()) {
            return denied;
        }
        debug!(user = %event.user, channel = %event.channel, command = ?command, "Dispatching command");

        match command {
            Command::Game { max_value } => {
                let max_value =
                    max_value.unwrap_or_else(|| i64::from(self.games.config().default_max_value));
                match self.games.start(&event.channel, &event.user, max_value) {
                    Ok(session) => {
                        Counters::bump(&self.counters.games_started);
                        Reply::text(reply::game_started(&self.prefix, &session))
                    }
                    Err(e) => Reply::text(reply::game_error(&self.prefix, &e)),
                }
            }
            Command::Guess(value) => match self.games.guess(&event.channel, &event.user, value) {
                Ok(outcome) => {
                    let text = Reply::text(reply::guess(&outcome, value));
                    match outcome {
                        GuessOutcome::Won { .. } => {
                            Counters::bump(&self.counters.games_won);
                            text.with_action(SideAction::React(WON_REACTION))
                        }
                        GuessOutcome::Lost { .. } => {
                            Counters::bump(&self.counters.games_lost);
                            text
                        }
                        _ => text,
                    }
                }
                Err(e) => Reply::text(reply::game_error(&self.prefix, &e)),
            },
            Command::End => match self.games.end(&event.channel, &event.user) {
                Ok(session) => {
                    Counters::bump(&self.counters.games_aborted);
                    Reply::text(reply::game_ended(&session))
                }
                Err(e) => Reply::text(reply::game_error(&self.prefix, &e)),
            },
            Command::MyData => {
                let profile = self.profile_snapshot(&event.user).await;
                Reply::text(reply::profile(&profile))
            }
            Command::Forget(query) => {
                let needle = query.clone();
                let removed = self
                    .on_store(&event.user, move |store, user| store.delete_matching(user, &needle))
                    .await;
                match removed {
                    Ok(n) => Reply::text(reply::forgot(n, &query)),
                    Err(e) => self.save_failed(&e),
                }
            }
            Command::Help => Reply::text(reply::help(&self.prefix)),
            Command::Usage(synopsis) => Reply::text(reply::usage(&self.prefix, synopsis)),
            Command::Unknown(name) => Reply::text(reply::unknown(&self.prefix, &name)),
        }
    }

    async fn handle_message(&self, event: &InboundEvent) -> Reply {
        // Short chatter, disabled extraction and a missing model backend cost
        // no budget and get no reply.
        if !self.extractor.is_available() || !self.extractor.worth_extracting(&event.text) {
            return Reply::none();
        }
        if let Some(denied) = self.over_budget(&event.user, ActionCategory::Chat) {
            return denied;
        }

        let profile = self.profile_snapshot(&event.user).await;
        Counters::bump(&self.counters.extractions);
        let extraction = self
            .extractor
            .extract_detailed(&event.user, &event.text, &profile, event.message_id.as_ref())
            .await;
        if extraction.status == ExtractionStatus::Failed {
            Counters::bump(&self.counters.extraction_failures);
        }
        if extraction.facts.is_empty()
            && extraction.topics.is_empty()
            && extraction.retract.is_empty()
        {
            return Reply::none();
        }

        let (facts, topics, retract) = (extraction.facts, extraction.topics, extraction.retract);
        let merged = self
            .on_store(&event.user, move |store, user| {
                store.reconcile(user, &facts, &topics, &retract)
            })
            .await;

        match merged {
            Ok(result) => {
                Counters::add(&self.counters.facts_added, result.added.len());
                Counters::add(&self.counters.facts_updated, result.updated.len());
                Counters::add(&self.counters.facts_retracted, result.retracted.len());
                match reply::learned(&result) {
                    Some(text) => Reply::text(text).with_action(SideAction::React(LEARNED_REACTION)),
                    None => Reply::none(),
                }
            }
            Err(e) => self.save_failed(&e),
        }
    }

    // ------------------------------------------------------------------
    // Store access
    // ------------------------------------------------------------------

    /// Run a store operation for `user` on the blocking pool.
    async fn on_store<T, F>(&self, user: &UserId, op: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&ProfileStore, &UserId) -> CoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let owner = user.clone();
        tokio::task::spawn_blocking(move || op(&store, &owner))
            .await
            .map_err(|e| ChunkError::Persistence {
                user: user.to_string(),
                reason: format!("store task failed: {e}"),
            })?
    }

    async fn profile_snapshot(&self, user: &UserId) -> UserProfile {
        let snapshot = self
            .on_store(user, |store, user| Ok(store.list(user)))
            .await;
        snapshot.unwrap_or_else(|e| {
            warn!(user = %user, error = %e, "Serving empty profile");
            UserProfile::new(user.clone())
        })
    }

    fn save_failed(&self, err: &ChunkError) -> Reply {
        if err.is_persistence() {
            Counters::bump(&self.counters.persistence_failures);
        }
        Reply::text(reply::could_not_save())
    }
}
