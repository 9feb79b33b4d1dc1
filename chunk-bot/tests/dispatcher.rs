//! End-to-end dispatch tests: scripted model, in-memory backend, seeded games.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use chunk_bot::{CommandDispatcher, InboundEvent, Reply, SideAction};
use chunk_core::config::{ChunkConfig, ExtractionConfig, LlmConfig, MergeConfig, RateLimitConfig, WindowLimit};
use chunk_core::metrics::Counters;
use chunk_core::{
    ActionCategory, CandidateFact, FactKey, GameManager, MemoryBackend, ProfileStore, RateLimiter,
    UserId,
};
use chunk_llm::FactExtractor;
use chunk_llm::testing::ScriptedCompletion;

type Dispatcher = CommandDispatcher<ScriptedCompletion>;

const LONG_MESSAGE: &str = "my favorite color has always been blue";

fn dispatcher_with(
    script: ScriptedCompletion,
    limits: RateLimitConfig,
    backend: Arc<MemoryBackend>,
) -> Dispatcher {
    let config = ChunkConfig::default();
    CommandDispatcher::new(
        Arc::new(ProfileStore::new(backend, MergeConfig::default())),
        Arc::new(RateLimiter::new(limits)),
        Arc::new(GameManager::with_seed(config.game.clone(), 7)),
        FactExtractor::new(script, ExtractionConfig::default(), LlmConfig::default()),
        Arc::new(Counters::new()),
        "/",
    )
}

fn dispatcher(script: ScriptedCompletion) -> Dispatcher {
    dispatcher_with(script, RateLimitConfig::default(), Arc::new(MemoryBackend::new()))
}

fn event(text: &str) -> InboundEvent {
    InboundEvent::new("alice", "general", text)
}

fn text_of(reply: &Reply) -> &str {
    reply.text.as_deref().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Plain messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plain_message_learns_and_reacts() {
    let d = dispatcher(ScriptedCompletion::replies([
        r#"{"facts":[{"key":"favorite_color","value":"blue","confidence":0.9}],"topics":["Art"]}"#,
    ]));
    let reply = d.handle(&event(LONG_MESSAGE).with_message_id("m-1")).await;

    assert_eq!(reply.action, Some(SideAction::React("🧠")));
    assert!(text_of(&reply).contains("favorite color"));

    let profile = d.store().get(&UserId::new("alice"));
    let fact = profile.fact("favorite_color").expect("stored");
    assert_eq!(fact.value, "blue");
    assert_eq!(fact.source_message_id.as_ref().map(|m| m.as_str()), Some("m-1"));
    assert!(profile.topics.contains("art"));

    let counters = d.counters().snapshot();
    assert_eq!(counters.facts_added, 1);
    assert_eq!(counters.extractions, 1);
}

#[tokio::test]
async fn short_message_is_ignored_without_spending_budget() {
    let d = dispatcher(ScriptedCompletion::replies([r#"{"facts":[]}"#]));
    let reply = d.handle(&event("lol ok")).await;

    assert!(reply.is_silent());
    assert_eq!(d.counters().snapshot().extractions, 0);
    assert_eq!(
        d.limiter().recorded(&UserId::new("alice"), ActionCategory::Chat, Instant::now()),
        0
    );
}

#[tokio::test]
async fn missing_model_backend_spends_no_budget() {
    let d = dispatcher(ScriptedCompletion::replies([r#"{"facts":[]}"#]).unavailable());
    let reply = d.handle(&event(LONG_MESSAGE)).await;

    assert!(reply.is_silent());
    assert_eq!(d.counters().snapshot().extractions, 0);
    assert_eq!(
        d.limiter().recorded(&UserId::new("alice"), ActionCategory::Chat, Instant::now()),
        0
    );
}

#[tokio::test]
async fn retraction_drops_a_known_fact() {
    let d = dispatcher(ScriptedCompletion::replies([
        r#"{"facts":[],"topics":[],"retract":["pet"]}"#,
    ]));
    let alice = UserId::new("alice");
    let fact = |k: &str, v: &str| CandidateFact::new(FactKey::new(k).expect("key"), v, 0.9);
    d.store()
        .merge(&alice, &[fact("pet", "cat"), fact("job", "baker")])
        .expect("seed");

    let reply = d.handle(&event("I don't have a cat anymore, she moved out")).await;

    assert!(text_of(&reply).contains("dropped your pet"));
    let profile = d.store().get(&alice);
    assert!(profile.fact("pet").is_none());
    assert!(profile.fact("job").is_some());
    assert_eq!(d.counters().snapshot().facts_retracted, 1);
}

#[tokio::test]
async fn failed_extraction_is_silent_and_changes_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let d = dispatcher_with(
        ScriptedCompletion::replies(["sorry, I can't do that"]),
        RateLimitConfig::default(),
        Arc::clone(&backend),
    );
    let reply = d.handle(&event(LONG_MESSAGE)).await;

    assert!(reply.is_silent());
    assert_eq!(d.counters().snapshot().extraction_failures, 1);
    assert_eq!(backend.write_count(), 0);
}

#[tokio::test]
async fn persistence_failure_reports_could_not_save() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_fail_writes(true);
    let d = dispatcher_with(
        ScriptedCompletion::replies([r#"{"facts":[{"key":"job","value":"baker","confidence":0.9}]}"#]),
        RateLimitConfig::default(),
        Arc::clone(&backend),
    );
    let reply = d.handle(&event("I work as a baker downtown")).await;

    assert!(text_of(&reply).contains("couldn't save"));
    assert_eq!(reply.action, None);
    assert_eq!(d.counters().snapshot().persistence_failures, 1);
    assert!(d.store().get(&UserId::new("alice")).fact("job").is_none());
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn denied_message_invokes_nothing_else() {
    let limits = RateLimitConfig {
        chat: WindowLimit::new(1, 60),
        ..RateLimitConfig::default()
    };
    let d = dispatcher_with(
        ScriptedCompletion::replies([r#"{"facts":[]}"#, r#"{"facts":[]}"#]),
        limits,
        Arc::new(MemoryBackend::new()),
    );

    d.handle(&event(LONG_MESSAGE)).await;
    let reply = d.handle(&event(LONG_MESSAGE)).await;

    assert!(text_of(&reply).contains("please wait"));
    let counters = d.counters().snapshot();
    assert_eq!(counters.extractions, 1);
    assert_eq!(counters.rate_limited, 1);
}

#[tokio::test]
async fn categories_have_separate_budgets() {
    let limits = RateLimitConfig {
        info: WindowLimit::new(1, 60),
        ..RateLimitConfig::default()
    };
    let d = dispatcher_with(ScriptedCompletion::default(), limits, Arc::new(MemoryBackend::new()));

    assert!(text_of(&d.handle(&event("/help")).await).contains("/guess"));
    assert!(text_of(&d.handle(&event("/help")).await).contains("please wait"));
    assert!(text_of(&d.handle(&event("/game 10")).await).contains("game started"));

    // Another user is unaffected.
    let bob = InboundEvent::new("bob", "general", "/help");
    assert!(!text_of(&d.handle(&bob).await).contains("please wait"));
}

// ---------------------------------------------------------------------------
// Game commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn game_round_trip() {
    let d = dispatcher(ScriptedCompletion::default());
    let channel = event("").channel;

    let started = d.handle(&event("/game 10")).await;
    assert!(text_of(&started).contains("between 1 and 10"));
    assert!(text_of(&started).contains("/guess <number>"));
    let secret = d.games().session(&channel).expect("active").secret();

    let invalid = d.handle(&event("/guess 11")).await;
    assert!(text_of(&invalid).contains("out of range"));
    assert_eq!(d.games().session(&channel).expect("active").attempts(), 0);

    let won = d.handle(&event(&format!("/guess {secret}"))).await;
    assert!(text_of(&won).contains("you got it"));
    assert_eq!(won.action, Some(SideAction::React("🎉")));
    assert!(d.games().session(&channel).is_none());

    let counters = d.counters().snapshot();
    assert_eq!(counters.games_started, 1);
    assert_eq!(counters.games_won, 1);
}

#[tokio::test]
async fn second_game_in_channel_is_refused() {
    let d = dispatcher(ScriptedCompletion::default());
    d.handle(&event("/game")).await;
    let again = d.handle(&InboundEvent::new("bob", "general", "/game 5")).await;
    assert!(text_of(&again).contains("already running"));

    let elsewhere = d.handle(&InboundEvent::new("bob", "random", "/game 5")).await;
    assert!(text_of(&elsewhere).contains("game started"));
}

#[tokio::test]
async fn end_and_bad_arguments() {
    let d = dispatcher(ScriptedCompletion::default());
    assert!(text_of(&d.handle(&event("/end")).await).contains("no game running"));
    assert!(text_of(&d.handle(&event("/game 1")).await).contains("at least 2"));
    assert!(text_of(&d.handle(&event("/guess soon")).await).starts_with("usage: /guess"));
    assert!(text_of(&d.handle(&event("/dance")).await).contains("/help"));

    d.handle(&event("/game")).await;
    assert!(text_of(&d.handle(&event("/end")).await).contains("game ended"));
    assert_eq!(d.counters().snapshot().games_aborted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_admit_one_game() {
    let d = Arc::new(dispatcher(ScriptedCompletion::default()));
    let mut tasks = Vec::new();
    for i in 0..8 {
        let d = Arc::clone(&d);
        tasks.push(tokio::spawn(async move {
            d.handle(&InboundEvent::new(format!("user{i}"), "arena", "/game 50")).await
        }));
    }
    let mut started = 0;
    for task in tasks {
        let reply = task.await.expect("task");
        if text_of(&reply).contains("game started") {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(d.counters().games_started.load(Ordering::Relaxed), 1);
}

// ---------------------------------------------------------------------------
// Profile commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forget_removes_only_matching_facts() {
    let d = dispatcher(ScriptedCompletion::default());
    let alice = UserId::new("alice");
    let fact = |k: &str, v: &str| CandidateFact::new(FactKey::new(k).expect("key"), v, 0.9);
    d.store()
        .merge(&alice, &[fact("favorite_color", "blue"), fact("favorite_food", "pizza")])
        .expect("seed");

    let reply = d.handle(&event("/forget blue")).await;
    assert_eq!(text_of(&reply), "done, forgot 1 fact");

    let mydata = d.handle(&event("/mydata")).await;
    assert!(text_of(&mydata).contains("favorite food: pizza"));
    assert!(!text_of(&mydata).contains("blue"));

    let nothing = d.handle(&event("/forget spaceships")).await;
    assert!(text_of(&nothing).contains("couldn't find"));
}

#[tokio::test]
async fn forget_without_text_is_a_usage_error() {
    let d = dispatcher(ScriptedCompletion::default());
    let reply = d.handle(&event("/forget")).await;
    assert!(text_of(&reply).starts_with("usage: /forget"));
}

#[tokio::test]
async fn mydata_for_stranger_is_friendly() {
    let d = dispatcher(ScriptedCompletion::default());
    let reply = d.handle(&event("/mydata")).await;
    assert!(text_of(&reply).contains("don't know much"));
}

#[tokio::test]
async fn from_config_uses_prefix_and_limits() {
    let config = ChunkConfig::from_toml(
        r#"
        [general]
        command_prefix = "!"

        [rate_limits.game]
        max_calls = 1
        window_secs = 60
        "#,
    )
    .expect("config");
    let extractor = FactExtractor::new(
        ScriptedCompletion::default(),
        config.extraction.clone(),
        config.llm.clone(),
    );
    let d = CommandDispatcher::from_config(&config, Arc::new(MemoryBackend::new()), extractor);

    let started = d.handle(&event("!game 10")).await;
    assert!(text_of(&started).contains("game started"));
    assert!(text_of(&started).contains("!guess <number>"));
    assert!(text_of(&d.handle(&event("!guess 3")).await).contains("please wait"));
    // The default prefix is now just text, and too short to extract.
    assert!(d.handle(&event("/game")).await.is_silent());
}
