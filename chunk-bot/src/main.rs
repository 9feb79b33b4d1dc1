//! Console gateway: reads `<user> <channel> <text>` lines from stdin and
//! prints the assistant's replies.
//!
//! Environment:
//! - `CHUNK_CONFIG`: path to a TOML config file (defaults apply when unset)
//! - `CHUNK_LLM_API_KEY`: overrides `llm.api_key`
//! - `RUST_LOG`: overrides `general.log_level`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};

use chunk_bot::{console, telemetry, CommandDispatcher};
use chunk_core::config::ChunkConfig;
use chunk_core::persistence::open_backend;
use chunk_llm::prompt::PromptTemplate;
use chunk_llm::{ApiThrottle, FactExtractor, LlmClient};

fn load_config() -> anyhow::Result<ChunkConfig> {
    let mut config = match std::env::var_os("CHUNK_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            ChunkConfig::from_file(&path)
                .with_context(|| format!("loading config from {}", path.display()))?
        }
        None => ChunkConfig::default(),
    };
    if let Ok(key) = std::env::var("CHUNK_LLM_API_KEY")
        && !key.is_empty()
    {
        config.llm.api_key = Some(key);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    telemetry::init(&config.general);

    let backend = open_backend(&config.persistence).context("opening profile backend")?;
    info!(backend = %config.persistence.backend, "Profile backend ready");

    let client = LlmClient::from_config(&config.llm).context("building LLM client")?;
    let mut extractor = FactExtractor::new(client, config.extraction.clone(), config.llm.clone())
        .with_throttle(Arc::new(ApiThrottle::new(config.throttle)));
    if let Some(path) = &config.extraction.prompt_file {
        let prompt = PromptTemplate::from_file(path).context("loading extraction prompt")?;
        info!(version = %prompt.version, "Using extraction prompt from file");
        extractor = extractor.with_prompt(prompt);
    }

    let dispatcher = Arc::new(CommandDispatcher::from_config(&config, backend, extractor));

    // Background maintenance.
    let sweep_every = Duration::from_secs(config.general.sweep_interval_secs.max(1));
    let sweeper = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_every);
        tick.tick().await;
        loop {
            tick.tick().await;
            sweeper.sweep_rate_windows();
        }
    });
    if config.game.idle_timeout_secs > 0 {
        let max_idle = Duration::from_secs(config.game.idle_timeout_secs);
        let reaper = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval((max_idle / 4).max(Duration::from_secs(1)));
            loop {
                tick.tick().await;
                for channel in reaper.expire_idle_games(max_idle) {
                    println!("[{channel}] game expired after inactivity");
                }
            }
        });
    }

    info!(prefix = %config.general.command_prefix, "Reading events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();
    let mut seq = 0_u64;
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        seq += 1;
        let Some(event) = console::parse_line(&line, seq) else {
            if !line.trim().is_empty() {
                warn!(line = %line, "Expected <user> <channel> <text>");
            }
            continue;
        };
        let dispatcher = Arc::clone(&dispatcher);
        in_flight.spawn(async move {
            let reply = dispatcher.handle(&event).await;
            if let Some(out) = console::render(&event, &reply) {
                println!("{out}");
            }
        });
        while in_flight.try_join_next().is_some() {}
    }
    while in_flight.join_next().await.is_some() {}

    let snapshot = dispatcher.counters().snapshot();
    info!(
        messages = snapshot.messages_handled,
        rate_limited = snapshot.rate_limited,
        facts_added = snapshot.facts_added,
        games_started = snapshot.games_started,
        "Shutting down"
    );
    eprint!("{}", snapshot.to_prometheus());
    Ok(())
}
