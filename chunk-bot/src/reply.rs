//! User-visible reply text.

use std::time::Duration;

use chunk_core::{ActionCategory, GameError, GameSession, GuessOutcome, MergeResult, UserProfile};

/// Whole seconds to wait, rounded up and never zero.
#[must_use]
pub fn wait_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// Reply for a rate-limit denial.
#[must_use]
pub fn rate_limited(category: ActionCategory, retry_after: Duration) -> String {
    format!(
        "slow down! you've hit the {category} limit, please wait {}s",
        wait_secs(retry_after)
    )
}

/// Reply after a merge that learned something, if it did.
#[must_use]
pub fn learned(result: &MergeResult) -> Option<String> {
    if !result.learned_anything() {
        return None;
    }
    let mut parts = Vec::new();
    if !result.added.is_empty() {
        let keys: Vec<String> = result.added.iter().map(|k| k.readable()).collect();
        parts.push(format!("noted your {}", keys.join(", ")));
    }
    if !result.updated.is_empty() {
        let keys: Vec<String> = result.updated.iter().map(|k| k.readable()).collect();
        parts.push(format!("updated your {}", keys.join(", ")));
    }
    if !result.retracted.is_empty() {
        let keys: Vec<String> = result.retracted.iter().map(|k| k.readable()).collect();
        parts.push(format!("dropped your {}", keys.join(", ")));
    }
    if !result.topics_added.is_empty() {
        parts.push(format!("into {}", result.topics_added.join(", ")));
    }
    Some(format!("got it: {}", parts.join("; ")))
}

/// Reply when a profile change could not be written.
#[must_use]
pub fn could_not_save() -> String {
    "couldn't save that right now, try again later".to_string()
}

/// Reply for a freshly started game.
#[must_use]
pub fn game_started(prefix: &str, session: &GameSession) -> String {
    let mut text = format!(
        "game started! I'm thinking of a number between 1 and {}. guess with {prefix}guess <number>.",
        session.max_value()
    );
    if session.max_attempts() > 0 {
        text.push_str(&format!(" you've got {} attempts.", session.max_attempts()));
    }
    text
}

/// Reply for a guess.
#[must_use]
pub fn guess(outcome: &GuessOutcome, value: i64) -> String {
    let left = |remaining: Option<u32>| match remaining {
        Some(n) => format!(" ({n} tries left)"),
        None => String::new(),
    };
    match *outcome {
        GuessOutcome::TooHigh { remaining, .. } => {
            format!("nope, the number is lower than {value}{}", left(remaining))
        }
        GuessOutcome::TooLow { remaining, .. } => {
            format!("nope, the number is higher than {value}{}", left(remaining))
        }
        GuessOutcome::Won { attempts, secret } => {
            format!("you got it! the number was {secret} ({attempts} attempts)")
        }
        GuessOutcome::Lost { secret, .. } => {
            format!("game over! the number was {secret}. better luck next time")
        }
        GuessOutcome::Invalid { max_value } => {
            format!("{value} is out of range, guess between 1 and {max_value}")
        }
    }
}

/// Reply for an ended game.
#[must_use]
pub fn game_ended(session: &GameSession) -> String {
    format!(
        "game ended after {} attempts. the number was {}",
        session.attempts(),
        session.secret()
    )
}

/// Correction message for a game operation that could not proceed.
#[must_use]
pub fn game_error(prefix: &str, err: &GameError) -> String {
    match err {
        GameError::AlreadyActive(_) => "a game is already running here, finish it or end it first".into(),
        GameError::NoActiveSession(_) => {
            format!("no game running here, start one with {prefix}game [max]")
        }
        GameError::InvalidMaxValue(v) => format!("max number has to be at least 2, not {v}"),
        GameError::NotOwner(owner) => format!("only {owner} can end this game"),
    }
}

/// Profile display for `mydata`.
#[must_use]
pub fn profile(profile: &UserProfile) -> String {
    if profile.is_empty() {
        return "I don't know much about you yet. chat with me a bit so I can learn!".into();
    }
    let mut lines = vec!["here's what I know about you:".to_string()];
    for (key, record) in &profile.facts {
        lines.push(format!("- {}: {}", key.readable(), record.value));
    }
    if !profile.topics.is_empty() {
        let topics: Vec<&str> = profile.topics.iter().map(String::as_str).collect();
        lines.push(format!("interests: {}", topics.join(", ")));
    }
    lines.join("\n")
}

/// Reply for `forget`.
#[must_use]
pub fn forgot(removed: usize, query: &str) -> String {
    match removed {
        0 => format!("couldn't find anything about \"{query}\" to forget"),
        1 => "done, forgot 1 fact".into(),
        n => format!("done, forgot {n} facts"),
    }
}

/// Usage hint for a malformed command.
#[must_use]
pub fn usage(prefix: &str, synopsis: &str) -> String {
    format!("usage: {prefix}{synopsis}")
}

/// Reply for an unknown command.
#[must_use]
pub fn unknown(prefix: &str, name: &str) -> String {
    format!("don't know \"{name}\". try {prefix}help")
}

/// Command list.
#[must_use]
pub fn help(prefix: &str) -> String {
    [
        format!("{prefix}game [max]: start a guessing game (default 1-100)"),
        format!("{prefix}guess <number>: guess the number"),
        format!("{prefix}end: end the game in this channel"),
        format!("{prefix}mydata: show what I know about you"),
        format!("{prefix}forget <text>: forget facts matching the text"),
    ]
    .join("\n")
}
