//! Command parsing.
//!
//! A message that starts with the configured prefix is a command; anything
//! else is a plain message for fact extraction. Parsing is total: malformed
//! arguments become [`Command::Usage`], unknown names [`Command::Unknown`].

use chunk_core::ActionCategory;

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `game [max_value]`
    Game {
        /// Requested upper bound; the configured default when absent.
        max_value: Option<i64>,
    },
    /// `guess <value>`
    Guess(i64),
    /// `end`
    End,
    /// `mydata` (alias `info`)
    MyData,
    /// `forget <text>`
    Forget(String),
    /// `help`
    Help,
    /// A known command with missing or malformed arguments.
    Usage(&'static str),
    /// Anything else after the prefix.
    Unknown(String),
}

impl Command {
    /// Parse `text` as a command. `None` means a plain message.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let body = text.trim().strip_prefix(prefix)?;
        let mut parts = body.split_whitespace();
        let name = parts.next()?.to_lowercase();
        let rest: Vec<&str> = parts.collect();

        let command = match name.as_str() {
            "game" => match rest.first() {
                None => Self::Game { max_value: None },
                Some(raw) => match raw.parse() {
                    Ok(max_value) => Self::Game {
                        max_value: Some(max_value),
                    },
                    Err(_) => Self::Usage("game [max number]"),
                },
            },
            "guess" => match rest.first().and_then(|raw| raw.parse().ok()) {
                Some(value) => Self::Guess(value),
                None => Self::Usage("guess <number>"),
            },
            "end" => Self::End,
            "mydata" | "info" => Self::MyData,
            "forget" if rest.is_empty() => Self::Usage("forget <what to forget>"),
            "forget" => Self::Forget(rest.join(" ")),
            "help" => Self::Help,
            _ => Self::Unknown(name),
        };
        Some(command)
    }

    /// Rate-limit budget this command draws from.
    #[must_use]
    pub fn category(&self) -> ActionCategory {
        match self {
            Self::Game { .. } | Self::Guess(_) | Self::End => ActionCategory::Game,
            Self::MyData => ActionCategory::MyData,
            Self::Forget(_) => ActionCategory::Forget,
            Self::Help => ActionCategory::Info,
            Self::Usage(_) | Self::Unknown(_) => ActionCategory::Default,
        }
    }
}
