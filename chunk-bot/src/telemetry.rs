//! Tracing subscriber setup.

use chunk_core::config::GeneralConfig;
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG` when set and valid, else from `general.log_level`.
#[must_use]
pub fn env_filter(general: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&general.log_level))
}

/// Install the global fmt subscriber. Plain text by default, JSON lines
/// when `general.json_logs` is set.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(general: &GeneralConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(general))
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if general.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_refused() {
        let general = GeneralConfig::default();
        let _ = init(&general);
        assert!(!init(&general));
    }
}
