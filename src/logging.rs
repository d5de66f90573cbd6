//! Console logging setup on top of `tracing-subscriber`.

use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub ansi_colors: bool,
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: Level::INFO, ansi_colors: true, include_target: false }
    }
}

/// Installs the global subscriber.  `RUST_LOG` wins over `config.level`.
/// Calling this twice is harmless; the second install is ignored.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .try_init();
}

/// Parses `trace|debug|info|warn|error`.
pub fn parse_level(s: &str) -> Option<Level> {
    s.parse().ok()
}
