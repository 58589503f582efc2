use std::str::FromStr;
use tracing::Level;

/// Install the global fmt subscriber. Unknown levels fall back to `info`.
pub fn init(level: &str) {
    let level = parse_level(level);
    let result = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    if let Err(e) = result {
        // Already installed (tests, or a second call from the CLI).
        tracing::debug!("tracing subscriber not installed: {e}");
    }
}

pub fn parse_level(level: &str) -> Level {
    Level::from_str(level.trim()).unwrap_or(Level::INFO)
}
