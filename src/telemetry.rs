use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

// Global one-time initialization for the logging backend
static INIT: Once = Once::new();

pub fn init_tracing(level: &str) {
    init(parse_level(level));
}

/// Installs a fmt subscriber at `level`. `RUST_LOG`, when set, takes precedence.
/// Later calls are no-ops, as is calling this after another subscriber was installed.
pub fn init(level: Level) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok();

        if installed {
            tracing::info!("Tracing initialized at level = {}", level);
        }
    });
}

pub fn parse_level(s: &str) -> Level {
    match s.to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}
