//! Tracing subscriber setup and the startup banner.
//!
//! Courier's own crates log at the configured level. Dependencies such as
//! the WebSocket and Redis clients stay at `warn` unless `RUST_LOG` says
//! otherwise.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log targets of the Courier crates.
const COURIER_TARGETS: [&str; 4] = ["courier", "lib_courier", "courier_gateway", "courier_event_system"];

/// Filter directives for `level`: `warn` globally, `level` for Courier.
pub fn default_directives(level: &str) -> String {
    let mut directives = String::from("warn");
    for target in COURIER_TARGETS {
        directives.push(',');
        directives.push_str(target);
        directives.push('=');
        directives.push_str(level);
    }
    directives
}

/// Installs the global subscriber.
///
/// `RUST_LOG` replaces the level-derived filter when it is set. JSON output
/// is used when either `json_format` (the CLI flag) or the config asks for it.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&config.level))?,
    };

    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);
    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry.with(base.json().flatten_event(true)).try_init()?;
    } else {
        registry.with(base.with_ansi(true)).try_init()?;
    }

    info!("🔧 Logging initialized (level: {})", config.level);
    Ok(())
}

/// Logs the startup banner.
pub fn display_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("📨 Courier v{}", version);
    info!("   WebSocket gateway and event router");
}
