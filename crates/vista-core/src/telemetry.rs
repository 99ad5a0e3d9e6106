//! Centralised tracing initialisation for Vista binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter`, the fmt layer (plain or JSON), and
//! optionally the [`BroadcastHub`] layer that feeds live log streams.
//!
//! Safe to call more than once: subsequent calls are silently ignored
//! (the global subscriber can only be set once per process).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::broadcast::BroadcastHub;

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
/// * `hub`: when given, every emitted event is also published to the hub.
pub fn init_tracing(json: bool, level: Level, hub: Option<&BroadcastHub>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let mirror = hub.map(BroadcastHub::layer);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .with(mirror)
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .with(mirror)
            .try_init()
            .ok();
    }
}
