//! Tracing setup and forwarding of domain events to tracing

use tracing::Level;
use tracing_subscriber::EnvFilter;
use vessel_events::AppEvent;

/// Initialize tracing/logging
///
/// Logs always go to stderr so stdout stays clean for results. `RUST_LOG`
/// overrides the level chosen from `--debug`.
pub fn init_tracing(json_mode: bool, debug: bool) {
    let default = if debug { "info,vessel=debug" } else { "warn,vessel=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(debug);
    if json_mode {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Log an event at the level it declares
pub fn log_event(event: &AppEvent) {
    let domain = event.log_target();
    match event.log_level() {
        Level::ERROR => tracing::error!(target: "vessel::events", domain, ?event),
        Level::WARN => tracing::warn!(target: "vessel::events", domain, ?event),
        Level::INFO => tracing::info!(target: "vessel::events", domain, ?event),
        Level::DEBUG => tracing::debug!(target: "vessel::events", domain, ?event),
        _ => tracing::trace!(target: "vessel::events", domain, ?event),
    }
}
