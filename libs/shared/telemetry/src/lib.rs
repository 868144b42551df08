//! Tracing setup shared by every kernel binary: a dual compact/JSON
//! subscriber plus a panic hook that logs through the same subscriber
//! before unwinding.

use std::panic;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber for `service_name`.
///
/// Debug builds get compact, human-readable output; release builds emit
/// one JSON object per line for ingestion by the dashboard's log
/// pipeline. A panic hook logs the panicking thread's location and
/// message through the same subscriber so a crashed loop task leaves a
/// trace before the runtime catches the unwind at the supervisor
/// boundary.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cfg!(debug_assertions) { "debug" } else { "info" };
        format!("{service_name}={level},tower_http=warn,hyper=warn").into()
    });

    if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }

    let service = service_name.to_string();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<no message>");
        tracing::error!(target: "panic", service = %service, location = %location, "thread panicked: {payload}");
    }));
}
