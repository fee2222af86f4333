//! Telemetry initialization.
//!
//! Controlled by two environment variables:
//! - `FOLIO_LOG`: an [`EnvFilter`] directive such as `folio=debug`. Unset
//!   means `warn`.
//! - `FOLIO_LOG_FORMAT`: `json` for one JSON object per event on stderr,
//!   anything else for the compact human format.
//!
//! The library only emits `tracing` events. Installing a subscriber is the
//! binary's job.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Filter directive variable.
pub const LOG_ENV: &str = "FOLIO_LOG";

/// Output format variable.
pub const LOG_FORMAT_ENV: &str = "FOLIO_LOG_FORMAT";

/// Held by `main()` until exit. Dropping it is a no-op today; the type keeps
/// call sites stable if buffered exporters are added.
#[must_use]
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber.
///
/// Calling this twice (as tests might) leaves the first subscriber in place.
pub fn init() -> TelemetryGuard {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!("telemetry already initialized: {e}");
    }

    TelemetryGuard { _private: () }
}
