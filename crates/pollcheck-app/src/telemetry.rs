//! Tracing setup for the `pollcheck` binary.
//!
//! Logs go to stderr so stdout stays machine-readable JSON.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_ENV: &str = "POLLCHECK_LOG";
const LOG_FORMAT_ENV: &str = "POLLCHECK_LOG_FORMAT";
const VERBOSE_DIRECTIVES: &str =
    "warn,pollcheck=debug,pollcheck_core=debug,pollcheck_engine=debug,pollcheck_adapters=debug";

fn filter_directives(verbose: bool, env_value: Option<&str>) -> String {
    match (verbose, env_value.map(str::trim).filter(|v| !v.is_empty())) {
        (true, _) => VERBOSE_DIRECTIVES.to_string(),
        (false, Some(value)) => value.to_string(),
        (false, None) => "warn".to_string(),
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_tracing(verbose: bool) {
    let env_value = std::env::var(LOG_ENV).ok();
    let directives = filter_directives(verbose, env_value.as_deref());
    let env_filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
            .ok();
    }
}
