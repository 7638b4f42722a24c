//! Logging utilities.
//!
//! Builds the tracing subscriber used by the binary and provides helpers to
//! report an error together with its chain of sources.
use tracing::{error, Subscriber};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter, Layer};

/// The error type returned when building a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum BuildSubscriberError {
    #[error("failed to parse filtering directive")]
    Parse(#[from] tracing_subscriber::filter::ParseError),
}

/// Build a tracing subscriber.
///
/// The filter is read from `RUST_LOG` and defaults to `info`.
pub fn build_subscriber() -> Result<impl Subscriber + Send + Sync, BuildSubscriberError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    Ok(tracing_subscriber::registry().with(fmt_layer.with_filter(env_filter)))
}

/// Renders an error followed by all of its sources, separated by `: `.
pub fn error_chain<E: std::error::Error + ?Sized>(err: &E) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Emits an `error!` event carrying the full error chain.
pub fn log_error<E: std::error::Error + ?Sized>(err: &E, context: &str) {
    error!(error = %error_chain(err), "{}", context);
}

/// Builds a closure for `Result::inspect_err` that logs the error with a
/// context message.
#[macro_export]
macro_rules! as_error {
    ($context:expr) => {
        |err| $crate::utils::o11y::logging::log_error(err, $context)
    };
}
