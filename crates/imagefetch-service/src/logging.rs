use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{MakeWriter, fmt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Installs a global subscriber writing one JSON object per event to `make_writer`.
///
/// Events are additionally forwarded to Sentry, which is a no-op unless a Sentry client has been
/// bound. Fails if a global subscriber is already installed.
pub fn init_json_logging<W>(env_filter: &str, make_writer: W) -> Result<(), TryInitError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(make_writer)
        .finish()
        .with(sentry::integrations::tracing::layer())
        .try_init()
}
