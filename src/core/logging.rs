//! Logging setup and request-scoped context.
//!
//! Request IDs are carried in tokio task-local storage so any log line inside
//! a request's task can include them without threading the id through every
//! call.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

tokio::task_local! {
    /// Task-local storage for the current request ID.
    pub static REQUEST_ID: String;
}

/// Get the current request ID from context, if set.
///
/// Returns an empty string outside a request scope.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Initialize the global tracing subscriber.
///
/// Filter level comes from `RUST_LOG`, defaulting to `info`. With
/// `json_format` the output is line-delimited JSON for log shippers.
/// Returns an error if a subscriber was already installed.
pub fn init_logging(json_format: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }
    Ok(())
}
