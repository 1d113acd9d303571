//! Tracing setup shared by binaries and tests.

use std::sync::Once;

use config::environment::Environment;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Directory for rolling log files in production.
const LOG_DIRECTORY: &str = "logs";

/// Environment variable enabling log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static INIT_TEST_TRACING: Once = Once::new();

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] std::io::Error),
    #[error("failed to bridge `log` records into tracing: {0}")]
    LogTracer(#[from] tracing_log::log::SetLoggerError),
    #[error("a global tracing subscriber is already installed: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive until the end of `main`.
#[must_use = "dropping the flusher stops background log writing"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global subscriber for `app_name`.
///
/// Development writes human readable lines to stdout. Production writes JSON lines to a daily
/// rolling file in [`LOG_DIRECTORY`]. `RUST_LOG` overrides the default filter.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{app_name}=info,bqsync=info")));

    let guard = if environment.is_prod() {
        let appender = rolling::daily(LOG_DIRECTORY, format!("{app_name}.log"));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer));
        tracing::subscriber::set_global_default(subscriber)?;
        guard
    } else {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer));
        tracing::subscriber::set_global_default(subscriber)?;
        guard
    };

    Ok(LogFlusher { _guard: guard })
}

/// Installs a test writer subscriber once per process when `ENABLE_TRACING` is set.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bqsync=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
