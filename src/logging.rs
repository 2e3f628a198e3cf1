use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{AppError, AppResult};

/// Environment variable that overrides the verbosity flags.
pub static LOG_ENV_VAR: &str = "LEAN_EMBED_VIZ_LOG";

/// Install the global subscriber. `default_level` comes from the CLI verbosity flags.
pub fn setup_logger(default_level: LevelFilter, ansi: bool) -> AppResult<()> {
    let indicatif_layer = IndicatifLayer::new();

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let fmt = fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_file(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions))
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_writer(indicatif_layer.get_stderr_writer())
        .pretty();

    tracing_subscriber::registry()
        .with(fmt) // Direct fmt logs to stderr writer
        .with(indicatif_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| AppError::Other(format!("Failed to initialize logger: {e}")))
}
