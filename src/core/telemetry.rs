use tracing_subscriber::FmtSubscriber;

use crate::core::config::RunConfig;
use crate::core::errors::{ChainError, Result};

/// Install a global fmt subscriber at the configured level.
///
/// Each event is written to stdout in one locked write, so lines from
/// concurrent tasks never interleave.
pub fn init_logging(config: &RunConfig) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level()?)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ChainError::configuration(format!("setting default subscriber failed: {e}")))
}
