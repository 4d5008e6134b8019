use crate::errors::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(level)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| Error::Config {
            message: format!("tracing already initialised: {e}"),
        })
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    let level = level.trim();
    let level = if level.is_empty() { "info" } else { level };
    EnvFilter::try_new(level).map_err(|e| Error::Config {
        message: format!("invalid logging.level {level:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        assert!(build_filter("debug").is_ok());
        assert!(build_filter("threedpot=trace,tower_http=info").is_ok());
        assert!(build_filter("  ").is_ok());
        assert!(matches!(build_filter("threedpot=verbose"), Err(Error::Config { .. })));
    }
}
