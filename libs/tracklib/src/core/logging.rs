//! Process-wide `tracing` subscriber.

use tracing_subscriber::EnvFilter;

use crate::core::config::LoggingConfig;

/// Install a stderr fmt subscriber filtered by `RUST_LOG`, falling back to
/// `config.filter`.
///
/// Returns `false` if a global subscriber was already installed, by this
/// function or by the host.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_second_init_is_noop() {
        let config = LoggingConfig {
            filter: "tracklib=debug".to_owned(),
            ansi: false,
        };
        // Another test may have installed it first.
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }

    #[test]
    #[serial]
    fn test_bad_directive_falls_back() {
        let config = LoggingConfig {
            filter: "[[not a directive".to_owned(),
            ansi: false,
        };
        let _ = init_logging(&config);
        assert!(tracing::dispatcher::has_been_set());
    }
}
