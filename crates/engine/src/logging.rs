use crate::config::LoggingConfig;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the global logger once; later calls are ignored.
///
/// Filter precedence: the configured filter, then `RUST_LOG`, then `info`.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        match resolve_filter(config, std::env::var("RUST_LOG").ok()) {
            Some(filter) => {
                builder.parse_filters(&filter);
            }
            None => {
                builder.filter_level(log::LevelFilter::Info);
            }
        }

        builder.init();
        log::debug!("logging initialized");
    });
}

fn resolve_filter(config: &LoggingConfig, env: Option<String>) -> Option<String> {
    config
        .filter
        .clone()
        .filter(|f| !f.trim().is_empty())
        .or(env.filter(|f| !f.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_filter_wins_over_environment() {
        let config = LoggingConfig {
            filter: Some("debug".into()),
        };
        assert_eq!(
            resolve_filter(&config, Some("warn".into())).as_deref(),
            Some("debug")
        );
    }

    #[test]
    fn environment_used_when_config_is_silent() {
        let config = LoggingConfig::default();
        assert_eq!(
            resolve_filter(&config, Some("warn".into())).as_deref(),
            Some("warn")
        );
        assert_eq!(resolve_filter(&config, None), None);
    }

    #[test]
    fn blank_filters_are_ignored() {
        let config = LoggingConfig {
            filter: Some("  ".into()),
        };
        assert_eq!(resolve_filter(&config, Some(String::new())), None);
    }
}
