use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::models::LoggingConfig;

/// `RUST_LOG` when set and valid, otherwise the configured directive.
pub fn build_env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_env_filter(logging);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if logging.json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.context("global tracing subscriber already installed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_filter_is_used_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let logging = LoggingConfig {
            filter: "warn,edgeship::rollback=debug".into(),
            json: false,
        };
        let rendered = build_env_filter(&logging).to_string();
        assert!(rendered.contains("edgeship::rollback=debug"));
    }

    #[test]
    fn second_install_is_reported() {
        let logging = LoggingConfig::default();
        let _ = init_tracing(&logging);
        assert!(init_tracing(&logging).is_err());
    }
}
