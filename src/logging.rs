use tracing::Level;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(level: Level) -> String {
    format!("space_relay={},warn", level)
}

/// Initialize logging for the relay.
///
/// `RUST_LOG` overrides the level. Calling this twice panics, as installing
/// a second global subscriber does.
pub fn init_logging(level: Level, json_output: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    if json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_timer(SystemTime)
            .with_target(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(Level::DEBUG), "space_relay=DEBUG,warn");
        assert!(EnvFilter::try_new(default_filter(Level::INFO)).is_ok());
    }
}
