use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info", "warn",
/// "ember_engine=debug,wgpu=warn").
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    /// Prefix records with a millisecond timestamp.
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            timestamps: true,
        }
    }
}

static INIT: Once = Once::new();

/// Handle on the process logger.
///
/// Created once at startup and shut down before exit; the runtime owns it.
#[derive(Debug)]
pub struct Logging {
    filter: log::LevelFilter,
}

impl Logging {
    /// Installs the global logger.
    ///
    /// Filter precedence: `config.env_filter`, then `RUST_LOG`, then `info`.
    /// Only the first call installs a logger; later calls return a handle on it.
    pub fn init(config: LoggingConfig) -> Self {
        INIT.call_once(|| {
            let mut builder = env_logger::Builder::new();

            if let Some(filter) = &config.env_filter {
                builder.parse_filters(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                builder.parse_filters(&filter);
            } else {
                builder.filter_level(log::LevelFilter::Info);
            }

            builder.write_style(config.write_style);
            if config.timestamps {
                builder.format_timestamp_millis();
            } else {
                builder.format_timestamp(None);
            }

            // A test harness may have installed a logger already.
            match builder.try_init() {
                Ok(()) => log::debug!("logging initialized"),
                Err(err) => log::warn!("keeping the installed logger: {err}"),
            }
        });

        Self { filter: log::max_level() }
    }

    /// Most verbose level that will be emitted.
    pub fn max_level(&self) -> log::LevelFilter {
        self.filter
    }

    /// Flushes buffered records.
    pub fn shutdown(self) {
        log::debug!("logging shut down");
        log::logger().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_keeps_an_existing_logger() {
        let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::Trace).try_init();

        let logging = Logging::init(LoggingConfig { env_filter: Some("error".into()), ..LoggingConfig::default() });
        assert_eq!(logging.max_level(), log::max_level());
        assert_ne!(logging.max_level(), log::LevelFilter::Off);

        // Second call is a no-op returning a handle on the same logger.
        let again = Logging::init(LoggingConfig::default());
        assert_eq!(again.max_level(), logging.max_level());
        again.shutdown();
        logging.shutdown();
    }
}
