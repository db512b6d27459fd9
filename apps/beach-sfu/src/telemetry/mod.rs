pub mod logging {
    //! Process-wide `tracing` setup for the `beach-sfu` binary.

    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::EnvFilter;

    const FILTER_ENV: &str = "BEACH_SFU_LOG_FILTER";
    const TRACE_DEPS_ENV: &str = "BEACH_SFU_TRACE_DEPS";

    // webrtc-rs logs every STUN binding and SCTP chunk at trace level.
    const NOISY_DEPENDENCIES: &[&str] = &[
        "webrtc",
        "webrtc_ice",
        "webrtc_dtls",
        "webrtc_sctp",
        "webrtc_srtp",
        "webrtc_mdns",
        "interceptor",
        "tokio_tungstenite",
        "tungstenite",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl From<LogLevel> for LevelFilter {
        fn from(level: LogLevel) -> Self {
            match level {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    /// Held for the life of the process so buffered lines are flushed on exit.
    static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if WRITER_GUARD.get().is_some() {
            return Ok(());
        }

        let directives = match std::env::var(FILTER_ENV) {
            Ok(custom) => Directives {
                filter: custom,
                throttled: false,
            },
            Err(_) => Directives::for_level(config.level.into(), env_flag(TRACE_DEPS_ENV)),
        };
        let (writer, guard) = open_writer(config)?;

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&directives.filter))
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_ids(config.level == LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .try_init()
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = WRITER_GUARD.set(guard);
        if directives.throttled {
            eprintln!(
                "[beach-sfu-log] webrtc/websocket traces capped at info; set {TRACE_DEPS_ENV}=1 or {FILTER_ENV} to override"
            );
        }
        Ok(())
    }

    fn open_writer(config: &LogConfig) -> Result<(NonBlocking, WorkerGuard), InitError> {
        let Some(path) = &config.file else {
            return Ok(tracing_appender::non_blocking(std::io::stderr()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InitError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(tracing_appender::non_blocking(file))
    }

    fn env_flag(var: &str) -> bool {
        std::env::var(var).is_ok_and(|value| !value.is_empty() && value != "0")
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Directives {
        filter: String,
        throttled: bool,
    }

    impl Directives {
        fn for_level(level: LevelFilter, allow_dependency_traces: bool) -> Self {
            let filter = if level >= LevelFilter::DEBUG {
                format!("info,beach_sfu={level}").to_lowercase()
            } else {
                level.to_string().to_lowercase()
            };
            if level < LevelFilter::TRACE || allow_dependency_traces {
                return Self {
                    filter,
                    throttled: false,
                };
            }
            let caps = NOISY_DEPENDENCIES
                .iter()
                .map(|target| format!(",{target}=info"))
                .collect::<String>();
            Self {
                filter: filter + &caps,
                throttled: true,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn trace_level_caps_dependencies() {
            let directives = Directives::for_level(LevelFilter::TRACE, false);
            assert!(directives.throttled);
            assert!(directives.filter.starts_with("info,beach_sfu=trace,"));
            assert!(directives.filter.contains("webrtc_ice=info"));
            assert!(directives.filter.contains("tungstenite=info"));
        }

        #[test]
        fn dependency_traces_can_be_allowed() {
            let directives = Directives::for_level(LevelFilter::TRACE, true);
            assert!(!directives.throttled);
            assert_eq!(directives.filter, "info,beach_sfu=trace");
        }

        #[test]
        fn quieter_levels_pass_through() {
            assert_eq!(
                Directives::for_level(LevelFilter::DEBUG, false).filter,
                "info,beach_sfu=debug"
            );
            assert_eq!(
                Directives::for_level(LogLevel::default().into(), false),
                Directives {
                    filter: "warn".into(),
                    throttled: false,
                }
            );
        }
    }
}
