use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `fedsearch=debug`
pub const LOG_ENV: &str = "FEDSEARCH_LOG";

const DEFAULT_FILTER: &str = "info";

/// Filter from `FEDSEARCH_LOG`, else `info`
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the stderr subscriber for the binary. Later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
