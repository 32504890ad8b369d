//! Logging Infrastructure
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and tower-http.

use std::path::Path;
use tracing_subscriber::EnvFilter;

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("sweep_server={log_level},tower_http={log_level}").into()
    })
}

/// Initialize the logger with optional daily rolling file output
pub fn init_logger(log_level: &str, log_dir: Option<&str>) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(log_level))
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    if let Some(dir) = log_dir {
        let log_path = Path::new(dir);
        if std::fs::create_dir_all(log_path).is_ok()
            && let Some(dir_str) = log_path.to_str()
        {
            let file_appender = tracing_appender::rolling::daily(dir_str, "sweep-server");
            subscriber.with_ansi(false).with_writer(file_appender).init();
            return;
        }
        subscriber.init();
        tracing::warn!(log_dir = %dir, "Log directory is not usable, logging to stdout");
        return;
    }

    subscriber.init();
}
