use std::{future::Future, path::PathBuf, time::Duration};

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Current time, UTC
pub fn now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

/// Run a remote call with a hard deadline, an elapsed deadline becomes [`Error::Timeout`].
pub async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout)),
    }
}

/// 初始化日志
pub fn init_log(log: Option<PathBuf>) -> tracing_appender::non_blocking::WorkerGuard {
    let subscriber_builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true);
    let (non_blocking, guard) = if let Some(log) = log {
        // output to file，daily rotate, non-blocking
        if !log.is_dir() {
            panic!("log path is not a directory");
        }
        let file_appender = tracing_appender::rolling::daily(log, "course_engine.log");
        tracing_appender::non_blocking(file_appender)
    } else {
        // stderr, stdout carries command output
        tracing_appender::non_blocking(std::io::stderr())
    };
    tracing::subscriber::set_global_default(
        subscriber_builder.with_writer(non_blocking).finish(),
    )
    .expect("init log failed");
    guard
}
