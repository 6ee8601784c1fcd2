//! 日志系统初始化（tracing）。
//!
//! 控制台层受 `--debug` 控制，文件层始终按 DEBUG 级别写入数据目录下的
//! `logs/latest.log`。返回的 `LogSystem` 持有后台写线程的 guard，
//! 需存活到进程结束。

use std::fs;
use std::io;

use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::paths::logs_dir;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub console: bool,
    pub use_color: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            console: true,
            use_color: true,
        }
    }
}

pub struct LogSystem {
    _guard: WorkerGuard,
}

impl LogSystem {
    pub fn init(options: LogOptions) -> Result<Self, LogError> {
        let logs_dir = logs_dir();
        fs::create_dir_all(&logs_dir)?;

        let file_appender = rolling::never(&logs_dir, "latest.log");
        let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
            .lossy(false)
            .finish(file_appender);

        let console_level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        let console_writer: BoxMakeWriter = if options.console {
            BoxMakeWriter::new(io::stderr)
        } else {
            BoxMakeWriter::new(io::sink)
        };

        let console_layer = fmt::layer()
            .with_target(false)
            .with_level(true)
            .with_ansi(options.use_color)
            .with_writer(console_writer)
            .with_filter(console_level);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(LevelFilter::DEBUG);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("global subscriber") || msg.contains("already") {
                    LogError::AlreadyInitialized
                } else {
                    LogError::SubscriberInit(e)
                }
            })?;

        Ok(Self { _guard: guard })
    }
}
