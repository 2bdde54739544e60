//! Run log setup.
//!
//! stdout belongs to the runtime hook protocol, so lines go to stderr or to
//! an append-only file, never to stdout.

use env_logger::{Builder, Env, Target};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Filter directive, e.g. `debug` or `npu_prestart::kernel=trace`.
pub const LOG_ENV: &str = "NPU_PRESTART_LOG";

/// Optional file receiving the run log instead of stderr.
pub const LOG_FILE_ENV: &str = "NPU_PRESTART_LOG_FILE";

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    File(PathBuf),
}

impl LogSink {
    pub fn from_value(value: Option<OsString>) -> Self {
        match value {
            Some(path) if !path.is_empty() => LogSink::File(PathBuf::from(path)),
            _ => LogSink::Stderr,
        }
    }
}

/// Initialise the global logger. Safe to call more than once; later calls
/// are ignored.
pub fn init() {
    let sink = LogSink::from_value(std::env::var_os(LOG_FILE_ENV));

    let mut builder = Builder::from_env(Env::default().filter_or(LOG_ENV, DEFAULT_FILTER));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    let mut sink_error = None;
    match &sink {
        LogSink::Stderr => {
            builder.target(Target::Stderr);
        }
        LogSink::File(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                builder.target(Target::Stderr);
                sink_error = Some((path.clone(), e));
            }
        },
    }

    if builder.try_init().is_err() {
        return;
    }
    if let Some((path, e)) = sink_error {
        log::warn!("Cannot open log file {}, logging to stderr: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_defaults_to_stderr() {
        assert_eq!(LogSink::from_value(None), LogSink::Stderr);
        assert_eq!(LogSink::from_value(Some(OsString::new())), LogSink::Stderr);
        assert_eq!(
            LogSink::from_value(Some(OsString::from("/var/log/npu-prestart/run.log"))),
            LogSink::File(PathBuf::from("/var/log/npu-prestart/run.log"))
        );
    }

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init();
        log::info!("logger initialised twice");
    }
}
