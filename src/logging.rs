//! Logger setup: console output plus a per-run `simulation.log`.
//!
//! A tee logger wraps the normal `env_logger` console logger and appends
//! every accepted record to `<output-dir>/simulation.log`, so each run's
//! artifacts carry the full human-readable log alongside the CSV/YAML data.

use chrono::Local;
use env_logger::Builder;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Forwards records to the console logger and mirrors them into a file.
pub struct FileTeeLogger {
    inner: env_logger::Logger,
    file: Mutex<File>,
}

impl FileTeeLogger {
    pub fn new(inner: env_logger::Logger, file: File) -> Self {
        Self {
            inner,
            file: Mutex::new(file),
        }
    }

    /// Maximum log level filter of the wrapped console logger.
    pub fn filter(&self) -> LevelFilter {
        self.inner.filter()
    }
}

/// One `simulation.log` line: wall-clock stamp, level, module, message.
fn format_line(record: &Record) -> String {
    format!(
        "{} [{}] {}: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.module_path().unwrap_or("?"),
        record.args()
    )
}

impl Log for FileTeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(format_line(record).as_bytes());
        }
    }

    fn flush(&self) {
        self.inner.flush();
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Install the global logger writing to the console and to
/// `<output_dir>/simulation.log`. `verbose` raises this crate's filter to
/// Debug. May only be called once per process.
pub fn init(output_dir: &Path, verbose: bool) -> anyhow::Result<()> {
    let crate_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let console = Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("lpwan_protocol_sim"), crate_level)
        .build();

    let log_path = output_dir.join("simulation.log");
    let file = File::create(&log_path)?;

    let tee = FileTeeLogger::new(console, file);
    let max_level = tee.filter();
    log::set_boxed_logger(Box::new(tee))
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;
    log::set_max_level(max_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(args: std::fmt::Arguments) -> String {
        let record = Record::builder()
            .args(args)
            .level(log::Level::Warn)
            .module_path(Some("lpwan_protocol_sim::test"))
            .build();
        format_line(&record)
    }

    #[test]
    fn line_format_carries_level_module_and_message() {
        let line = render(format_args!("hello"));
        assert!(line.contains("[WARN]"));
        assert!(line.contains("lpwan_protocol_sim::test: hello"));
        assert!(line.ends_with('\n'));
    }
}
