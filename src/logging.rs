use crate::error::AppError;
use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct SimpleLogger {
    log_file: PathBuf,
}

static LOGGER: OnceCell<SimpleLogger> = OnceCell::new();

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_entry = format!(
                "{} {} - {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            );

            if let Ok(mut file) = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)
            {
                let _ = file.write_all(log_entry.as_bytes());
            }
        }
    }

    fn flush(&self) {}
}

/// Sends every record at debug level and above to `<log_dir>/log.txt`.
pub fn init(log_dir: &Path) -> Result<(), AppError> {
    create_dir_all(log_dir)?;

    let logger = LOGGER.get_or_init(|| SimpleLogger {
        log_file: log_dir.join("log.txt"),
    });

    log::set_logger(logger).map_err(|e| AppError::Logger(e.to_string()))?;
    log::set_max_level(LevelFilter::Debug);
    Ok(())
}
