use std::fs::OpenOptions;

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Initialize the process-wide logger.
///
/// Honors `OSCILOK_LOG_FILENAME`: when set, log lines are written to that
/// file; otherwise they go to stderr. Falls back to stderr if the file
/// can't be opened, matching the source's own `FileHandler`-failure fallback.
pub fn init() {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);

    if let Ok(path) = std::env::var("OSCILOK_LOG_FILENAME") {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(err) => {
                eprintln!("oscilok: could not open log file {path}: {err}, logging to stderr");
            }
        }
    }

    let _ = builder.try_init();
}
