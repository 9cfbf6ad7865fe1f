//! Minimal stderr logger
//!
//! The level filter is set by `main` from the `-v` count, this logger only
//! decides where records go.

use log::{Log, Metadata, Record};

#[derive(Debug)]
pub struct Logger(());

static LOGGER: Logger = Logger(());

impl Logger {
    pub fn init() -> Result<(), log::SetLoggerError> {
        log::set_logger(&LOGGER)
    }
}

impl Log for Logger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        // log::set_max_level already filters
        true
    }

    fn log(&self, record: &Record<'_>) {
        match (record.file(), record.line()) {
            (Some(file), Some(line)) => {
                eprintln!("{}|{}|{}:{}: {}", record.level(), record.target(), file, line, record.args());
            }
            (Some(file), None) => {
                eprintln!("{}|{}|{}: {}", record.level(), record.target(), file, record.args());
            }
            _ => {
                eprintln!("{}|{}: {}", record.level(), record.target(), record.args());
            }
        }
    }

    fn flush(&self) {}
}
