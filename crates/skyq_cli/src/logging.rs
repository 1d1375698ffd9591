use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

/// `-d` level to log filter.
pub fn level_for(debug: u8) -> LevelFilter {
    match debug {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Runtime handle on the log level.
pub struct LogControl {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl LogControl {
    pub fn set_level(&self, debug: u8) {
        if let Err(e) = self.handle.modify(|f| *f = level_for(debug)) {
            tracing::warn!("cannot change log level: {e}");
        }
    }
}

/// Logs go to stderr; stdout carries the status lines.
pub fn init(debug: u8) -> LogControl {
    let (filter, handle) = reload::Layer::new(level_for(debug));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
    LogControl { handle }
}
