use crate::config::LogLevel;
use slog::{o, Drain as _, LevelFilter, Logger};
use slog_async::Async;
use slog_term::{FullFormat, PlainSyncDecorator, TermDecorator, TestStdoutWriter};

/// Build the terminal logger every node binary uses and hand it to `f`. The async drain is
/// flushed when `f` returns and the last logger clone is dropped.
pub fn run_with_logger<T>(log_level: LogLevel, f: impl FnOnce(Logger) -> T) -> T {
    let decorator = TermDecorator::new().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = Async::new(drain).build().fuse();
    let drain = LevelFilter::new(drain, log_level.as_slog_level()).fuse();
    let log = Logger::root(drain, o!());
    f(log)
}

pub fn test_logger() -> Logger {
    let decorator = PlainSyncDecorator::new(TestStdoutWriter);
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}
