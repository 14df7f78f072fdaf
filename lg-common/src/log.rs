// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slog::{Drain, Logger};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Channel depth of the async drain. Log records beyond this are dropped
/// rather than blocking a refresh or lookup thread.
const ASYNC_CHAN_SIZE: usize = 0x8000;

/// A bunyan (JSON lines) logger on stdout.
pub fn init_logger() -> Logger {
    build_logger(std::io::stdout())
}

/// A bunyan logger writing to `path`, truncating it first.
pub fn init_file_logger<P: AsRef<Path>>(path: P) -> std::io::Result<Logger> {
    Ok(build_logger(File::create(path)?))
}

pub fn build_logger<W: Write + Send + 'static>(w: W) -> Logger {
    let drain = slog_bunyan::new(w).build().fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(ASYNC_CHAN_SIZE)
        .build()
        .fuse();
    slog::Logger::root(drain, slog::o!())
}

/// A human readable terminal logger. Filtering follows `RUST_LOG`.
pub fn init_term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(ASYNC_CHAN_SIZE)
        .build()
        .fuse();
    slog::Logger::root(drain, slog::o!())
}

/// A logger that discards everything, for tests and library defaults.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
