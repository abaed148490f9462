use std::io::{self, Write};

use flexi_logger::DeferredNow;
use log::{Level, Record};

/// Bare message for `info`, level-prefixed otherwise.
pub fn cli_format(w: &mut dyn Write, _now: &mut DeferredNow, record: &Record) -> io::Result<()> {
    match record.level() {
        Level::Info => write!(w, "{}", record.args()),
        level => write!(w, "{}: {}", level.as_str().to_lowercase(), record.args()),
    }
}
