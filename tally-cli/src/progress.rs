// tally-cli: Line-rewriting progress counter on stderr

use std::io::{self, Write};

pub struct Counter {
    count: u64,
    total: Option<u64>,
    interval: u64,
    prefix: String,
}

impl Counter {
    pub fn new(total: Option<u64>, interval: u64, prefix: impl Into<String>) -> Self {
        Self {
            count: 0,
            total,
            interval: interval.max(1),
            prefix: prefix.into(),
        }
    }

    pub fn increment(&mut self) {
        self.count += 1;
        if self.count % self.interval == 0 {
            self.write();
        }
    }

    /// Final report, with a newline.
    pub fn done(&self) {
        self.write();
        let _ = writeln!(io::stderr());
    }

    fn write(&self) {
        let mut err = io::stderr();
        let _ = match self.total {
            Some(total) => write!(err, "\r{}{} / {} ", self.prefix, self.count, total),
            None => write!(err, "\r{}{} ", self.prefix, self.count),
        };
        let _ = err.flush();
    }
}
