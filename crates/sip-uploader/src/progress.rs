//! Aggregate progress across the concurrent upload pool.
//!
//! A single lock guards the counters and the terminal write, matching the
//! source's process-global tracker (see DESIGN.md) while avoiding its
//! module-level singleton: callers hold an `Arc<ProgressTracker>` and share
//! it across worker tasks instead.

use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    seen_so_far: u64,
    size: u64,
    completed: u64,
    failed: u64,
    numfiles: u64,
}

pub struct ProgressTracker {
    inner: Mutex<Counters>,
    quiet: bool,
}

impl ProgressTracker {
    pub fn new(numfiles: u64, size: u64) -> Self {
        Self {
            inner: Mutex::new(Counters {
                numfiles,
                size,
                ..Counters::default()
            }),
            quiet: false,
        }
    }

    /// A tracker that renders no status line, for tests.
    pub fn quiet(numfiles: u64, size: u64) -> Self {
        Self {
            inner: Mutex::new(Counters {
                numfiles,
                size,
                ..Counters::default()
            }),
            quiet: true,
        }
    }

    /// Record `delta` bytes transmitted for whichever transfer called back.
    pub fn on_bytes(&self, delta: u64) {
        let mut c = self.inner.lock().expect("progress lock poisoned");
        c.seen_so_far += delta;
        self.render(&c);
    }

    pub fn mark_completed(&self) {
        let mut c = self.inner.lock().expect("progress lock poisoned");
        c.completed += 1;
        self.render(&c);
    }

    pub fn mark_failed(&self) {
        let mut c = self.inner.lock().expect("progress lock poisoned");
        c.failed += 1;
        self.render(&c);
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        let c = self.inner.lock().expect("progress lock poisoned");
        (c.seen_so_far, c.size, c.completed, c.failed, c.numfiles)
    }

    fn render(&self, c: &Counters) {
        if self.quiet {
            return;
        }
        print!(
            "\r{}/{} bytes, {} completed, {} failed of {} files",
            c.seen_so_far, c.size, c.completed, c.failed, c.numfiles
        );
        let _ = std::io::stdout().flush();
    }

    /// End the carriage-return line with a newline once the pool has drained.
    pub fn finish(&self) {
        if !self.quiet {
            println!();
        }
    }
}
