//! Telemetry sink: a write-only fd receiving one human-readable line per
//! prefetch/evict event. Lossy under process kill is acceptable; a write
//! failure is logged once and telemetry is silently dropped thereafter.

use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::warn;

/// Write-only telemetry sink. `None` inner means telemetry is disabled
/// (either by construction or after a write failure).
pub struct TelemetrySink {
    fd: Mutex<Option<File>>,
    poisoned: AtomicBool,
}

impl TelemetrySink {
    /// Wrap an already-open write-only file as the telemetry sink.
    pub fn new(fd: File) -> Self {
        Self {
            fd: Mutex::new(Some(fd)),
            poisoned: AtomicBool::new(false),
        }
    }

    /// A sink that drops every line. Used when no telemetry fd is
    /// configured, and in tests.
    pub fn discard() -> Self {
        Self {
            fd: Mutex::new(None),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Write one line (a trailing newline is appended). Tolerant of
    /// failure: logs to `tracing::warn!` exactly once, then silently
    /// drops every later call.
    pub fn log(&self, line: &str) {
        if self.poisoned.load(Ordering::Relaxed) {
            return;
        }
        let mut guard = self.fd.lock().unwrap_or_else(|e| e.into_inner());
        let Some(file) = guard.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(file, "{line}") {
            warn!(error = %err, "telemetry write failed, disabling sink");
            self.poisoned.store(true, Ordering::Relaxed);
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_one_line_per_call() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let sink = TelemetrySink::new(f.reopen().unwrap());
        sink.log("prefetch layer=blk.0 bytes=100");
        sink.log("evict layer=blk.0");
        drop(sink);

        let mut contents = String::new();
        f.as_file_mut().flush().unwrap();
        File::open(f.path())
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("prefetch"));
        assert!(lines[1].starts_with("evict"));
    }

    #[test]
    fn discard_sink_never_panics() {
        let sink = TelemetrySink::discard();
        sink.log("anything");
        sink.log("anything else");
    }
}
