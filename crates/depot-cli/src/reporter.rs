//! Terminal output for engine progress.

use depot_core::Reporter;
use depot_schema::ArtifactKey;

/// Human-readable size, as shown next to finished artifacts.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// Prints one line per finished artifact to stdout and problems to stderr.
///
/// Byte-level progress is left to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for ConsoleReporter {
    fn downloading(&self, key: &ArtifactKey, current: u64, total: Option<u64>) {
        tracing::trace!(key = %key, current, total, "Transfer progress");
    }

    fn done(&self, key: &ArtifactKey, detail: &str, size: Option<u64>) {
        if self.quiet {
            return;
        }
        match size {
            Some(size) => println!("  ok    {key}  {detail} ({})", format_size(size)),
            None => println!("  ok    {key}  {detail}"),
        }
    }

    fn failed(&self, key: &ArtifactKey, reason: &str) {
        eprintln!("  FAIL  {key}  {reason}");
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{msg}");
        }
    }

    fn warning(&self, msg: &str) {
        eprintln!("warning: {msg}");
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        if !self.quiet {
            println!("{count} artifacts {action} in {elapsed_secs:.1}s");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pick_a_readable_unit() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
