//! File-backed error channels
//!
//! Two distinct sinks live next to the artifacts in the output directory:
//! `error_log.txt` records per-target capture failures (one bare line per
//! failure, grep-friendly), `operator_errors.log` records operational
//! problems (egress trouble, persistence failures) with timestamps. They are
//! passed into components explicitly; nothing in the crate logs to them
//! through global state.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

pub const DOMAIN_ERROR_LOG: &str = "error_log.txt";
pub const OPERATOR_ERROR_LOG: &str = "operator_errors.log";

pub struct ErrorSinks {
    domain: Mutex<File>,
    ops: Mutex<File>,
}

impl ErrorSinks {
    pub fn open(output_dir: &Path) -> std::io::Result<Self> {
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(output_dir.join(name))
        };
        Ok(Self {
            domain: Mutex::new(open(DOMAIN_ERROR_LOG)?),
            ops: Mutex::new(open(OPERATOR_ERROR_LOG)?),
        })
    }

    /// Record a per-target capture failure. Advisory only: the session's
    /// failed set is the source of truth, this log is never read back.
    pub fn domain_error(&self, target: &str, message: &str) {
        if let Ok(mut file) = self.domain.lock() {
            let _ = writeln!(file, "{target}: {message}");
        }
    }

    /// Record an operational failure (egress, persistence, reporting).
    pub fn ops_error(&self, message: &str) {
        if let Ok(mut file) = self.ops.lock() {
            let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(file, "{now} - ERROR - {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinks_write_to_separate_files() {
        let dir = std::env::temp_dir().join(format!("sinks-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let sinks = ErrorSinks::open(&dir).unwrap();
        sinks.domain_error("example.com", "Failed to load https://example.com");
        sinks.ops_error("session save failed");

        let domain = std::fs::read_to_string(dir.join(DOMAIN_ERROR_LOG)).unwrap();
        let ops = std::fs::read_to_string(dir.join(OPERATOR_ERROR_LOG)).unwrap();
        assert_eq!(domain, "example.com: Failed to load https://example.com\n");
        assert!(ops.contains("ERROR - session save failed"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
