//! Append-only JSON-line audit log.
//!
//! One line per event, fsynced before the write returns. A single rotation
//! slot (`audit.log.1`) keeps the file under the size ceiling.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::json;
use tracing::warn;

pub const MAX_SIZE: u64 = 10 * 1024 * 1024;

pub struct AuditLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            lock: Mutex::new(()),
        }
    }

    /// A disabled log that swallows everything. Used by tests.
    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Mutex::new(()),
        }
    }

    /// Append one event line. Failures are reported to the tracing log but
    /// never propagate: auditing must not take the signer down.
    pub fn record(&self, event: &str, mut fields: serde_json::Value) {
        let Some(path) = &self.path else { return };
        let _guard = self.lock.lock().expect("audit lock");

        if let Some(map) = fields.as_object_mut() {
            map.insert("ts".into(), json!(chrono::Utc::now().to_rfc3339()));
            map.insert("event".into(), json!(event));
        }

        if let Err(e) = self.append_line(path, &fields) {
            warn!(error = %e, event, "audit write failed");
        }
    }

    fn append_line(&self, path: &PathBuf, line: &serde_json::Value) -> std::io::Result<()> {
        // Rotate inline when the file would exceed the ceiling.
        if let Ok(meta) = std::fs::metadata(path) {
            if meta.len() >= MAX_SIZE {
                let rotated = path.with_extension("log.1");
                let _ = std::fs::rename(path, rotated);
            }
        }

        let mut options = std::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        writeln!(file, "{line}")?;
        file.sync_all()
    }
}

/// Convenience constructor for the common `{"key": "value"}` shapes.
#[macro_export]
macro_rules! audit_fields {
    ($($key:literal : $value:expr),* $(,)?) => {
        serde_json::json!({ $($key: $value),* })
    };
}
