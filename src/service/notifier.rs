//! User alerts

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fire-and-forget user alert
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Alerts written to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        warn!("[ALERT] {}: {}", title, body);
    }
}

/// Marker file recording that an alert was raised and not yet seen
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    path: PathBuf,
}

impl NotificationRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mark(&self, body: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, body)
    }

    pub fn is_marked(&self) -> bool {
        self.path.exists()
    }

    /// Forget the pending alert; clearing twice is fine
    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Wraps a notifier and records every alert it raises
pub struct RecordedNotifier<N> {
    inner: N,
    record: NotificationRecord,
}

impl<N: Notifier> RecordedNotifier<N> {
    pub fn new(inner: N, record: NotificationRecord) -> Self {
        Self { inner, record }
    }
}

impl<N: Notifier> Notifier for RecordedNotifier<N> {
    fn notify(&self, title: &str, body: &str) {
        self.inner.notify(title, body);
        match self.record.mark(body) {
            Ok(()) => debug!("[ALERT] Recorded at {}", self.record.path().display()),
            Err(e) => warn!("[ALERT] Could not record alert at {}: {}", self.record.path().display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default, Clone)]
    struct Capture(Arc<Mutex<Vec<(String, String)>>>);

    impl Notifier for Capture {
        fn notify(&self, title: &str, body: &str) {
            self.0.lock().push((title.to_string(), body.to_string()));
        }
    }

    #[test]
    fn test_record_mark_and_clear() {
        let dir = TempDir::new().unwrap();
        let record = NotificationRecord::new(dir.path().join("state").join("notification.flag"));

        assert!(!record.is_marked());
        record.clear().unwrap();

        record.mark("open").unwrap();
        assert!(record.is_marked());
        assert_eq!(std::fs::read_to_string(record.path()).unwrap(), "open");

        record.clear().unwrap();
        assert!(!record.is_marked());
    }

    #[test]
    fn test_recorded_notifier_forwards_and_marks() {
        let dir = TempDir::new().unwrap();
        let record = NotificationRecord::new(dir.path().join("notification.flag"));
        let capture = Capture::default();
        let notifier = RecordedNotifier::new(capture.clone(), record.clone());

        notifier.notify("carwatch", "left open");

        assert_eq!(
            *capture.0.lock(),
            vec![("carwatch".to_string(), "left open".to_string())]
        );
        assert!(record.is_marked());
    }

    #[test]
    fn test_unwritable_record_still_notifies() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the write fail
        let blocked = dir.path().join("notification.flag");
        std::fs::create_dir(&blocked).unwrap();

        let capture = Capture::default();
        let notifier = RecordedNotifier::new(capture.clone(), NotificationRecord::new(&blocked));
        notifier.notify("carwatch", "left open");

        assert_eq!(capture.0.lock().len(), 1);
    }
}
