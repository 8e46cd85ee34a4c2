use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::layout::BackupDirectoryLayout;

/// The shared `success` marker of a deployment group.
///
/// Its modification time is the end of the last run in which every backed
/// up container succeeded.
#[derive(Debug, Clone)]
pub struct SuccessTracker {
    marker: PathBuf,
}

impl SuccessTracker {
    pub fn new(layout: &BackupDirectoryLayout, namespace: &str, group: &str) -> Self {
        Self {
            marker: layout.success_marker(namespace, group),
        }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Move the marker forward to now.
    ///
    /// The new marker is written next to the old one and renamed over it.
    /// A marker dated in the future is left alone.
    pub fn record_success(&self) -> Result<()> {
        let now = SystemTime::now();
        if self.last_success_time() > now {
            log::warn!(
                "{} is dated in the future, not moving it back",
                self.marker.display()
            );
            return Ok(());
        }

        let dir = self.marker.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let tmp = dir.join(format!(
            "{}.tmp-{}",
            crate::layout::SUCCESS_MARKER,
            std::process::id()
        ));
        std::fs::write(&tmp, format!("{}\n", chrono::Local::now().to_rfc3339()))
            .map_err(|e| Error::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.marker).map_err(|e| Error::io(&self.marker, e))?;

        log::debug!("Touched {}", self.marker.display());
        Ok(())
    }

    /// Modification time of the marker, the epoch if there is none.
    pub fn last_success_time(&self) -> SystemTime {
        std::fs::metadata(&self.marker)
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH)
    }

    pub fn age_hours(&self) -> f64 {
        self.age_hours_at(SystemTime::now())
    }

    /// Hours between the last success and `now`, rounded to one decimal.
    pub fn age_hours_at(&self, now: SystemTime) -> f64 {
        let age = now
            .duration_since(self.last_success_time())
            .unwrap_or(Duration::ZERO);
        (age.as_secs_f64() / 360.0).round() / 10.0
    }

    pub fn within_threshold(&self, hours: f64) -> bool {
        self.within_threshold_at(hours, SystemTime::now())
    }

    pub fn within_threshold_at(&self, hours: f64, now: SystemTime) -> bool {
        let Ok(age) = now.duration_since(self.last_success_time()) else {
            return true;
        };
        age.as_secs_f64() <= hours * 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn tracker(root: &Path) -> SuccessTracker {
        SuccessTracker::new(&BackupDirectoryLayout::new(root), "paas-staging", "custapi")
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn missing_marker_is_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        let t = tracker(tmp.path());
        assert_eq!(t.last_success_time(), UNIX_EPOCH);
        assert!(!t.within_threshold(24.0));
    }

    #[test]
    fn record_creates_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let t = tracker(tmp.path());
        t.record_success().unwrap();

        assert!(tmp.path().join("paas-staging/custapi/success").is_file());
        assert!(t.within_threshold(24.0));
        assert_eq!(t.age_hours(), 0.0);
    }

    #[test]
    fn threshold_boundaries() {
        let tmp = tempfile::tempdir().unwrap();
        let t = tracker(tmp.path());
        t.record_success().unwrap();

        let now = SystemTime::now();
        set_mtime(t.marker(), now - 23 * HOUR);
        assert!(t.within_threshold_at(24.0, now));

        set_mtime(t.marker(), now - 25 * HOUR);
        assert!(!t.within_threshold_at(24.0, now));
        assert_eq!(t.age_hours_at(now), 25.0);
    }

    #[test]
    fn age_is_rounded_to_one_decimal() {
        let tmp = tempfile::tempdir().unwrap();
        let t = tracker(tmp.path());
        t.record_success().unwrap();

        let now = SystemTime::now();
        set_mtime(t.marker(), now - Duration::from_secs(5 * 3600 + 20 * 60));
        assert_eq!(t.age_hours_at(now), 5.3);
    }

    #[test]
    fn marker_never_moves_backwards() {
        let tmp = tempfile::tempdir().unwrap();
        let t = tracker(tmp.path());
        t.record_success().unwrap();

        let future = SystemTime::now() + 2 * HOUR;
        set_mtime(t.marker(), future);
        t.record_success().unwrap();
        assert!(t.last_success_time() > SystemTime::now() + HOUR);
    }

    #[test]
    fn marker_moves_forward() {
        let tmp = tempfile::tempdir().unwrap();
        let t = tracker(tmp.path());
        t.record_success().unwrap();

        let old = SystemTime::now() - 48 * HOUR;
        set_mtime(t.marker(), old);
        t.record_success().unwrap();
        assert!(t.last_success_time() > old);
    }
}
