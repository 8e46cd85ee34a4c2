//! Removal of expired timestamp buckets.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::lock::bucket_in_progress;
use crate::plan::parse_any_bucket;

/// Names which look like a timestamp bucket. Anything else is never touched.
static CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9][0-9_:\-]*$").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Looks like a timestamp but is not one of the bucket formats.
    Ambiguous,
    /// A pod below it is still being backed up (or crashed mid-run).
    InProgress,
    Io(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ambiguous => f.write_str("name is not a known timestamp format"),
            Self::InProgress => f.write_str("backup in progress"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    /// Entries removed (or which would be removed in a dry run).
    pub removed: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    /// Buckets still inside the retention period.
    pub kept: usize,
}

impl PurgeReport {
    pub fn merge(&mut self, other: PurgeReport) {
        self.removed.extend(other.removed);
        self.skipped.extend(other.skipped);
        self.kept += other.kept;
    }

    /// Removal failures count as errors, ambiguous names and live runs do not.
    pub fn has_errors(&self) -> bool {
        self.skipped
            .iter()
            .any(|(_, reason)| matches!(reason, SkipReason::Io(_)))
    }
}

pub struct RetentionPurger {
    retention: chrono::Duration,
    dry_run: bool,
}

impl RetentionPurger {
    pub fn new(retention: chrono::Duration, dry_run: bool) -> Self {
        Self { retention, dry_run }
    }

    /// Remove the buckets directly below `dir` older than the retention.
    ///
    /// A bucket's age counts from the end of its period.
    pub fn purge(&self, dir: &Path, now: NaiveDateTime) -> PurgeReport {
        let mut report = PurgeReport::default();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                report
                    .skipped
                    .push((dir.to_path_buf(), SkipReason::Io(e.to_string())));
                return report;
            }
        };

        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !CANDIDATE.is_match(name) {
                continue;
            }

            let path = entry.path();
            let Some((granularity, start)) = parse_any_bucket(name) else {
                log::warn!("Skipping {}: not a known timestamp format", path.display());
                report.skipped.push((path, SkipReason::Ambiguous));
                continue;
            };

            let age = now - granularity.period_end(start);
            if age <= self.retention {
                report.kept += 1;
                continue;
            }

            if bucket_in_progress(&path) {
                log::warn!("Skipping {}: backup in progress", path.display());
                report.skipped.push((path, SkipReason::InProgress));
                continue;
            }

            if self.dry_run {
                log::info!("Would remove {}", path.display());
                report.removed.push(path);
                continue;
            }

            match remove_entry(&path) {
                Ok(()) => {
                    log::info!("Removed {}", path.display());
                    report.removed.push(path);
                }
                Err(e) => {
                    log::error!("Could not remove {}: {e}", path.display());
                    report.skipped.push((path, SkipReason::Io(e.to_string())));
                }
            }
        }

        report
    }
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
