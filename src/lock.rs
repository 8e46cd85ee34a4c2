//! Claiming a pod root for a backup run.
//!
//! The pod root is created with an exclusive `mkdir`; whoever creates it
//! owns the run for that timestamp bucket. While the run is going an
//! `.in-progress` marker sits in the pod root, afterwards `.result` holds
//! the outcome so later invocations can report it.

use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const IN_PROGRESS_MARKER: &str = ".in-progress";
pub const RESULT_MARKER: &str = ".result";

#[derive(Debug)]
pub enum ClaimState {
    /// This process owns the run.
    Claimed(PodClaim),
    /// A run for this bucket already finished.
    Finished { success: bool },
    /// Another run is going on, or crashed before finishing.
    InProgress,
}

#[derive(Debug)]
pub struct PodClaim {
    root: PathBuf,
}

impl PodClaim {
    pub fn acquire(pod_root: &Path) -> Result<ClaimState> {
        if let Some(parent) = pod_root.parent() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)
                .map_err(|e| Error::io(parent, e))?;
        }

        match std::fs::DirBuilder::new().mode(0o700).create(pod_root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(existing_state(pod_root)),
            Err(e) => return Err(Error::io(pod_root, e)),
        }

        start_run(pod_root)?;

        Ok(ClaimState::Claimed(Self {
            root: pod_root.to_path_buf(),
        }))
    }

    /// Record the outcome and release the claim.
    pub fn finish(self, success: bool) -> Result<()> {
        let result = self.root.join(RESULT_MARKER);
        let tmp = self
            .root
            .join(format!("{RESULT_MARKER}.tmp-{}", std::process::id()));

        let content = if success { "success\n" } else { "failure\n" };
        std::fs::write(&tmp, content).map_err(|e| Error::io(&tmp, e))?;
        std::fs::rename(&tmp, &result).map_err(|e| Error::io(&result, e))?;

        let marker = self.root.join(IN_PROGRESS_MARKER);
        match std::fs::remove_file(&marker) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(Error::io(&marker, e)),
            _ => Ok(()),
        }
    }
}

/// Mark a freshly created pod root as in progress, releasing it on failure.
fn start_run(pod_root: &Path) -> Result<()> {
    let marker = pod_root.join(IN_PROGRESS_MARKER);
    let content = format!(
        "pid={}\nstarted={}\n",
        std::process::id(),
        chrono::Local::now().to_rfc3339()
    );

    if let Err(e) = std::fs::write(&marker, content) {
        let _ = std::fs::remove_dir_all(pod_root);
        return Err(Error::io(&marker, e));
    }
    Ok(())
}

/// Classify a pod root that already exists.
fn existing_state(pod_root: &Path) -> ClaimState {
    if let Ok(content) = std::fs::read_to_string(pod_root.join(RESULT_MARKER)) {
        return ClaimState::Finished {
            success: content.trim() == "success",
        };
    }

    if pod_root.join(IN_PROGRESS_MARKER).exists() {
        return ClaimState::InProgress;
    }

    // written by a version which did not leave markers behind
    if has_command_record(pod_root) {
        return ClaimState::Finished { success: true };
    }

    ClaimState::InProgress
}

/// Whether some container directory of the pod holds a `.cmd` file.
fn has_command_record(pod_root: &Path) -> bool {
    let Ok(containers) = std::fs::read_dir(pod_root) else {
        return false;
    };

    containers.flatten().any(|container| {
        std::fs::read_dir(container.path())
            .map(|files| {
                files
                    .flatten()
                    .any(|f| f.path().extension().is_some_and(|ext| ext == "cmd"))
            })
            .unwrap_or(false)
    })
}

/// Whether any pod directory directly below `bucket` is still being written.
pub fn bucket_in_progress(bucket: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(bucket) else {
        return false;
    };

    entries
        .flatten()
        .any(|pod| pod.path().join(IN_PROGRESS_MARKER).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_sees_the_result() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("ns/group/2024-03-05_14:30/pod");

        let ClaimState::Claimed(claim) = PodClaim::acquire(&root).unwrap() else {
            panic!("first acquire must claim");
        };
        assert!(root.join(IN_PROGRESS_MARKER).exists());

        assert!(matches!(
            PodClaim::acquire(&root).unwrap(),
            ClaimState::InProgress
        ));

        claim.finish(false).unwrap();
        assert!(!root.join(IN_PROGRESS_MARKER).exists());
        assert!(matches!(
            PodClaim::acquire(&root).unwrap(),
            ClaimState::Finished { success: false }
        ));
    }

    #[test]
    fn crashed_run_is_not_success() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pod");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(IN_PROGRESS_MARKER), "pid=1\n").unwrap();

        assert!(matches!(
            PodClaim::acquire(&root).unwrap(),
            ClaimState::InProgress
        ));
        assert!(bucket_in_progress(tmp.path()));
    }

    #[test]
    fn unmarked_tree_counts_as_finished() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pod");
        std::fs::create_dir_all(root.join("db")).unwrap();
        std::fs::write(root.join("db").join("db.cmd"), "kubectl exec\n").unwrap();

        assert!(matches!(
            PodClaim::acquire(&root).unwrap(),
            ClaimState::Finished { success: true }
        ));
        assert!(!bucket_in_progress(tmp.path()));
    }

    #[test]
    fn empty_root_is_unfinished() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pod");
        std::fs::create_dir_all(root.join("db")).unwrap();

        assert!(matches!(
            PodClaim::acquire(&root).unwrap(),
            ClaimState::InProgress
        ));
    }

    #[test]
    fn failed_marker_write_releases_the_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pod");
        // a directory in place of the marker file makes the write fail
        std::fs::create_dir_all(root.join(IN_PROGRESS_MARKER).join("x")).unwrap();

        assert!(start_run(&root).is_err());
        assert!(!root.exists());

        assert!(matches!(
            PodClaim::acquire(&root).unwrap(),
            ClaimState::Claimed(_)
        ));
    }
}
