//! Where backups of a plan live on disk.
//!
//! ```text
//! <root>/<namespace>/<group>/success
//! <root>/<namespace>/<group>/<timestamp>/<pod>/<container>/<container>.{log,cmd}
//! <root>/<namespace>/<group>/<timestamp>/<pod>/<container>/<artifact>
//! ```

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::plan::BackupPlan;

pub const SUCCESS_MARKER: &str = "success";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDirectoryLayout {
    root: PathBuf,
}

impl BackupDirectoryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding every timestamp bucket of a deployment group.
    pub fn group_root(&self, namespace: &str, group: &str) -> PathBuf {
        self.root.join(namespace).join(group)
    }

    pub fn success_marker(&self, namespace: &str, group: &str) -> PathBuf {
        self.group_root(namespace, group).join(SUCCESS_MARKER)
    }

    pub fn pod_root(&self, plan: &BackupPlan) -> PathBuf {
        self.group_root(&plan.namespace, &plan.group)
            .join(&plan.timestamp)
            .join(&plan.pod)
    }

    pub fn container_dir(&self, plan: &BackupPlan, container: &str) -> PathBuf {
        self.pod_root(plan).join(container)
    }

    pub fn log_file(&self, plan: &BackupPlan, container: &str) -> PathBuf {
        self.container_dir(plan, container)
            .join(format!("{container}.log"))
    }

    pub fn cmd_file(&self, plan: &BackupPlan, container: &str) -> PathBuf {
        self.container_dir(plan, container)
            .join(format!("{container}.cmd"))
    }

    pub fn artifact_file(&self, plan: &BackupPlan, container: &str, artifact: &str) -> PathBuf {
        self.container_dir(plan, container).join(artifact)
    }

    /// Snapshot directory of an etcd container below the node local destination.
    pub fn etcd_local_dir(&self, plan: &BackupPlan, container: &str) -> Option<PathBuf> {
        plan.local_dest.as_ref().map(|dest| {
            dest.join(&plan.timestamp)
                .join(&plan.pod)
                .join(container)
        })
    }
}

/// Create `path` (mode 0700) and hand it to `uid` if one is given.
pub fn create_owned_dir(path: &Path, uid: Option<u32>) -> Result<()> {
    log::debug!("mkdir -p {}", path.display());
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|e| Error::io(path, e))?;

    if let Some(uid) = uid {
        chown_recursive(path, uid)?;
    }

    Ok(())
}

/// `chown -R uid:uid path`
pub fn chown_recursive(path: &Path, uid: u32) -> Result<()> {
    log::debug!("chown -R {uid}:{uid} {}", path.display());
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(|e| {
            let err = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            Error::io(path, err)
        })?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(uid))
            .map_err(|e| Error::io(entry.path(), e))?;
    }
    Ok(())
}
