use std::path::PathBuf;

use super::{BackupProcedure, ProcedureContext};
use crate::error::Result;
use crate::layout::chown_recursive;
use crate::runner::{Invocation, OutputTarget};

pub const ETCDCTL: &str = "/etcd/etcdctl";

/// `etcdctl backup` writing a native snapshot below the `backup_dest` mount.
///
/// The snapshot lands in `<backup_dest>/<timestamp>/<pod>/<container>`, a
/// path inside the container backed by node local or shared storage. Only
/// the log and the command record are written into the backup root.
pub struct Etcd;

impl BackupProcedure for Etcd {
    fn invocation(&self, ctx: &ProcedureContext) -> Option<Invocation> {
        let data_dir = ctx.plan.source_paths.first()?;
        let backup_dir = self.artifact(ctx)?;

        let argv = vec![
            ETCDCTL.to_string(),
            "backup".to_string(),
            format!("--data-dir={data_dir}"),
            format!("--backup-dir={}", backup_dir.display()),
        ];
        Some(ctx.invocation(argv, OutputTarget::Log))
    }

    fn artifact(&self, ctx: &ProcedureContext) -> Option<PathBuf> {
        ctx.layout.etcd_local_dir(ctx.plan, &ctx.container.name)
    }

    /// The group directory is shared with the etcd pod, hand it over.
    fn prepare(&self, ctx: &ProcedureContext) -> Result<()> {
        if let Some(uid) = ctx.plan.run_as_user_for(ctx.container) {
            chown_recursive(
                &ctx.layout
                    .group_root(&ctx.plan.namespace, &ctx.plan.group),
                uid,
            )?;
        }
        Ok(())
    }
}
