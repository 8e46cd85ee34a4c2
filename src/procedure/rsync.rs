use std::path::PathBuf;

use super::{BackupProcedure, ProcedureContext};
use crate::runner::{Invocation, OutputTarget};

/// Tarball of the `backup_src` paths (or `/`) streamed out of the container.
pub struct Rsync;

impl BackupProcedure for Rsync {
    fn invocation(&self, ctx: &ProcedureContext) -> Option<Invocation> {
        let mut argv = vec!["tar".to_string(), "czf".to_string(), "-".to_string()];

        if ctx.plan.source_paths.is_empty() {
            argv.push("/".to_string());
        } else {
            argv.extend(ctx.plan.source_paths.iter().cloned());
        }

        Some(ctx.invocation(argv, OutputTarget::File(self.artifact(ctx)?)))
    }

    fn artifact(&self, ctx: &ProcedureContext) -> Option<PathBuf> {
        Some(ctx.artifact_path(&format!("{}.tar.gz", ctx.container.name)))
    }
}
