use std::path::PathBuf;

use super::{BackupProcedure, ProcedureContext};
use crate::runner::{Invocation, OutputTarget};

/// `mongodump --archive --gzip` into `<container>-archive.gz`.
pub struct MongoDb;

impl BackupProcedure for MongoDb {
    fn invocation(&self, ctx: &ProcedureContext) -> Option<Invocation> {
        let argv = ["mongodump", "--archive", "--gzip"]
            .map(String::from)
            .to_vec();
        Some(ctx.invocation(argv, OutputTarget::File(self.artifact(ctx)?)))
    }

    fn artifact(&self, ctx: &ProcedureContext) -> Option<PathBuf> {
        Some(ctx.artifact_path(&format!("{}-archive.gz", ctx.container.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BackupDirectoryLayout;
    use crate::plan::tests::pod;
    use crate::procedure::tests::plan_for;

    #[test]
    fn archive_name() {
        let plan = plan_for(&pod("events", "mongodb", &["mongo"]));
        let layout = BackupDirectoryLayout::new("/b");
        let ctx = ProcedureContext {
            plan: &plan,
            container: &plan.containers[0],
            layout: &layout,
        };

        let inv = MongoDb.invocation(&ctx).unwrap();
        assert_eq!(inv.argv, vec!["mongodump", "--archive", "--gzip"]);
        assert_eq!(
            inv.stdout,
            OutputTarget::File(PathBuf::from(
                "/b/paas-staging/events/2024-03-05_14:30/events/mongo/mongo-archive.gz"
            ))
        );
    }
}
