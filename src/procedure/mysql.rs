use std::path::PathBuf;

use super::{BackupProcedure, ProcedureContext};
use crate::runner::{Invocation, OutputTarget};

/// Name of the environment variable holding the MySQL root password.
pub const ROOT_PASSWORD_VAR: &str = "MYSQL_ROOT_PASSWORD";

/// `mysqldump` of all databases, gzipped locally into `<container>.sql.gz`.
///
/// When the container declares `MYSQL_ROOT_PASSWORD` in its environment the
/// dump is run with `-p"$MYSQL_ROOT_PASSWORD"`: what gets passed along is the
/// variable *name*, never the value read from the pod spec. Expansion happens
/// in the shell inside the container.
pub struct MySql;

impl MySql {
    pub fn dump_script(container: &crate::descriptor::ContainerSpec) -> String {
        let mut script = "exec mysqldump -u root --all-databases".to_string();
        if container.env.contains_key(ROOT_PASSWORD_VAR) {
            script.push_str(&format!(" -p\"${}\"", ROOT_PASSWORD_VAR));
        }
        script
    }
}

impl BackupProcedure for MySql {
    fn invocation(&self, ctx: &ProcedureContext) -> Option<Invocation> {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            Self::dump_script(ctx.container),
        ];
        Some(ctx.invocation(argv, OutputTarget::Gzip(self.artifact(ctx)?)))
    }

    fn artifact(&self, ctx: &ProcedureContext) -> Option<PathBuf> {
        Some(ctx.artifact_path(&format!("{}.sql.gz", ctx.container.name)))
    }
}
