//! Backup procedures per backup type and the executor driving them.

use std::path::PathBuf;

use yansi::{Color, Paint};

mod etcd;
mod mongodb;
mod mysql;
mod rsync;

pub use etcd::Etcd;
pub use mongodb::MongoDb;
pub use mysql::MySql;
pub use rsync::Rsync;

use crate::{
    descriptor::ContainerSpec,
    error::{Error, Result},
    layout::{BackupDirectoryLayout, create_owned_dir},
    plan::{BackupPlan, BackupType},
    runner::{CommandRunner, Invocation, OutputTarget, RunStatus},
};

/// What a procedure gets to look at when building its command.
pub struct ProcedureContext<'a> {
    pub plan: &'a BackupPlan,
    pub container: &'a ContainerSpec,
    pub layout: &'a BackupDirectoryLayout,
}

impl ProcedureContext<'_> {
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.layout
            .artifact_file(self.plan, &self.container.name, name)
    }

    pub fn invocation(&self, argv: Vec<String>, stdout: OutputTarget) -> Invocation {
        Invocation {
            namespace: self.plan.namespace.clone(),
            pod: self.plan.pod.clone(),
            container: self.container.name.clone(),
            argv,
            stdout,
        }
    }
}

pub trait BackupProcedure {
    /// The command to run, `None` if this type backs up nothing.
    fn invocation(&self, ctx: &ProcedureContext) -> Option<Invocation>;

    /// Location of the primary backup artifact.
    fn artifact(&self, ctx: &ProcedureContext) -> Option<PathBuf>;

    /// Runs after the container directory exists and before the command.
    fn prepare(&self, _ctx: &ProcedureContext) -> Result<()> {
        Ok(())
    }
}

/// Types without a procedure. Always reports failure.
pub struct Unknown;

impl BackupProcedure for Unknown {
    fn invocation(&self, _ctx: &ProcedureContext) -> Option<Invocation> {
        None
    }

    fn artifact(&self, _ctx: &ProcedureContext) -> Option<PathBuf> {
        None
    }
}

pub fn procedure_for(kind: BackupType) -> Box<dyn BackupProcedure> {
    match kind {
        BackupType::MySql => Box::new(MySql),
        BackupType::Rsync => Box::new(Rsync),
        BackupType::Etcd => Box::new(Etcd),
        BackupType::MongoDb => Box::new(MongoDb),
        BackupType::Unknown => Box::new(Unknown),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerBackupResult {
    pub container: String,
    pub success: bool,
    pub status: Option<RunStatus>,
    pub log: Option<PathBuf>,
    pub cmd: Option<PathBuf>,
    pub artifact: Option<PathBuf>,
    /// Why the command could not be run at all.
    pub error: Option<String>,
}

impl ContainerBackupResult {
    fn skipped(container: &str, error: &str) -> Self {
        Self {
            container: container.to_string(),
            success: false,
            status: None,
            log: None,
            cmd: None,
            artifact: None,
            error: Some(error.to_string()),
        }
    }
}

/// Backs up single containers of a plan.
pub struct ContainerBackupExecutor<'a> {
    layout: &'a BackupDirectoryLayout,
    runner: &'a dyn CommandRunner,
}

impl<'a> ContainerBackupExecutor<'a> {
    pub fn new(layout: &'a BackupDirectoryLayout, runner: &'a dyn CommandRunner) -> Self {
        Self { layout, runner }
    }

    pub fn backup(&self, plan: &BackupPlan, container: &ContainerSpec) -> ContainerBackupResult {
        let procedure = procedure_for(plan.backup_type);
        let ctx = ProcedureContext {
            plan,
            container,
            layout: self.layout,
        };

        let Some(invocation) = procedure.invocation(&ctx) else {
            log::info!(
                "no backup_type for {} in {}",
                container.name,
                plan.id()
            );
            return ContainerBackupResult::skipped(
                &container.name,
                &format!("no procedure for backup type {}", plan.backup_type),
            );
        };

        let log = self.layout.log_file(plan, &container.name);
        let cmd = self.layout.cmd_file(plan, &container.name);
        let mut result = ContainerBackupResult {
            container: container.name.clone(),
            success: false,
            status: None,
            log: Some(log.clone()),
            cmd: Some(cmd.clone()),
            artifact: procedure.artifact(&ctx),
            error: None,
        };

        let run = || -> Result<RunStatus> {
            create_owned_dir(
                &self.layout.container_dir(plan, &container.name),
                plan.run_as_user_for(container),
            )?;

            let line = self.runner.describe(&invocation, &log);
            std::fs::write(&cmd, format!("{line}\n")).map_err(|e| Error::io(&cmd, e))?;

            procedure.prepare(&ctx)?;
            self.runner.run(&invocation, &log)
        };

        match run() {
            Ok(status) => {
                result.status = Some(status);
                result.success = status.success();
                if result.success {
                    log::info!(
                        "{} backup of {} container {} done",
                        plan.backup_type,
                        plan.id(),
                        container.name
                    );
                } else {
                    log::error!(
                        "{} {} backup of {} container {} failed: {status}",
                        "Error:".paint(Color::Red),
                        plan.backup_type,
                        plan.id(),
                        container.name
                    );
                }
            }
            Err(e) => {
                log::error!(
                    "{} could not back up {} container {}: {e}",
                    "Error:".paint(Color::Red),
                    plan.id(),
                    container.name
                );
                result.error = Some(e.to_string());
            }
        }

        result
    }
}
