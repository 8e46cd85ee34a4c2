use argh::FromArgs;
use yansi::{Color, Paint};

mod purge;
mod run;
mod status;
use purge::*;
use run::*;
use status::*;

use crate::{
    config::Config,
    descriptor::{ClusterQuery, KubectlQuery, WorkloadDescriptor},
    server::ServeCommand,
};

#[derive(FromArgs, PartialEq, Debug)]
/// Back up labeled pods into a local directory tree
pub struct PodBkArgs {
    #[argh(subcommand)]
    pub cmd: PodBkCommand,
}

impl PodBkArgs {
    pub fn run(&self, conf: Config) -> i32 {
        self.cmd.run(conf)
    }
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum PodBkCommand {
    Run(RunCommand),
    Status(StatusCommand),
    Purge(PurgeCommand),
    Serve(ServeCommand),
    Show(ShowCommand),
    ConfigSchema(ConfigSchema),
}

impl PodBkCommand {
    /// The config file passed to the subcommand.
    pub fn config_path(&self) -> Option<&str> {
        match self {
            PodBkCommand::Run(c) => c.config.as_deref(),
            PodBkCommand::Status(c) => c.config.as_deref(),
            PodBkCommand::Purge(c) => c.config.as_deref(),
            PodBkCommand::Serve(c) => c.config.as_deref(),
            PodBkCommand::Show(c) => c.config.as_deref(),
            PodBkCommand::ConfigSchema(_) => None,
        }
    }

    pub fn run(&self, conf: Config) -> i32 {
        match self {
            PodBkCommand::Run(c) => c.run(conf),
            PodBkCommand::Status(c) => c.run(conf),
            PodBkCommand::Purge(c) => c.run(conf),
            PodBkCommand::Serve(c) => c.run(conf),
            PodBkCommand::Show(c) => c.run(conf),
            PodBkCommand::ConfigSchema(c) => c.run(),
        }
    }
}

/// Query the cluster, logging a failure.
fn list_workloads(conf: &Config) -> Option<Vec<WorkloadDescriptor>> {
    match KubectlQuery::new(conf).list_workloads() {
        Ok(pods) => {
            log::info!("Found {} pods to back up", pods.len());
            Some(pods)
        }
        Err(e) => {
            log::error!("{} {e}", "Error:".paint(Color::Red));
            None
        }
    }
}

#[derive(FromArgs, PartialEq, Debug)]
/// Show config json schema
#[argh(subcommand, name = "config_schema")]
pub struct ConfigSchema {}

impl ConfigSchema {
    pub fn run(&self) -> i32 {
        let schema = schemars::schema_for!(crate::config::Config);
        match serde_json::to_string_pretty(&schema) {
            Ok(schema) => {
                println!("{schema}");
                0
            }
            Err(e) => {
                log::error!("{} {e}", "Error:".paint(Color::Red));
                1
            }
        }
    }
}

#[derive(FromArgs, PartialEq, Debug)]
/// Show the resolved config
#[argh(subcommand, name = "show")]
pub struct ShowCommand {
    #[argh(option, short = 'c')]
    /// config file
    pub config: Option<String>,
}

impl ShowCommand {
    pub fn run(&self, conf: Config) -> i32 {
        match toml::to_string_pretty(&conf) {
            Ok(conf) => {
                println!("{conf}");
                0
            }
            Err(e) => {
                log::error!("{} {e}", "Error:".paint(Color::Red));
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> PodBkArgs {
        PodBkArgs::from_args(&["podbk"], args).unwrap()
    }

    #[test]
    fn run_with_options() {
        let args = parse(&[
            "run",
            "--config",
            "/etc/podbk.toml",
            "--dry-run",
            "--namespace",
            "paas-staging",
            "--namespace",
            "paas-prod",
        ]);

        assert_eq!(args.cmd.config_path(), Some("/etc/podbk.toml"));
        let PodBkCommand::Run(run) = args.cmd else {
            panic!("expected run");
        };
        assert!(run.dry_run);
        assert_eq!(run.namespace, vec!["paas-staging", "paas-prod"]);
        assert!(run.root.is_none());
    }

    #[test]
    fn config_is_optional() {
        let args = parse(&["status"]);
        assert_eq!(args.cmd.config_path(), None);

        let args = parse(&["config_schema"]);
        assert!(matches!(args.cmd, PodBkCommand::ConfigSchema(_)));
    }

    #[test]
    fn purge_dry_run() {
        let PodBkCommand::Purge(purge) = parse(&["purge", "-n"]).cmd else {
            panic!("expected purge");
        };
        assert!(purge.dry_run);
    }
}
