use std::path::PathBuf;

use argh::FromArgs;
use yansi::{Color, Paint};

use crate::{
    backup::{PodReport, run_batch},
    config::Config,
    descriptor::WorkloadDescriptor,
    notify::failure_message,
    runner::runner_from_config,
};

#[derive(FromArgs, PartialEq, Debug, Default)]
/// Back up every labeled pod
#[argh(subcommand, name = "run")]
pub struct RunCommand {
    #[argh(option, short = 'c')]
    /// config file
    pub config: Option<String>,

    #[argh(switch, short = 'n')]
    /// dry run
    pub dry_run: bool,

    #[argh(option, short = 'r')]
    /// backup root directory
    pub root: Option<String>,

    #[argh(option)]
    /// only back up pods in these namespaces
    pub namespace: Vec<String>,
}

impl RunCommand {
    pub fn run(&self, mut conf: Config) -> i32 {
        if self.dry_run {
            conf.dry_run = true;
        }
        if let Some(root) = &self.root {
            conf.backup_root = PathBuf::from(root);
        }

        let Some(pods) = super::list_workloads(&conf) else {
            return 1;
        };
        let pods = filter_namespaces(pods, &self.namespace);

        let runner = runner_from_config(&conf);
        let reports = run_batch(&pods, &conf, runner.as_ref(), &|| {
            chrono::Local::now().naive_local()
        });

        for report in &reports {
            let line = report.summary();
            if report.outcome.success() {
                println!("--> {}", line.paint(Color::Green));
            } else {
                println!("--> {}", line.paint(Color::Red));
            }
        }

        notify_failures(&conf, &reports);

        let failed = reports.iter().filter(|r| !r.outcome.success()).count();
        if failed > 0 {
            log::error!("{failed} of {} pods failed", reports.len());
            1
        } else {
            0
        }
    }
}

fn filter_namespaces(pods: Vec<WorkloadDescriptor>, namespaces: &[String]) -> Vec<WorkloadDescriptor> {
    if namespaces.is_empty() {
        return pods;
    }

    let (keep, skip): (Vec<_>, Vec<_>) = pods
        .into_iter()
        .partition(|pod| namespaces.contains(&pod.namespace));

    for pod in &skip {
        log::info!(
            "Skipping {}/{} due to namespace filter {namespaces:?}",
            pod.namespace,
            pod.name
        );
    }
    keep
}

fn notify_failures(conf: &Config, reports: &[PodReport]) {
    let Some(ntfy) = &conf.ntfy else {
        return;
    };

    for report in reports.iter().filter(|r| !r.outcome.success()) {
        if let Err(e) = ntfy.send_notification(&failure_message(&report.id())) {
            log::error!("Could not send notification for {}: {e}", report.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(namespace: &str, name: &str) -> WorkloadDescriptor {
        WorkloadDescriptor {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn namespace_filter() {
        let pods = vec![pod("a", "one"), pod("b", "two"), pod("c", "three")];

        let kept = filter_namespaces(pods.clone(), &["a".to_string(), "c".to_string()]);
        let names: Vec<_> = kept.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["one", "three"]);

        assert_eq!(filter_namespaces(pods.clone(), &[]), pods);
    }
}
