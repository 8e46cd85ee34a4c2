//! Driving backups, status checks and purges over a list of workloads.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::NaiveDateTime;
use yansi::{Color, Paint};

use crate::{
    config::{Config, FailurePolicy},
    descriptor::WorkloadDescriptor,
    error::Result,
    layout::BackupDirectoryLayout,
    lock::{ClaimState, PodClaim},
    plan::{BackupPlan, BackupType, PlanError, PlanSettings},
    procedure::{ContainerBackupExecutor, ContainerBackupResult},
    purge::{PurgeReport, RetentionPurger},
    runner::CommandRunner,
    success::SuccessTracker,
};

#[derive(Debug)]
pub enum PodOutcome {
    /// The containers were backed up in this run.
    Completed {
        results: Vec<ContainerBackupResult>,
        success: bool,
    },
    /// The timestamp bucket was already backed up by an earlier run.
    AlreadyDone { success: bool },
    /// Another run holds the bucket, or one crashed while holding it.
    InProgress,
    Invalid(PlanError),
    Error(String),
}

impl PodOutcome {
    pub fn success(&self) -> bool {
        match self {
            Self::Completed { success, .. } | Self::AlreadyDone { success } => *success,
            Self::InProgress | Self::Invalid(_) | Self::Error(_) => false,
        }
    }
}

#[derive(Debug)]
pub struct PodReport {
    pub namespace: String,
    pub pod: String,
    pub outcome: PodOutcome,
}

impl PodReport {
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.pod)
    }

    pub fn summary(&self) -> String {
        let id = self.id();
        match &self.outcome {
            PodOutcome::Completed { success: true, .. } => {
                format!("Backup of {id} completed successfully.")
            }
            PodOutcome::Completed { results, .. } => {
                let failed: Vec<_> = results
                    .iter()
                    .filter(|r| !r.success)
                    .map(|r| r.container.as_str())
                    .collect();
                if failed.is_empty() {
                    format!("Backup of {id} FAILED.")
                } else {
                    format!("Backup of {id} FAILED (containers: {}).", failed.join(", "))
                }
            }
            PodOutcome::AlreadyDone { success } => format!(
                "Backup of {id} already done for this timestamp ({}).",
                if *success { "succeeded" } else { "FAILED" }
            ),
            PodOutcome::InProgress => {
                format!("Backup of {id} FAILED: a run for this timestamp is unfinished.")
            }
            PodOutcome::Invalid(e) => format!("Backup of {id} FAILED: {e}"),
            PodOutcome::Error(e) => format!("Backup of {id} FAILED: {e}"),
        }
    }
}

/// Backup of one pod according to its plan.
pub struct PodBackup<'a> {
    plan: BackupPlan,
    layout: &'a BackupDirectoryLayout,
    runner: &'a dyn CommandRunner,
    policy: FailurePolicy,
}

impl<'a> PodBackup<'a> {
    pub fn new(
        plan: BackupPlan,
        layout: &'a BackupDirectoryLayout,
        runner: &'a dyn CommandRunner,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            plan,
            layout,
            runner,
            policy,
        }
    }

    pub fn tracker(&self) -> SuccessTracker {
        SuccessTracker::new(self.layout, &self.plan.namespace, &self.plan.group)
    }

    pub fn run(&self) -> PodOutcome {
        let plan = &self.plan;
        let executor = ContainerBackupExecutor::new(self.layout, self.runner);

        if plan.backup_type == BackupType::Unknown || plan.containers.is_empty() {
            log::info!(
                "Nothing to back up for {} (type {}, {} containers)",
                plan.id(),
                plan.backup_type,
                plan.containers.len()
            );
            let results = plan
                .containers
                .iter()
                .map(|c| executor.backup(plan, c))
                .collect();
            return PodOutcome::Completed {
                results,
                success: false,
            };
        }

        let pod_root = self.layout.pod_root(plan);
        let claim = match PodClaim::acquire(&pod_root) {
            Ok(ClaimState::Claimed(claim)) => claim,
            Ok(ClaimState::Finished { success }) => {
                log::info!(
                    "Skipping {} as backup with same timestamp already exists",
                    plan.id()
                );
                return PodOutcome::AlreadyDone { success };
            }
            Ok(ClaimState::InProgress) => {
                log::warn!(
                    "Skipping {}: {} is marked in progress",
                    plan.id(),
                    pod_root.display()
                );
                return PodOutcome::InProgress;
            }
            Err(e) => return PodOutcome::Error(e.to_string()),
        };

        let mut results = Vec::with_capacity(plan.containers.len());
        for container in &plan.containers {
            let res = executor.backup(plan, container);
            let failed = !res.success;
            results.push(res);

            if failed && self.policy == FailurePolicy::Abort {
                log::warn!(
                    "Aborting remaining containers of {} after failure of {}",
                    plan.id(),
                    container.name
                );
                break;
            }
        }

        let mut success =
            results.len() == plan.containers.len() && results.iter().all(|r| r.success);

        if let Err(e) = claim.finish(success) {
            log::error!("Could not record result of {}: {e}", plan.id());
            success = false;
        }

        if success {
            if let Err(e) = self.tracker().record_success() {
                log::error!("Could not update success marker of {}: {e}", plan.id());
                success = false;
            }
        }

        PodOutcome::Completed { results, success }
    }
}

/// Back up every workload, one pod after the other.
///
/// `clock` is read once per pod when its plan is made.
pub fn run_batch(
    workloads: &[WorkloadDescriptor],
    conf: &Config,
    runner: &dyn CommandRunner,
    clock: &dyn Fn() -> NaiveDateTime,
) -> Vec<PodReport> {
    let layout = BackupDirectoryLayout::new(&conf.backup_root);
    let settings = PlanSettings::from_config(conf);

    workloads
        .iter()
        .map(|pod| {
            log::info!("Backing up pod {}/{}", pod.namespace, pod.name);

            let outcome = match BackupPlan::new(pod, &settings, clock()) {
                Ok(plan) => {
                    PodBackup::new(plan, &layout, runner, conf.on_container_failure).run()
                }
                Err(e) => {
                    log::error!(
                        "{} Invalid backup metadata on {}/{}: {e}",
                        "Error:".paint(Color::Red),
                        pod.namespace,
                        pod.name
                    );
                    PodOutcome::Invalid(e)
                }
            };

            if !outcome.success() {
                log::info!("Backup for pod: {}/{} failed", pod.namespace, pod.name);
            }

            PodReport {
                namespace: pod.namespace.clone(),
                pod: pod.name.clone(),
                outcome,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaleEntry {
    pub namespace: String,
    pub pod: String,
    /// Hours since the last success, `None` when the group is unknown.
    pub age_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub threshold_hours: f64,
    pub checked: usize,
    pub stale: Vec<StaleEntry>,
}

impl StatusReport {
    pub fn all_good(&self) -> bool {
        self.stale.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        if self.all_good() {
            return vec![format!(
                "OK: ALL BACKUPS WITHIN {} HOURS",
                self.threshold_hours
            )];
        }

        self.stale
            .iter()
            .map(|s| match s.age_hours {
                Some(age) if age < 24.0 * 365.0 * 30.0 => format!(
                    "Pod {}/{} does not have a backup within {} hours (last success {age}h ago)",
                    s.namespace, s.pod, self.threshold_hours
                ),
                Some(_) => format!(
                    "Pod {}/{} does not have a backup within {} hours (never succeeded)",
                    s.namespace, s.pod, self.threshold_hours
                ),
                None => format!(
                    "Pod {}/{} does not have a backup within {} hours (no deployment group)",
                    s.namespace, s.pod, self.threshold_hours
                ),
            })
            .collect()
    }
}

/// Staleness of every deployment group the workloads belong to.
pub fn status_batch(
    workloads: &[WorkloadDescriptor],
    conf: &Config,
    now: SystemTime,
) -> StatusReport {
    let layout = BackupDirectoryLayout::new(&conf.backup_root);
    let mut seen = BTreeSet::new();
    let mut report = StatusReport {
        threshold_hours: conf.status_threshold_hours,
        checked: 0,
        stale: Vec::new(),
    };

    for pod in workloads {
        let Some(group) = pod.deployment_group(&conf.group_label) else {
            report.checked += 1;
            report.stale.push(StaleEntry {
                namespace: pod.namespace.clone(),
                pod: pod.name.clone(),
                age_hours: None,
            });
            continue;
        };

        if !seen.insert((pod.namespace.clone(), group.to_string())) {
            continue;
        }
        report.checked += 1;

        let tracker = SuccessTracker::new(&layout, &pod.namespace, group);
        if !tracker.within_threshold_at(conf.status_threshold_hours, now) {
            report.stale.push(StaleEntry {
                namespace: pod.namespace.clone(),
                pod: pod.name.clone(),
                age_hours: Some(tracker.age_hours_at(now)),
            });
        }
    }

    report
}

/// Purge expired buckets of every deployment group.
///
/// Only group roots below the backup root are scanned.
pub fn purge_batch(
    workloads: &[WorkloadDescriptor],
    conf: &Config,
    now: NaiveDateTime,
    dry_run: bool,
) -> Result<PurgeReport> {
    let layout = BackupDirectoryLayout::new(&conf.backup_root);
    let settings = PlanSettings::from_config(conf);
    let purger = RetentionPurger::new(conf.retention()?, dry_run);

    let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
    for pod in workloads {
        match BackupPlan::new(pod, &settings, now) {
            Ok(plan) => {
                dirs.insert(layout.group_root(&plan.namespace, &plan.group));
            }
            Err(e) => {
                log::warn!("Not purging {}/{}: {e}", pod.namespace, pod.name);
            }
        }
    }

    let mut report = PurgeReport::default();
    for dir in dirs {
        log::info!("Purging {}", dir.display());
        report.merge(purger.purge(&dir, now));
    }
    Ok(report)
}
