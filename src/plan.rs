use std::fmt;
use std::path::PathBuf;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{Config, GranularityTable};
use crate::descriptor::{ContainerSpec, WorkloadDescriptor};

pub const BACKUP_TYPE_LABEL: &str = "backup_type";
pub const BACKUP_CONTAINERS_LABEL: &str = "backup_containers";
pub const BACKUP_SRC_ANNOTATION: &str = "backup_src";
pub const BACKUP_DEST_ANNOTATION: &str = "backup_dest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupType {
    MySql,
    Rsync,
    Etcd,
    MongoDb,
    /// Missing or unrecognised `backup_type` label. Nothing is backed up.
    Unknown,
}

impl BackupType {
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|x| x.trim().to_lowercase()).as_deref() {
            Some("mysql") => Self::MySql,
            Some("rsync") => Self::Rsync,
            Some("etcd") => Self::Etcd,
            Some("mongodb") => Self::MongoDb,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Rsync => "rsync",
            Self::Etcd => "etcd",
            Self::MongoDb => "mongodb",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution of the timestamp bucket a backup lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Day,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Self::Minute, Self::Day, Self::Month];

    pub fn format(&self) -> &'static str {
        match self {
            Self::Minute => "%Y-%m-%d_%H:%M",
            Self::Day => "%Y-%m-%d",
            Self::Month => "%Y-%m",
        }
    }

    pub fn bucket(&self, now: NaiveDateTime) -> String {
        now.format(self.format()).to_string()
    }

    /// Parse a bucket directory name back into the start of its period.
    ///
    /// Only canonical names are accepted: formatting the parsed time again
    /// must give back the exact same name.
    pub fn parse_bucket(&self, name: &str) -> Option<NaiveDateTime> {
        let start = match self {
            Self::Minute => NaiveDateTime::parse_from_str(name, self.format()).ok()?,
            Self::Day => NaiveDate::parse_from_str(name, self.format())
                .ok()?
                .and_hms_opt(0, 0, 0)?,
            Self::Month => NaiveDate::parse_from_str(&format!("{name}-01"), "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)?,
        };

        (self.bucket(start) == name).then_some(start)
    }

    /// First instant after the period starting at `start`.
    pub fn period_end(&self, start: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Minute => start + Duration::minutes(1),
            Self::Day => start + Duration::days(1),
            Self::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .unwrap_or(start + Duration::days(31))
            }
        }
    }
}

/// Recognise any bucket name regardless of granularity.
pub fn parse_any_bucket(name: &str) -> Option<(Granularity, NaiveDateTime)> {
    Granularity::ALL
        .iter()
        .find_map(|g| g.parse_bucket(name).map(|start| (*g, start)))
}

/// A pod whose metadata can not be turned into a plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("pod has no name")]
    MissingName,
    #[error("pod {pod} has no namespace")]
    MissingNamespace { pod: String },
    #[error("pod {pod} has no '{label}' label")]
    MissingGroup { pod: String, label: String },
    #[error("{kind} backup of pod {pod} needs the '{annotation}' annotation")]
    MissingAnnotation {
        pod: String,
        kind: BackupType,
        annotation: &'static str,
    },
    #[error("backup source '{path}' of pod {pod} is not an absolute path")]
    RelativeSource { pod: String, path: String },
    #[error("{what} '{value}' can not be used as a directory name")]
    InvalidName { what: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct PlanSettings {
    pub group_label: String,
    pub granularity: GranularityTable,
}

impl PlanSettings {
    pub fn from_config(conf: &Config) -> Self {
        Self {
            group_label: conf.group_label.clone(),
            granularity: conf.granularity,
        }
    }
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything needed to back up one pod, fixed at construction time.
#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub pod: String,
    pub namespace: String,
    pub group: String,
    pub backup_type: BackupType,
    /// Split from the colon separated `backup_src` annotation.
    pub source_paths: Vec<String>,
    /// Node local destination of etcd snapshots (`backup_dest` annotation).
    pub local_dest: Option<PathBuf>,
    /// Pod level run-as-user, containers may override it.
    pub run_as_user: Option<u32>,
    pub granularity: Granularity,
    pub timestamp: String,
    pub containers: Vec<ContainerSpec>,
}

impl BackupPlan {
    pub fn new(
        pod: &WorkloadDescriptor,
        settings: &PlanSettings,
        now: NaiveDateTime,
    ) -> Result<Self, PlanError> {
        if pod.name.is_empty() {
            return Err(PlanError::MissingName);
        }
        check_segment("pod name", &pod.name)?;

        if pod.namespace.is_empty() {
            return Err(PlanError::MissingNamespace {
                pod: pod.name.clone(),
            });
        }
        check_segment("namespace", &pod.namespace)?;

        let group = pod
            .deployment_group(&settings.group_label)
            .ok_or_else(|| PlanError::MissingGroup {
                pod: pod.name.clone(),
                label: settings.group_label.clone(),
            })?
            .to_string();
        check_segment("deployment group", &group)?;

        let backup_type =
            BackupType::from_label(pod.labels.get(BACKUP_TYPE_LABEL).map(|x| x.as_str()));

        // only tar and etcdctl read source paths
        let uses_sources = matches!(backup_type, BackupType::Rsync | BackupType::Etcd);
        let source_paths: Vec<String> = pod
            .annotations
            .get(BACKUP_SRC_ANNOTATION)
            .filter(|_| uses_sources)
            .map(|src| {
                src.split(':')
                    .map(|x| x.trim())
                    .filter(|x| !x.is_empty())
                    .map(|x| x.to_string())
                    .collect()
            })
            .unwrap_or_default();

        if let Some(path) = source_paths.iter().find(|x| !x.starts_with('/')) {
            return Err(PlanError::RelativeSource {
                pod: pod.name.clone(),
                path: path.clone(),
            });
        }

        let local_dest = pod
            .annotations
            .get(BACKUP_DEST_ANNOTATION)
            .map(|x| x.trim())
            .filter(|x| !x.is_empty())
            .map(PathBuf::from);

        if backup_type == BackupType::Etcd {
            if source_paths.is_empty() {
                return Err(PlanError::MissingAnnotation {
                    pod: pod.name.clone(),
                    kind: backup_type,
                    annotation: BACKUP_SRC_ANNOTATION,
                });
            }
            if local_dest.is_none() {
                return Err(PlanError::MissingAnnotation {
                    pod: pod.name.clone(),
                    kind: backup_type,
                    annotation: BACKUP_DEST_ANNOTATION,
                });
            }
        }

        let containers = select_containers(pod);
        for c in &containers {
            check_segment("container name", &c.name)?;
        }

        let granularity = settings.granularity.get(backup_type);

        Ok(Self {
            pod: pod.name.clone(),
            namespace: pod.namespace.clone(),
            group,
            backup_type,
            source_paths,
            local_dest: if backup_type == BackupType::Etcd {
                local_dest
            } else {
                None
            },
            run_as_user: pod.run_as_user,
            granularity,
            timestamp: granularity.bucket(now),
            containers,
        })
    }

    pub fn run_as_user_for(&self, container: &ContainerSpec) -> Option<u32> {
        container.run_as_user.or(self.run_as_user)
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.pod)
    }
}

/// Containers named by the `backup_containers` label, or every container.
fn select_containers(pod: &WorkloadDescriptor) -> Vec<ContainerSpec> {
    let Some(wanted) = pod.labels.get(BACKUP_CONTAINERS_LABEL) else {
        return pod.containers.clone();
    };

    let wanted: Vec<&str> = wanted
        .split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .collect();

    for name in &wanted {
        if pod.container(name).is_none() {
            log::warn!(
                "Pod {}/{} has no container '{name}' listed in {BACKUP_CONTAINERS_LABEL}",
                pod.namespace,
                pod.name
            );
        }
    }

    pod.containers
        .iter()
        .filter(|c| wanted.contains(&c.name.as_str()))
        .cloned()
        .collect()
}

fn check_segment(what: &'static str, value: &str) -> Result<(), PlanError> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\0']) {
        return Err(PlanError::InvalidName {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    pub fn pod(name: &str, kind: &str, containers: &[&str]) -> WorkloadDescriptor {
        let mut pod = WorkloadDescriptor {
            name: name.to_string(),
            namespace: "paas-staging".to_string(),
            containers: containers.iter().map(|c| ContainerSpec::new(c)).collect(),
            ..Default::default()
        };
        pod.labels
            .insert("deploymentconfig".to_string(), name.to_string());
        pod.labels
            .insert(BACKUP_TYPE_LABEL.to_string(), kind.to_string());
        pod
    }

    fn plan(pod: &WorkloadDescriptor) -> Result<BackupPlan, PlanError> {
        BackupPlan::new(pod, &PlanSettings::default(), at(2024, 3, 5, 14, 30))
    }

    #[test]
    fn parses_backup_types() {
        assert_eq!(BackupType::from_label(Some("mysql")), BackupType::MySql);
        assert_eq!(BackupType::from_label(Some("MongoDB")), BackupType::MongoDb);
        assert_eq!(BackupType::from_label(Some("rsync")), BackupType::Rsync);
        assert_eq!(BackupType::from_label(Some("etcd")), BackupType::Etcd);
        assert_eq!(BackupType::from_label(Some("postgres")), BackupType::Unknown);
        assert_eq!(BackupType::from_label(None), BackupType::Unknown);
    }

    #[test]
    fn mysql_pod_without_container_label() {
        let plan = plan(&pod("custapi-mysql", "mysql", &["db"])).unwrap();

        assert_eq!(plan.backup_type, BackupType::MySql);
        assert_eq!(plan.group, "custapi-mysql");
        assert_eq!(plan.timestamp, "2024-03-05_14:30");
        assert_eq!(plan.containers.len(), 1);
        assert_eq!(plan.containers[0].name, "db");
        assert!(plan.source_paths.is_empty());
    }

    #[test]
    fn container_label_restricts_selection() {
        let mut p = pod("app", "mysql", &["a", "b", "c"]);
        p.labels
            .insert(BACKUP_CONTAINERS_LABEL.to_string(), "a, b".to_string());

        let names: Vec<_> = plan(&p)
            .unwrap()
            .containers
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn unknown_containers_in_label_are_ignored() {
        let mut p = pod("app", "mysql", &["a"]);
        p.labels
            .insert(BACKUP_CONTAINERS_LABEL.to_string(), "ghost".to_string());
        assert!(plan(&p).unwrap().containers.is_empty());
    }

    #[test]
    fn backup_src_is_split_on_colons() {
        let mut p = pod("fitnesse", "rsync", &["fitnesse"]);
        p.annotations.insert(
            BACKUP_SRC_ANNOTATION.to_string(),
            "/opt/fitnesse/FitNesseRoot:/etc/fitnesse".to_string(),
        );
        assert_eq!(
            plan(&p).unwrap().source_paths,
            vec!["/opt/fitnesse/FitNesseRoot", "/etc/fitnesse"]
        );
    }

    #[test]
    fn relative_source_is_rejected() {
        let mut p = pod("fitnesse", "rsync", &["fitnesse"]);
        p.annotations
            .insert(BACKUP_SRC_ANNOTATION.to_string(), "--to-command=sh".to_string());
        assert!(matches!(plan(&p), Err(PlanError::RelativeSource { .. })));
    }

    #[test]
    fn stray_source_on_database_pod_is_ignored() {
        for kind in ["mysql", "mongodb"] {
            let mut p = pod("db", kind, &["db"]);
            p.annotations
                .insert(BACKUP_SRC_ANNOTATION.to_string(), "var/lib/mysql".to_string());

            let plan = plan(&p).unwrap();
            assert!(plan.source_paths.is_empty());
        }
    }

    #[test]
    fn missing_type_is_unknown_not_an_error() {
        let mut p = pod("clusterbuilder", "", &["builder"]);
        p.labels.remove(BACKUP_TYPE_LABEL);
        assert_eq!(plan(&p).unwrap().backup_type, BackupType::Unknown);
    }

    #[test]
    fn missing_group_is_an_error() {
        let mut p = pod("app", "mysql", &["db"]);
        p.labels.remove("deploymentconfig");
        assert!(matches!(plan(&p), Err(PlanError::MissingGroup { .. })));
    }

    #[test]
    fn etcd_needs_source_and_destination() {
        let mut p = pod("etcd", "etcd", &["etcd"]);
        assert!(matches!(
            plan(&p),
            Err(PlanError::MissingAnnotation {
                annotation: BACKUP_SRC_ANNOTATION,
                ..
            })
        ));

        p.annotations
            .insert(BACKUP_SRC_ANNOTATION.to_string(), "/var/lib/etcd".to_string());
        assert!(matches!(
            plan(&p),
            Err(PlanError::MissingAnnotation {
                annotation: BACKUP_DEST_ANNOTATION,
                ..
            })
        ));

        p.annotations
            .insert(BACKUP_DEST_ANNOTATION.to_string(), "/backup-local".to_string());
        let plan = plan(&p).unwrap();
        assert_eq!(plan.local_dest, Some(PathBuf::from("/backup-local")));
    }

    #[test]
    fn path_segments_are_checked() {
        let mut p = pod("app", "mysql", &["db"]);
        p.labels
            .insert("deploymentconfig".to_string(), "../etc".to_string());
        assert!(matches!(plan(&p), Err(PlanError::InvalidName { .. })));
    }

    #[test]
    fn run_as_user_prefers_container() {
        let mut p = pod("app", "mysql", &["a", "b"]);
        p.run_as_user = Some(1000);
        p.containers[1].run_as_user = Some(27);
        let plan = plan(&p).unwrap();

        assert_eq!(plan.run_as_user_for(&plan.containers[0]), Some(1000));
        assert_eq!(plan.run_as_user_for(&plan.containers[1]), Some(27));
    }

    #[test]
    fn granularity_is_per_type() {
        let mut settings = PlanSettings::default();
        settings.granularity.mysql = Granularity::Month;
        let now = at(2024, 3, 5, 14, 30);

        let mysql = BackupPlan::new(&pod("db", "mysql", &["db"]), &settings, now).unwrap();
        let rsync = BackupPlan::new(&pod("files", "rsync", &["files"]), &settings, now).unwrap();

        assert_eq!(mysql.timestamp, "2024-03");
        assert_eq!(rsync.timestamp, "2024-03-05_14:30");
    }

    #[test]
    fn buckets_parse_back() {
        let now = at(2024, 12, 31, 23, 59);
        for g in Granularity::ALL {
            let name = g.bucket(now);
            let start = g.parse_bucket(&name).unwrap();
            assert!(start <= now && now < g.period_end(start));
        }
        assert_eq!(Granularity::Month.period_end(at(2024, 12, 1, 0, 0)), at(2025, 1, 1, 0, 0));
    }

    #[test]
    fn non_canonical_buckets_are_rejected() {
        assert_eq!(parse_any_bucket("2024-3-5"), None);
        assert_eq!(parse_any_bucket("2024-13-01"), None);
        assert_eq!(parse_any_bucket("2016-07-18_14:30:00"), None);
        assert_eq!(parse_any_bucket("success"), None);
        assert_eq!(
            parse_any_bucket("2016-07-18_14:30"),
            Some((Granularity::Minute, at(2016, 7, 18, 14, 30)))
        );
    }
}
