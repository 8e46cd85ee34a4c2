//! Workload descriptors and the cluster query that produces them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod};
use serde::Deserialize;

use crate::{
    config::Config,
    error::{Error, Result},
    run_command,
};

/// One running pod which asked to be backed up.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkloadDescriptor {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub containers: Vec<ContainerSpec>,
    /// Pod level `securityContext.runAsUser`.
    pub run_as_user: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub env: BTreeMap<String, Option<String>>,
    /// Container level `securityContext.runAsUser`.
    pub run_as_user: Option<u32>,
}

impl WorkloadDescriptor {
    pub fn from_pod(pod: &Pod) -> Self {
        let meta = &pod.metadata;
        let spec = pod.spec.as_ref();

        Self {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            labels: meta.labels.clone().unwrap_or_default(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            containers: spec
                .map(|s| s.containers.iter().map(ContainerSpec::from_container).collect())
                .unwrap_or_default(),
            run_as_user: spec
                .and_then(|s| s.security_context.as_ref())
                .and_then(|ctx| ctx.run_as_user)
                .and_then(uid),
        }
    }

    /// The deployment group this pod belongs to.
    pub fn deployment_group(&self, group_label: &str) -> Option<&str> {
        self.labels
            .get(group_label)
            .map(|x| x.as_str())
            .filter(|x| !x.is_empty())
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }
}

impl ContainerSpec {
    pub fn from_container(container: &Container) -> Self {
        Self {
            name: container.name.clone(),
            env: container
                .env
                .iter()
                .flatten()
                .map(|e| (e.name.clone(), e.value.clone()))
                .collect(),
            run_as_user: container
                .security_context
                .as_ref()
                .and_then(|ctx| ctx.run_as_user)
                .and_then(uid),
        }
    }

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

fn uid(id: i64) -> Option<u32> {
    u32::try_from(id).ok()
}

/// Source of the workloads to back up.
pub trait ClusterQuery {
    fn list_workloads(&self) -> Result<Vec<WorkloadDescriptor>>;
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

/// Lists labeled pods through the cluster CLI.
pub struct KubectlQuery {
    kubectl: String,
    kubectl_args: Vec<String>,
    selector: String,
}

impl KubectlQuery {
    pub fn new(conf: &Config) -> Self {
        Self {
            kubectl: conf.kubectl.clone(),
            kubectl_args: conf.kubectl_args.clone(),
            selector: conf.selector.clone(),
        }
    }
}

impl ClusterQuery for KubectlQuery {
    fn list_workloads(&self) -> Result<Vec<WorkloadDescriptor>> {
        let mut cmd = vec![self.kubectl.as_str()];
        cmd.extend(self.kubectl_args.iter().map(|x| x.as_str()));
        cmd.extend([
            "get",
            "pods",
            "--all-namespaces",
            "-l",
            self.selector.as_str(),
            "-o",
            "json",
        ]);

        let (stdout, stderr, code) = run_command(&cmd)?;
        if code != 0 {
            return Err(Error::Query(format!(
                "{} exited with {code}: {}",
                self.kubectl,
                stderr.trim()
            )));
        }

        parse_pod_list(&stdout)
    }
}

pub fn parse_pod_list(json: &str) -> Result<Vec<WorkloadDescriptor>> {
    let list: PodList =
        serde_json::from_str(json).map_err(|e| Error::Query(format!("invalid pod list: {e}")))?;
    Ok(list.items.iter().map(WorkloadDescriptor::from_pod).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD_LIST: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [{
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "custapi-mysql-3-abcde",
                "namespace": "paas-staging",
                "labels": {
                    "deploymentconfig": "custapi",
                    "backup_type": "mysql",
                    "needs_backup": "yes"
                },
                "annotations": { "backup_src": "/var/lib/mysql" }
            },
            "spec": {
                "securityContext": { "runAsUser": 1000 },
                "containers": [{
                    "name": "db",
                    "image": "mysql:5.7",
                    "env": [
                        { "name": "MYSQL_ROOT_PASSWORD", "value": "hunter2" },
                        { "name": "FROM_SECRET", "valueFrom": { "secretKeyRef": { "name": "s", "key": "k" } } }
                    ],
                    "securityContext": { "runAsUser": 27 }
                }, {
                    "name": "exporter",
                    "image": "exporter"
                }]
            }
        }]
    }"#;

    #[test]
    fn parses_kubectl_pod_list() {
        let pods = parse_pod_list(POD_LIST).unwrap();
        assert_eq!(pods.len(), 1);

        let pod = &pods[0];
        assert_eq!(pod.name, "custapi-mysql-3-abcde");
        assert_eq!(pod.namespace, "paas-staging");
        assert_eq!(pod.deployment_group("deploymentconfig"), Some("custapi"));
        assert_eq!(pod.annotations["backup_src"], "/var/lib/mysql");
        assert_eq!(pod.run_as_user, Some(1000));

        let db = pod.container("db").unwrap();
        assert_eq!(db.run_as_user, Some(27));
        assert_eq!(db.env["MYSQL_ROOT_PASSWORD"], Some("hunter2".to_string()));
        assert_eq!(db.env["FROM_SECRET"], None);

        assert_eq!(pod.container("exporter").unwrap().run_as_user, None);
    }

    #[test]
    fn empty_list_is_fine() {
        assert!(parse_pod_list(r#"{"items": []}"#).unwrap().is_empty());
        assert!(parse_pod_list(r#"{"kind": "List"}"#).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_a_query_error() {
        assert!(matches!(parse_pod_list("No resources found"), Err(Error::Query(_))));
    }

    #[test]
    fn missing_group_label() {
        let pod = WorkloadDescriptor::default();
        assert_eq!(pod.deployment_group("deploymentconfig"), None);
    }
}
