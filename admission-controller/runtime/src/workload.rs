use crate::core::{Container, Workload};
use k8s_openapi::api::{
    apps::v1::{DaemonSetSpec, DeploymentSpec, ReplicaSetSpec, StatefulSetSpec},
    batch::v1::{CronJobSpec, JobSpec},
    core::v1::{self as corev1, PodSpec},
};
use serde::de::DeserializeOwned;

/// A resource spec that describes the pod it will run.
pub(crate) trait PodTemplate: DeserializeOwned {
    fn into_pod_spec(self) -> Option<PodSpec>;
}

/// Builds a workload from a pod spec: containers first, then init containers.
pub(crate) fn from_pod_spec(namespace: String, spec: PodSpec) -> Workload {
    let PodSpec {
        containers,
        init_containers,
        ..
    } = spec;
    Workload::from_containers(
        namespace,
        containers.into_iter().map(container),
        init_containers.into_iter().flatten().map(container),
    )
}

fn container(c: corev1::Container) -> Container {
    // Images may be omitted when a higher-level controller supplies them; an
    // empty reference is still subject to every check.
    Container::new(c.name, c.image.unwrap_or_default())
}

impl PodTemplate for PodSpec {
    fn into_pod_spec(self) -> Option<PodSpec> {
        Some(self)
    }
}

impl PodTemplate for DeploymentSpec {
    fn into_pod_spec(self) -> Option<PodSpec> {
        self.template.spec
    }
}

impl PodTemplate for StatefulSetSpec {
    fn into_pod_spec(self) -> Option<PodSpec> {
        self.template.spec
    }
}

impl PodTemplate for DaemonSetSpec {
    fn into_pod_spec(self) -> Option<PodSpec> {
        self.template.spec
    }
}

impl PodTemplate for ReplicaSetSpec {
    fn into_pod_spec(self) -> Option<PodSpec> {
        self.template?.spec
    }
}

impl PodTemplate for JobSpec {
    fn into_pod_spec(self) -> Option<PodSpec> {
        self.template.spec
    }
}

impl PodTemplate for CronJobSpec {
    fn into_pod_spec(self) -> Option<PodSpec> {
        self.job_template.spec?.into_pod_spec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_init_containers_last() {
        let spec: PodSpec = serde_json::from_value(serde_json::json!({
            "initContainers": [
                { "name": "init-0", "image": "registry.example.com/init:0" },
                { "name": "init-1", "image": "registry.example.com/init:1" },
            ],
            "containers": [
                { "name": "app", "image": "registry.example.com/app:1.0" },
                { "name": "sidecar", "image": "registry.example.com/proxy:2.0" },
            ],
        }))
        .unwrap();

        let workload = from_pod_spec("default".to_string(), spec);
        assert_eq!(workload.namespace, "default");
        assert_eq!(
            workload
                .containers
                .iter()
                .map(|c| (c.name.as_str(), c.image.as_str()))
                .collect::<Vec<_>>(),
            vec![
                ("app", "registry.example.com/app:1.0"),
                ("sidecar", "registry.example.com/proxy:2.0"),
                ("init-0", "registry.example.com/init:0"),
                ("init-1", "registry.example.com/init:1"),
            ]
        );
    }

    #[test]
    fn missing_image_is_empty() {
        let spec: PodSpec =
            serde_json::from_value(serde_json::json!({ "containers": [{ "name": "app" }] }))
                .unwrap();
        let workload = from_pod_spec("default".to_string(), spec);
        assert_eq!(workload.containers, vec![Container::new("app", "")]);
    }

    #[test]
    fn cron_job_template() {
        let spec: CronJobSpec = serde_json::from_value(serde_json::json!({
            "schedule": "*/5 * * * *",
            "jobTemplate": {
                "spec": {
                    "template": {
                        "spec": {
                            "containers": [{ "name": "job", "image": "registry.example.com/job:1" }],
                        },
                    },
                },
            },
        }))
        .unwrap();
        let pod = spec.into_pod_spec().expect("cron job must have a pod spec");
        assert_eq!(pod.containers[0].name, "job");
    }

    #[test]
    fn replica_set_without_template() {
        let spec: ReplicaSetSpec = serde_json::from_value(serde_json::json!({
            "selector": { "matchLabels": { "app": "test" } },
        }))
        .unwrap();
        assert!(spec.into_pod_spec().is_none());
    }
}
