//! Kubernetes backend: one ephemeral, resource-capped batch Job per
//! execution.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, Pod, PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;

use airlock_core::{Error, ExecutionResult, NetworkMode, ResourceLimits, Result};

use crate::engine::Sandbox;

/// Interval between terminal-status polls.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pod label selected by the namespace's default-deny egress NetworkPolicy.
const NETWORK_LABEL: &str = "airlock.io/network";

// =============================================================================
// Cluster Job Sandbox
// =============================================================================

/// Kubernetes-based sandbox running each execution as a fresh batch Job.
///
/// `ResourceLimits` translate into the Job's resource requests/limits and
/// an `activeDeadlineSeconds` matching `timeout_seconds`. Cleanup is
/// doubly redundant: the orchestrator deletes the Job after reading its
/// terminal status and logs, and the Job also carries a
/// `ttlSecondsAfterFinished` so the cluster reclaims it even if this
/// process crashes first. `max_processes` is enforced by the kubelet's
/// `podPidsLimit` on the execution node pool; the Job API has no per-pod
/// knob for it.
pub struct ClusterJobSandbox {
    client: Client,
    namespace: String,
    image: String,
    job_ttl_seconds: i32,
}

impl ClusterJobSandbox {
    /// Connect using the ambient kubeconfig / in-cluster environment.
    pub async fn connect(
        image: impl Into<String>,
        namespace: impl Into<String>,
        job_ttl_seconds: i32,
    ) -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| {
            Error::sandbox_infrastructure(format!("failed to connect to cluster API: {e}"))
        })?;
        Ok(Self::from_client(client, image, namespace, job_ttl_seconds))
    }

    /// Create from an existing client (for testing).
    pub fn from_client(
        client: Client,
        image: impl Into<String>,
        namespace: impl Into<String>,
        job_ttl_seconds: i32,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            image: image.into(),
            job_ttl_seconds,
        }
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl Sandbox for ClusterJobSandbox {
    async fn execute(&self, code: &str, limits: &ResourceLimits) -> Result<ExecutionResult> {
        limits.validate()?;
        let effective_network = limits.effective_network_mode(self.supports_egress_filtering());
        let name = format!("airlock-job-{}", uuid::Uuid::new_v4());

        let job = build_job(
            &name,
            &self.image,
            code,
            limits,
            self.job_ttl_seconds,
            &effective_network,
        );

        let jobs = self.jobs();
        jobs.create(&PostParams::default(), &job).await.map_err(|e| {
            Error::sandbox_infrastructure(format!("failed to create execution job: {e}"))
        })?;

        // From here on the Job exists; the guard guarantees deletion even if
        // this future is dropped mid-execution, and the TTL covers a crash
        // of the whole process.
        let guard = JobGuard::new(jobs.clone(), name.clone());

        let started = Instant::now();
        let deadline = Duration::from_secs_f64(limits.timeout_seconds);
        tracing::debug!(job = %name, timeout_seconds = limits.timeout_seconds, "execution job created");

        // The poll is bounded by `timeout_seconds` on the orchestrator side,
        // independent of the cluster's own activeDeadline enforcement; a
        // cluster that never transitions the Job cannot hang this call. The
        // two extra poll intervals let a deadline-killed Job surface its
        // `DeadlineExceeded` condition first.
        let waited = tokio::time::timeout(deadline + 2 * POLL_INTERVAL, wait_terminal(&jobs, &name)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let (stdout, exit_code) = read_pod_output(&self.pods(), &name).await;

        let result = match waited {
            Ok(JobOutcome::Succeeded) => {
                tracing::info!(job = %name, elapsed_seconds = elapsed, "execution completed");
                ExecutionResult::completed(exit_code.unwrap_or(0), stdout, "", elapsed)
            }
            Ok(JobOutcome::DeadlineExceeded) => {
                tracing::warn!(job = %name, elapsed_seconds = elapsed, "cluster deadline expired");
                ExecutionResult::timed_out(stdout, "", elapsed)
            }
            Ok(JobOutcome::Failed) => match exit_code {
                Some(code) => {
                    tracing::info!(job = %name, exit_code = code, elapsed_seconds = elapsed, "execution failed");
                    ExecutionResult::completed(code, stdout, "", elapsed)
                }
                None => ExecutionResult::failed(
                    "job failed without a terminated container status",
                    stdout,
                    "",
                    elapsed,
                ),
            },
            Err(_) => {
                tracing::warn!(job = %name, elapsed_seconds = elapsed, "status poll deadline expired; abandoning job");
                ExecutionResult::timed_out(stdout, "", elapsed)
            }
        };

        guard.delete().await;
        Ok(result)
    }

    async fn is_available(&self) -> bool {
        self.jobs().list(&ListParams::default().limit(1)).await.is_ok()
    }
}

// =============================================================================
// Job Construction
// =============================================================================

fn build_job(
    name: &str,
    image: &str,
    code: &str,
    limits: &ResourceLimits,
    ttl_seconds: i32,
    effective_network: &NetworkMode,
) -> Job {
    let resources: BTreeMap<String, Quantity> = BTreeMap::from([
        (
            "cpu".to_string(),
            Quantity(format!("{}m", (limits.cpu_quota * 1000.0).round() as i64)),
        ),
        (
            "memory".to_string(),
            Quantity(format!("{}Mi", limits.memory_limit_mb)),
        ),
        (
            "ephemeral-storage".to_string(),
            Quantity(format!("{}Mi", limits.disk_quota_mb)),
        ),
    ]);

    let mut labels = BTreeMap::from([(
        "app.kubernetes.io/managed-by".to_string(),
        "airlock".to_string(),
    )]);
    // Anything short of unrestricted gets the isolated label, which the
    // namespace's default-deny egress NetworkPolicy selects.
    if *effective_network != NetworkMode::Unrestricted {
        labels.insert(NETWORK_LABEL.to_string(), "isolated".to_string());
    }

    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(limits.timeout_seconds.ceil() as i64),
            ttl_seconds_after_finished: Some(ttl_seconds),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    automount_service_account_token: Some(false),
                    enable_service_links: Some(false),
                    containers: vec![Container {
                        name: "runner".to_string(),
                        image: Some(image.to_string()),
                        command: Some(vec![
                            "python3".to_string(),
                            "-u".to_string(),
                            "-c".to_string(),
                            code.to_string(),
                        ]),
                        resources: Some(ResourceRequirements {
                            limits: Some(resources.clone()),
                            requests: Some(resources),
                            ..Default::default()
                        }),
                        security_context: Some(SecurityContext {
                            allow_privilege_escalation: Some(false),
                            read_only_root_filesystem: Some(true),
                            run_as_non_root: Some(true),
                            capabilities: Some(Capabilities {
                                drop: Some(vec!["ALL".to_string()]),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Terminal-Status Polling
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Failed,
    DeadlineExceeded,
}

async fn wait_terminal(jobs: &Api<Job>, name: &str) -> JobOutcome {
    loop {
        match jobs.get_status(name).await {
            Ok(job) => {
                if let Some(status) = &job.status {
                    if let Some(conditions) = &status.conditions {
                        for condition in conditions {
                            if condition.status != "True" {
                                continue;
                            }
                            match condition.type_.as_str() {
                                "Complete" => return JobOutcome::Succeeded,
                                "Failed" => {
                                    if condition.reason.as_deref() == Some("DeadlineExceeded") {
                                        return JobOutcome::DeadlineExceeded;
                                    }
                                    return JobOutcome::Failed;
                                }
                                _ => {}
                            }
                        }
                    }
                    if status.succeeded.unwrap_or(0) > 0 {
                        return JobOutcome::Succeeded;
                    }
                    if status.failed.unwrap_or(0) > 0 {
                        return JobOutcome::Failed;
                    }
                }
            }
            // Transient API errors: keep polling, the outer deadline bounds us.
            Err(e) => tracing::warn!(job = %name, error = %e, "job status poll failed; retrying"),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Best-effort log and exit-code retrieval from the Job's pod.
///
/// The cluster log API interleaves stdout and stderr; both land in the
/// result's stdout.
async fn read_pod_output(pods: &Api<Pod>, job_name: &str) -> (String, Option<i64>) {
    let params = ListParams::default().labels(&format!("job-name={job_name}"));
    let pod_list = match pods.list(&params).await {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(job = %job_name, error = %e, "failed to list job pods");
            return (String::new(), None);
        }
    };

    let Some(pod) = pod_list.items.into_iter().next() else {
        return (String::new(), None);
    };

    let exit_code = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .and_then(|container| container.state.as_ref())
        .and_then(|state| state.terminated.as_ref())
        .map(|terminated| terminated.exit_code as i64);

    let pod_name = pod.metadata.name.unwrap_or_default();
    let logs = match pods.logs(&pod_name, &LogParams::default()).await {
        Ok(logs) => logs,
        Err(e) => {
            tracing::warn!(pod = %pod_name, error = %e, "failed to read pod logs");
            String::new()
        }
    };

    (logs, exit_code)
}

// =============================================================================
// Cleanup Guard
// =============================================================================

/// Scoped ownership of one execution Job.
///
/// Normal paths call `delete` explicitly after reading status and logs; if
/// the owning future is dropped first (task cancellation), `Drop` spawns
/// the deletion. The Job's TTL is the final backstop for a crashed
/// process.
struct JobGuard {
    jobs: Api<Job>,
    name: String,
    armed: bool,
}

impl JobGuard {
    fn new(jobs: Api<Job>, name: String) -> Self {
        Self {
            jobs,
            name,
            armed: true,
        }
    }

    async fn delete(mut self) {
        self.armed = false;
        delete_job(&self.jobs, &self.name).await;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.armed {
            let jobs = self.jobs.clone();
            let name = self.name.clone();
            tokio::spawn(async move {
                tracing::warn!(job = %name, "execution cancelled; deleting job");
                delete_job(&jobs, &name).await;
            });
        }
    }
}

async fn delete_job(jobs: &Api<Job>, name: &str) {
    if let Err(e) = jobs.delete(name, &DeleteParams::background()).await {
        tracing::warn!(job = %name, error = %e, "failed to delete execution job");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            timeout_seconds: 2.5,
            memory_limit_mb: 256,
            cpu_quota: 0.5,
            disk_quota_mb: 128,
            max_processes: 32,
            ..Default::default()
        }
    }

    #[test]
    fn test_job_translates_limits() {
        let job = build_job(
            "airlock-job-1",
            "airlock-runner:latest",
            "print(2 + 2)",
            &limits(),
            300,
            &NetworkMode::None,
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.active_deadline_seconds, Some(3));
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));

        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod_spec.automount_service_account_token, Some(false));

        let container = &pod_spec.containers[0];
        let resource_limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(resource_limits["cpu"].0, "500m");
        assert_eq!(resource_limits["memory"].0, "256Mi");
        assert_eq!(resource_limits["ephemeral-storage"].0, "128Mi");
    }

    #[test]
    fn test_job_runs_code_as_command() {
        let job = build_job(
            "airlock-job-1",
            "airlock-runner:latest",
            "print(2 + 2)",
            &limits(),
            300,
            &NetworkMode::None,
        );

        let command = job.spec.unwrap().template.spec.unwrap().containers[0]
            .command
            .clone()
            .unwrap();
        assert_eq!(command[0], "python3");
        assert_eq!(command[3], "print(2 + 2)");
    }

    #[test]
    fn test_pod_security_is_hardened() {
        let job = build_job(
            "airlock-job-1",
            "airlock-runner:latest",
            "pass",
            &limits(),
            300,
            &NetworkMode::None,
        );

        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        let security = pod_spec.containers[0].security_context.as_ref().unwrap();
        assert_eq!(security.allow_privilege_escalation, Some(false));
        assert_eq!(security.read_only_root_filesystem, Some(true));
        assert_eq!(security.run_as_non_root, Some(true));
        assert_eq!(
            security.capabilities.as_ref().unwrap().drop,
            Some(vec!["ALL".to_string()])
        );
    }

    #[test]
    fn test_isolated_label_fails_closed() {
        // Allowlist with no egress filter resolves to None; both carry the
        // isolated label, only unrestricted omits it.
        for mode in [NetworkMode::None, NetworkMode::Allowlist] {
            let job = build_job("j", "img", "pass", &limits(), 300, &mode);
            let pod_labels = job.spec.unwrap().template.metadata.unwrap().labels.unwrap();
            assert_eq!(pod_labels.get(NETWORK_LABEL).map(String::as_str), Some("isolated"));
        }

        let job = build_job("j", "img", "pass", &limits(), 300, &NetworkMode::Unrestricted);
        let pod_labels = job.spec.unwrap().template.metadata.unwrap().labels.unwrap();
        assert!(pod_labels.get(NETWORK_LABEL).is_none());
    }

    #[test]
    fn test_deadline_rounds_up() {
        let mut l = limits();
        l.timeout_seconds = 0.2;
        let job = build_job("j", "img", "pass", &l, 300, &NetworkMode::None);
        assert_eq!(job.spec.unwrap().active_deadline_seconds, Some(1));
    }
}
