//! Orchestrator backed by the kubectl CLI

use crate::command::{args, run_command, CommandOutput};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bench_core::{
    ClusterConfig, Error, JobManifest, JobStatus, NodeInfo, Orchestrator, PodPhase, PodStatus,
    Result,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Extra time granted to the process beyond the API request timeout
const PROCESS_GRACE: Duration = Duration::from_secs(10);

/// Drives the orchestrator through its command line client
#[derive(Debug, Clone)]
pub struct KubectlOrchestrator {
    kubectl: String,
    kubeconfig: Option<PathBuf>,
    namespace: String,
    accelerator_resource: String,
    request_timeout: Duration,
}

impl KubectlOrchestrator {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            kubectl: config.kubectl.clone(),
            kubeconfig: config.kubeconfig.clone(),
            namespace: config.namespace.clone(),
            accelerator_resource: config.accelerator_resource.clone(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Use a specific kubeconfig, e.g. the admin config of a fresh control plane
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn base_args(&self, namespaced: bool) -> Vec<String> {
        let mut base = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            base.push("--kubeconfig".to_string());
            base.push(kubeconfig.display().to_string());
        }
        base.push(format!("--request-timeout={}s", self.request_timeout.as_secs()));
        if namespaced {
            base.push("-n".to_string());
            base.push(self.namespace.clone());
        }
        base
    }

    /// Run kubectl and return stdout, classifying failures
    async fn kubectl(
        &self,
        namespaced: bool,
        extra: Vec<String>,
        stdin: Option<&str>,
    ) -> Result<String> {
        let mut all = self.base_args(namespaced);
        all.extend(extra);

        let output = run_command(
            &self.kubectl,
            &all,
            stdin,
            self.request_timeout + PROCESS_GRACE,
        )
        .await?;

        if output.success() {
            Ok(output.stdout)
        } else {
            Err(classify(&output))
        }
    }

    async fn get_json(&self, namespaced: bool, mut extra: Vec<String>) -> Result<Value> {
        extra.extend(args(["-o", "json"]));
        let stdout = self.kubectl(namespaced, extra, None).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn apply(&self, namespaced: bool, document: &Value) -> Result<()> {
        let body = serde_json::to_string(document)?;
        self.kubectl(namespaced, args(["apply", "-f", "-"]), Some(&body))
            .await
            .map(|_| ())
    }

    /// Treat NotFound as an absent object
    async fn exists(&self, namespaced: bool, extra: Vec<String>) -> Result<bool> {
        match self.kubectl(namespaced, extra, None).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Map a failed kubectl invocation onto the error taxonomy
pub fn classify(output: &CommandOutput) -> Error {
    let message = output.diagnostic().to_string();
    let lower = message.to_lowercase();

    const UNREACHABLE: &[&str] = &[
        "unable to connect to the server",
        "connection refused",
        "was refused",
        "no route to host",
        "i/o timeout",
        "tls handshake timeout",
        "the server is currently unable to handle the request",
        "connection reset by peer",
    ];

    if lower.contains("(notfound)") || lower.contains("not found") {
        Error::not_found(message)
    } else if lower.contains("(alreadyexists)") || lower.contains("already exists") {
        Error::already_exists(message)
    } else if UNREACHABLE.iter().any(|needle| lower.contains(needle)) {
        Error::unreachable(message)
    } else if lower.contains("timeout") || lower.contains("deadline exceeded") {
        Error::timeout(message)
    } else {
        Error::command(message)
    }
}

fn as_u32(value: &Value) -> u32 {
    value.as_u64().unwrap_or(0) as u32
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn find_condition<'a>(status: &'a Value, kind: &str) -> Option<&'a Value> {
    status["conditions"]
        .as_array()?
        .iter()
        .find(|c| c["type"] == kind)
}

pub fn parse_nodes(list: &Value, accelerator_resource: &str) -> Vec<NodeInfo> {
    let Some(items) = list["items"].as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .map(|item| {
            let ready = find_condition(&item["status"], "Ready")
                .map_or(false, |c| c["status"] == "True");
            let accelerators = item["status"]["allocatable"][accelerator_resource]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let taints = item["spec"]["taints"]
                .as_array()
                .map(|ts| {
                    ts.iter()
                        .filter_map(|t| t["key"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            NodeInfo {
                name: item["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                ready,
                accelerators,
                labels: string_map(&item["metadata"]["labels"]),
                taints,
            }
        })
        .collect()
}

pub fn parse_job_status(job: &Value) -> JobStatus {
    let status = &job["status"];
    let failure_reason = find_condition(status, "Failed")
        .filter(|c| c["status"] == "True")
        .map(|c| c["reason"].as_str().unwrap_or("Failed").to_string());

    JobStatus {
        active: as_u32(&status["active"]),
        succeeded: as_u32(&status["succeeded"]),
        failed: as_u32(&status["failed"]),
        failure_reason,
    }
}

pub fn parse_pods(list: &Value) -> Vec<PodStatus> {
    let Some(items) = list["items"].as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .map(|item| {
            let status = &item["status"];
            let phase = status["phase"]
                .as_str()
                .and_then(|p| p.parse().ok())
                .unwrap_or(PodPhase::Unknown);

            let unschedulable = find_condition(status, "PodScheduled")
                .filter(|c| c["status"] == "False" && c["reason"] == "Unschedulable")
                .map(|c| c["message"].as_str().unwrap_or("Unschedulable").to_string());

            let container = &status["containerStatuses"][0]["state"];
            let waiting_reason = container["waiting"]["reason"].as_str().map(str::to_string);
            let exit_code = container["terminated"]["exitCode"]
                .as_i64()
                .map(|c| c as i32);

            PodStatus {
                name: item["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                phase,
                unschedulable,
                waiting_reason,
                exit_code,
            }
        })
        .collect()
}

fn format_event(event: &Value) -> String {
    let timestamp = event["lastTimestamp"]
        .as_str()
        .or_else(|| event["eventTime"].as_str())
        .unwrap_or("-");
    format!(
        "{} {} {} {}/{}: {}",
        timestamp,
        event["type"].as_str().unwrap_or("-"),
        event["reason"].as_str().unwrap_or("-"),
        event["involvedObject"]["kind"].as_str().unwrap_or("-"),
        event["involvedObject"]["name"].as_str().unwrap_or("-"),
        event["message"].as_str().unwrap_or("").trim()
    )
}

#[async_trait]
impl Orchestrator for KubectlOrchestrator {
    async fn probe_health(&self) -> Result<()> {
        let body = self
            .kubectl(false, args(["get", "--raw=/readyz"]), None)
            .await?;
        if body.trim() == "ok" {
            Ok(())
        } else {
            Err(Error::unreachable(format!("readyz returned {:?}", body.trim())))
        }
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let list = self.get_json(false, args(["get", "nodes"])).await?;
        Ok(parse_nodes(&list, &self.accelerator_resource))
    }

    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<()> {
        self.kubectl(
            false,
            args([
                "label".to_string(),
                "node".to_string(),
                node.to_string(),
                format!("{}={}", key, value),
                "--overwrite".to_string(),
            ]),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn remove_taint(&self, node: &str, key: &str) -> Result<()> {
        let result = self
            .kubectl(
                false,
                args([
                    "taint".to_string(),
                    "node".to_string(),
                    node.to_string(),
                    format!("{}-", key),
                ]),
                None,
            )
            .await;
        match result {
            Ok(_) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_node(&self, node: &str) -> Result<()> {
        self.kubectl(false, args(["delete", "node", node, "--ignore-not-found"]), None)
            .await
            .map(|_| ())
    }

    async fn runtime_class_exists(&self, name: &str) -> Result<bool> {
        self.exists(false, args(["get", "runtimeclass", name, "-o", "name"]))
            .await
    }

    async fn create_runtime_class(&self, name: &str, handler: &str) -> Result<()> {
        let document = json!({
            "apiVersion": "node.k8s.io/v1",
            "kind": "RuntimeClass",
            "metadata": { "name": name },
            "handler": handler,
        });
        self.apply(false, &document).await
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        self.exists(false, args(["get", "namespace", name, "-o", "name"]))
            .await
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        self.kubectl(false, args(["create", "namespace", name]), None)
            .await
            .map(|_| ())
    }

    async fn get_secret_value(&self, name: &str, key: &str) -> Result<Option<String>> {
        let secret = match self.get_json(true, args(["get", "secret", name])).await {
            Ok(secret) => secret,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(encoded) = secret["data"][key].as_str() else {
            return Ok(None);
        };
        let decoded = general_purpose::STANDARD.decode(encoded).map_err(|e| {
            Error::invalid_request(format!("secret {} key {} is not base64: {}", name, key, e))
        })?;
        Ok(Some(String::from_utf8_lossy(&decoded).to_string()))
    }

    async fn create_config_map(&self, name: &str, data: &BTreeMap<String, String>) -> Result<()> {
        let document = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": self.namespace },
            "data": data,
        });
        self.apply(true, &document).await
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        self.kubectl(true, args(["delete", "configmap", name, "--ignore-not-found"]), None)
            .await
            .map(|_| ())
    }

    async fn create_job(&self, manifest: &JobManifest) -> Result<()> {
        if manifest.namespace != self.namespace {
            return Err(Error::invalid_request(format!(
                "manifest namespace {} does not match {}",
                manifest.namespace, self.namespace
            )));
        }
        self.kubectl(true, args(["create", "-f", "-"]), Some(&manifest.document))
            .await
            .map(|_| ())
    }

    async fn get_job(&self, name: &str) -> Result<Option<JobStatus>> {
        match self.get_json(true, args(["get", "job", name])).await {
            Ok(job) => Ok(Some(parse_job_status(&job))),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        self.kubectl(
            true,
            args([
                "delete",
                "job",
                name,
                "--ignore-not-found",
                "--cascade=foreground",
                "--wait=false",
            ]),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn list_pods(&self, job: &str) -> Result<Vec<PodStatus>> {
        let selector = format!("job-name={}", job);
        let list = self
            .get_json(true, args(["get", "pods", "-l", selector.as_str()]))
            .await?;
        Ok(parse_pods(&list))
    }

    async fn stream_logs(&self, pod: &str, sender: mpsc::Sender<String>) -> Result<()> {
        let mut all = self.base_args(true);
        all.extend(args(["logs".to_string(), "-f".to_string(), format!("pod/{}", pod)]));

        let mut child = Command::new(&self.kubectl)
            .args(&all)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::command(format!("failed to spawn {}: {}", self.kubectl, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::command("log stream has no stdout"))?;
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines.next_line().await? {
            if sender.send(line).await.is_err() {
                debug!(pod, "log receiver closed, stopping stream");
                return Ok(());
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            let failed = CommandOutput {
                exit_code: output.status.code(),
                stdout: String::new(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            };
            warn!(pod, error = %failed.diagnostic(), "log stream ended with an error");
            Err(classify(&failed))
        }
    }

    async fn describe_pod(&self, pod: &str) -> Result<String> {
        self.kubectl(true, args(["describe", "pod", pod]), None).await
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<String>> {
        let list = self
            .get_json(true, args(["get", "events", "--sort-by=.lastTimestamp"]))
            .await?;
        let events: Vec<String> = list["items"]
            .as_array()
            .map(|items| items.iter().map(format_event).collect())
            .unwrap_or_default();
        let skip = events.len().saturating_sub(limit as usize);
        Ok(events.into_iter().skip(skip).collect())
    }
}
