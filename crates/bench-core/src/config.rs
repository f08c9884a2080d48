//! Configuration management for benchctl
//!
//! Provides a layered configuration system that supports YAML files and
//! environment variable overrides on top of built-in defaults.

use crate::job::{BenchmarkJobSpec, ResourceRequirements, RunMode, WorkloadRef};
use crate::poll::PollPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Orchestrator access and cluster-wide objects
    pub cluster: ClusterConfig,

    /// Local node bootstrap and reset
    pub node: NodeConfig,

    /// Backoff for transient failures
    pub retry: RetryConfig,

    /// Job supervision timing and artifacts
    pub supervisor: SupervisorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Benchmark catalog
    pub benchmarks: Vec<BenchmarkDefinition>,

    /// Pass thresholds keyed by benchmark kind
    pub thresholds: BTreeMap<String, Threshold>,
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (`BENCHCTL_SECTION__KEY`, highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    ///
    /// An explicit `path` must exist; otherwise `$BENCHCTL_CONFIG`,
    /// `./benchctl.yaml` and `/etc/benchctl/config.yaml` are tried.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                if let Ok(config_path) = std::env::var("BENCHCTL_CONFIG") {
                    builder =
                        builder.add_source(config::File::with_name(&config_path).required(true));
                } else {
                    for candidate in &["./benchctl.yaml", "/etc/benchctl/config.yaml"] {
                        builder = builder
                            .add_source(config::File::with_name(candidate).required(false));
                    }
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BENCHCTL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        self.node.validate()?;
        self.supervisor.validate()?;
        self.retry.validate()?;
        self.logging.validate()?;

        let mut names = HashSet::new();
        for definition in &self.benchmarks {
            if !names.insert(definition.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate benchmark name: {}",
                    definition.name
                )));
            }
            definition.to_spec(RunMode::Smoke, None).validate()?;
            definition.to_spec(RunMode::Full, None).validate()?;
        }

        for (kind, threshold) in &self.thresholds {
            if !threshold.min.is_finite() || threshold.metric.is_empty() {
                return Err(Error::config(format!("invalid threshold for {}", kind)));
            }
        }

        Ok(())
    }

    /// Look up a catalog entry by name
    pub fn benchmark(&self, name: &str) -> Option<&BenchmarkDefinition> {
        self.benchmarks.iter().find(|b| b.name == name)
    }

    /// Resolve a job selection against the catalog, preserving selection order.
    /// An empty selection means every benchmark.
    pub fn select(&self, names: &[String]) -> Result<Vec<&BenchmarkDefinition>> {
        if names.is_empty() {
            return Ok(self.benchmarks.iter().collect());
        }

        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for name in names {
            let definition = self
                .benchmark(name)
                .ok_or_else(|| Error::not_found(format!("benchmark {}", name)))?;
            if seen.insert(name.as_str()) {
                selected.push(definition);
            }
        }
        Ok(selected)
    }

    pub fn threshold(&self, kind: &str) -> Option<&Threshold> {
        self.thresholds.get(kind)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            node: NodeConfig::default(),
            retry: RetryConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
            benchmarks: default_catalog(),
            thresholds: default_thresholds(),
        }
    }
}

/// Orchestrator access and cluster-wide objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Namespace holding benchmark workloads
    pub namespace: String,

    /// Orchestrator CLI binary
    pub kubectl: String,

    /// Kubeconfig path (defaults to the CLI's own resolution)
    pub kubeconfig: Option<PathBuf>,

    /// Per-request timeout passed to the orchestrator CLI
    pub request_timeout_secs: u64,

    /// Runtime registration selecting the accelerator container runtime
    pub runtime_class: String,

    /// Low-level runtime handler the registration points at
    pub runtime_handler: String,

    /// Schedulable accelerator resource name
    pub accelerator_resource: String,

    /// Node label marking accelerator nodes
    pub accelerator_label: KeyValue,

    /// Secret holding the workload credential
    pub secret_name: String,

    /// Key within the secret
    pub secret_key: String,

    /// Environment variable the credential is exposed as
    pub secret_env: String,

    /// Values treated as "not yet filled in"
    pub placeholder_values: Vec<String>,
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::config("cluster.namespace cannot be empty"));
        }
        if self.runtime_class.is_empty() || self.runtime_handler.is_empty() {
            return Err(Error::config("cluster.runtime_class and runtime_handler are required"));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::config("cluster.request_timeout_secs must be greater than 0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether a secret value is empty or one of the configured placeholders
    pub fn is_placeholder(&self, value: &str) -> bool {
        let trimmed = value.trim();
        trimmed.is_empty()
            || self
                .placeholder_values
                .iter()
                .any(|p| p.eq_ignore_ascii_case(trimmed))
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "benchmarks".to_string(),
            kubectl: "kubectl".to_string(),
            kubeconfig: None,
            request_timeout_secs: 30,
            runtime_class: "nvidia".to_string(),
            runtime_handler: "nvidia".to_string(),
            accelerator_resource: "nvidia.com/gpu".to_string(),
            accelerator_label: KeyValue::new("nvidia.com/gpu.present", "true"),
            secret_name: "hf-token".to_string(),
            secret_key: "token".to_string(),
            secret_env: "HF_TOKEN".to_string(),
            placeholder_values: vec![
                "changeme".to_string(),
                "replace-me".to_string(),
                "<your-token>".to_string(),
                "hf_xxx".to_string(),
                "placeholder".to_string(),
            ],
        }
    }
}

/// Local node bootstrap and reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node bootstrap tool binary
    pub kubeadm: String,

    /// Service manager binary
    pub systemctl: String,

    /// Directory holding control plane and node credentials
    pub credential_dir: PathBuf,

    /// Files whose presence marks a control plane
    pub control_plane_markers: Vec<PathBuf>,

    /// Files whose presence marks a joined worker
    pub worker_markers: Vec<PathBuf>,

    /// Pod networking plugin configuration directory
    pub cni_dir: PathBuf,

    /// Other state removed on reset (etcd data, local kubeconfig copies)
    pub state_paths: Vec<PathBuf>,

    /// Network interfaces created by the pod networking plugin
    pub cni_interfaces: Vec<String>,

    /// Link management binary used to remove `cni_interfaces`
    pub ip: String,

    /// Packet filter commands run on reset, each as program followed by
    /// arguments. Clears the rules kube-proxy and the pod network install.
    pub firewall_flush: Vec<Vec<String>>,

    /// Local node agent service
    pub agent_service: String,

    /// Container runtime service; must be active before init or join
    pub runtime_service: String,

    /// Local API server address probed for readiness
    pub api_server: String,

    /// Pod network range handed to the bootstrap tool
    pub pod_network_cidr: String,

    /// Pod networking plugin manifest applied after control plane init
    pub cni_manifest: Option<String>,

    /// Remove the control-plane NoSchedule taint after init
    pub untaint_control_plane: bool,

    /// Bound on waiting for a node to report healthy after init or join
    pub health_wait_secs: u64,

    /// Interval between local health checks during that wait
    pub health_poll_interval_secs: u64,

    /// Default lifetime of minted join credentials
    pub credential_ttl_secs: u64,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.health_poll_interval_secs == 0 {
            return Err(Error::config("node.health_poll_interval_secs must be greater than 0"));
        }
        if self.health_wait_secs < self.health_poll_interval_secs {
            return Err(Error::config(
                "node.health_wait_secs must be at least node.health_poll_interval_secs",
            ));
        }
        if self.firewall_flush.iter().any(|command| command.is_empty()) {
            return Err(Error::config("node.firewall_flush entries cannot be empty"));
        }
        Ok(())
    }

    pub fn health_wait(&self) -> Duration {
        Duration::from_secs(self.health_wait_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_interval_secs)
    }

    /// Admin kubeconfig written by control plane init
    pub fn admin_kubeconfig(&self) -> PathBuf {
        self.credential_dir.join("admin.conf")
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let credential_dir = PathBuf::from("/etc/kubernetes");
        Self {
            kubeadm: "kubeadm".to_string(),
            systemctl: "systemctl".to_string(),
            control_plane_markers: vec![
                credential_dir.join("admin.conf"),
                credential_dir.join("manifests/kube-apiserver.yaml"),
                credential_dir.join("pki/ca.key"),
            ],
            worker_markers: vec![
                credential_dir.join("kubelet.conf"),
                PathBuf::from("/var/lib/kubelet/config.yaml"),
            ],
            credential_dir,
            cni_dir: PathBuf::from("/etc/cni/net.d"),
            state_paths: vec![
                PathBuf::from("/var/lib/etcd"),
                PathBuf::from("/var/lib/kubelet/config.yaml"),
                PathBuf::from("/root/.kube/config"),
            ],
            cni_interfaces: vec!["cni0".to_string(), "flannel.1".to_string()],
            ip: "ip".to_string(),
            firewall_flush: vec![
                command_line("iptables -F"),
                command_line("iptables -t nat -F"),
                command_line("iptables -t mangle -F"),
                command_line("iptables -X"),
                command_line("ipvsadm --clear"),
            ],
            agent_service: "kubelet".to_string(),
            runtime_service: "containerd".to_string(),
            api_server: "https://127.0.0.1:6443".to_string(),
            pod_network_cidr: "10.244.0.0/16".to_string(),
            cni_manifest: Some(
                "https://github.com/flannel-io/flannel/releases/latest/download/kube-flannel.yml"
                    .to_string(),
            ),
            untaint_control_plane: true,
            health_wait_secs: 300,
            health_poll_interval_secs: 2,
            credential_ttl_secs: 7200,
        }
    }
}

fn command_line(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Backoff for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be greater than 0"));
        }
        if self.initial_backoff_ms == 0 || self.max_backoff_ms < self.initial_backoff_ms {
            return Err(Error::config("retry backoff bounds are inconsistent"));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(Error::config("retry.multiplier must be at least 1.0"));
        }
        Ok(())
    }

    /// Bounded exponential backoff policy for transient failures
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::backoff(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.multiplier,
        )
        .with_max_attempts(self.max_attempts)
        .with_jitter(self.jitter)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Job supervision timing and artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Root directory for run-scoped artifacts
    pub artifact_root: PathBuf,

    /// Interval between completion checks
    pub poll_interval_secs: u64,

    /// Delay before re-reading job status when the pod already looks terminal
    pub settle_interval_secs: u64,

    /// Bound on checks for the execution unit to start running
    pub schedule_attempts: u32,

    /// Interval between scheduling checks
    pub schedule_interval_secs: u64,

    /// Bound on waiting for a prior instance to disappear
    pub deletion_timeout_secs: u64,

    /// Bound on draining the log stream after the workload finished
    pub log_drain_timeout_secs: u64,

    /// Number of recent cluster events captured on failure
    pub event_count: u32,
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 || self.schedule_interval_secs == 0 {
            return Err(Error::config("supervisor poll intervals must be greater than 0"));
        }
        if self.schedule_attempts == 0 {
            return Err(Error::config("supervisor.schedule_attempts must be greater than 0"));
        }
        if self.settle_interval_secs > self.poll_interval_secs {
            return Err(Error::config(
                "supervisor.settle_interval_secs cannot exceed poll_interval_secs",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_interval_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn deletion_timeout(&self) -> Duration {
        Duration::from_secs(self.deletion_timeout_secs)
    }

    pub fn log_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.log_drain_timeout_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("./results"),
            poll_interval_secs: 10,
            settle_interval_secs: 1,
            schedule_attempts: 120,
            schedule_interval_secs: 5,
            deletion_timeout_secs: 120,
            log_drain_timeout_secs: 30,
            event_count: 50,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Show target in logs
    pub show_target: bool,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config(format!("Invalid log level: {}", self.level))),
        }
        match self.format.as_str() {
            "text" | "json" => {}
            _ => return Err(Error::config(format!("Invalid log format: {}", self.format))),
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            show_target: false,
        }
    }
}

/// A key/value pair. Used instead of maps wherever keys may contain dots,
/// which the layered loader would treat as nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Pass threshold for a benchmark kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Metric compared against `min`
    pub metric: String,

    /// Inclusive lower bound
    pub min: f64,
}

impl Threshold {
    pub fn new(metric: impl Into<String>, min: f64) -> Self {
        Self {
            metric: metric.into(),
            min,
        }
    }
}

/// Catalog entry from which BenchmarkJobSpecs are built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkDefinition {
    pub name: String,
    pub kind: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<KeyValue>,
    #[serde(default)]
    pub script: Option<PathBuf>,
    pub accelerators: u32,
    pub memory: String,
    #[serde(default)]
    pub node_selector: Vec<KeyValue>,
    pub timeout_secs: u64,
    /// Sample count used in smoke mode; `None` runs the same volume in both modes
    #[serde(default)]
    pub smoke_samples: Option<u32>,
}

impl BenchmarkDefinition {
    /// Build the job spec for a mode. Smoke mode differs only in sample count.
    pub fn to_spec(&self, mode: RunMode, timeout_override: Option<u64>) -> BenchmarkJobSpec {
        let sample_count = match mode {
            RunMode::Smoke => self.smoke_samples,
            RunMode::Full => None,
        };

        BenchmarkJobSpec {
            name: self.name.clone(),
            kind: self.kind.clone(),
            workload: WorkloadRef {
                image: self.image.clone(),
                command: self.command.clone(),
                args: self.args.clone(),
                env: self
                    .env
                    .iter()
                    .map(|kv| (kv.key.clone(), kv.value.clone()))
                    .collect(),
                script: self.script.clone(),
            },
            resources: ResourceRequirements {
                accelerators: self.accelerators,
                memory: self.memory.clone(),
            },
            node_selector: self
                .node_selector
                .iter()
                .map(|kv| (kv.key.clone(), kv.value.clone()))
                .collect(),
            timeout_secs: timeout_override.unwrap_or(self.timeout_secs),
            mode,
            sample_count,
        }
    }
}

const BENCHMARK_IMAGE: &str = "ghcr.io/benchctl/llm-benchmarks:latest";

fn default_definition(
    name: &str,
    kind: &str,
    script: &str,
    timeout_secs: u64,
    smoke_samples: Option<u32>,
) -> BenchmarkDefinition {
    BenchmarkDefinition {
        name: name.to_string(),
        kind: kind.to_string(),
        image: BENCHMARK_IMAGE.to_string(),
        command: vec!["python3".to_string(), "-u".to_string()],
        args: vec![format!("/opt/benchmarks/{}", script)],
        env: vec![KeyValue::new("HF_HOME", "/cache/huggingface")],
        script: None,
        accelerators: 1,
        memory: "32Gi".to_string(),
        node_selector: vec![KeyValue::new("nvidia.com/gpu.present", "true")],
        timeout_secs,
        smoke_samples,
    }
}

fn default_catalog() -> Vec<BenchmarkDefinition> {
    vec![
        default_definition(
            "mlperf-bench",
            "mlperf-summarization",
            "mlperf_summarization.py",
            14_400,
            Some(100),
        ),
        default_definition("mmlu-pro", "mmlu-pro", "mmlu_pro_cot.py", 21_600, Some(140)),
        default_definition("mmlu", "mmlu", "mmlu_benchmark.py", 21_600, Some(285)),
        default_definition(
            "inference",
            "inference-throughput",
            "inference_throughput.py",
            1_800,
            None,
        ),
    ]
}

fn default_thresholds() -> BTreeMap<String, Threshold> {
    let mut thresholds = BTreeMap::new();
    thresholds.insert("mlperf-summarization".to_string(), Threshold::new("rougeL", 0.15));
    thresholds.insert("mmlu-pro".to_string(), Threshold::new("accuracy", 0.35));
    thresholds.insert("mmlu".to_string(), Threshold::new("accuracy", 0.65));
    thresholds.insert(
        "inference-throughput".to_string(),
        Threshold::new("batch_tokens_per_s", 1.0),
    );
    thresholds
}
