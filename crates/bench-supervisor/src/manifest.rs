//! Rendering of benchmark specs into orchestrator job documents

use bench_core::{BenchmarkJobSpec, ClusterConfig, Error, ErrorContext, JobManifest, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Directory the script config map is mounted at
pub const SCRIPT_MOUNT: &str = "/scripts";

const CONTAINER_NAME: &str = "benchmark";
const SCRIPT_VOLUME: &str = "scripts";

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_KIND: &str = "benchctl.io/kind";
pub const LABEL_MODE: &str = "benchctl.io/mode";
pub const LABEL_JOBRUN: &str = "benchctl.io/jobrun";

/// Name of the config map carrying a job's script
pub fn script_config_map_name(job: &str) -> String {
    format!("{}-script", job)
}

/// Read a script file into config map data keyed by its file name
pub async fn load_script(path: &Path) -> Result<BTreeMap<String, String>> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::invalid_request(format!("script path has no file name: {}", path.display())))?;
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context_fn(|| format!("failed to read script {}", path.display()))?;

    let mut data = BTreeMap::new();
    data.insert(file_name.to_string(), content);
    Ok(data)
}

fn labels(spec: &BenchmarkJobSpec, jobrun_id: Uuid) -> Value {
    json!({
        LABEL_MANAGED_BY: "benchctl",
        LABEL_KIND: spec.kind,
        LABEL_MODE: spec.mode.to_string(),
        LABEL_JOBRUN: jobrun_id.to_string(),
    })
}

fn env(spec: &BenchmarkJobSpec, cluster: &ClusterConfig) -> Vec<Value> {
    let mut vars = spec.workload.env.clone();
    // Sample parameters win over catalog entries of the same name
    vars.extend(spec.sample_env());

    let mut env: Vec<Value> = vars
        .into_iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    env.push(json!({
        "name": cluster.secret_env,
        "valueFrom": {
            "secretKeyRef": {
                "name": cluster.secret_name,
                "key": cluster.secret_key,
            }
        }
    }));
    env
}

/// Render the job document for one run.
///
/// The document is deterministic for a given spec and run id, and is
/// submitted exactly as rendered.
pub fn render_job(spec: &BenchmarkJobSpec, cluster: &ClusterConfig, jobrun_id: Uuid) -> Result<JobManifest> {
    let mut container = json!({
        "name": CONTAINER_NAME,
        "image": spec.workload.image,
        "env": env(spec, cluster),
        "resources": {
            "limits": {
                cluster.accelerator_resource.as_str(): spec.resources.accelerators,
                "memory": spec.resources.memory,
            },
            "requests": {
                "memory": spec.resources.memory,
            }
        }
    });

    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "runtimeClassName": cluster.runtime_class,
    });

    if let (Value::Object(container), Value::Object(pod)) = (&mut container, &mut pod_spec) {
        if !spec.workload.command.is_empty() {
            container.insert("command".to_string(), json!(spec.workload.command));
        }
        if !spec.workload.args.is_empty() {
            container.insert("args".to_string(), json!(spec.workload.args));
        }
        if spec.workload.script.is_some() {
            container.insert(
                "volumeMounts".to_string(),
                json!([{ "name": SCRIPT_VOLUME, "mountPath": SCRIPT_MOUNT, "readOnly": true }]),
            );
            pod.insert(
                "volumes".to_string(),
                json!([{
                    "name": SCRIPT_VOLUME,
                    "configMap": { "name": script_config_map_name(&spec.name) }
                }]),
            );
        }
        if !spec.node_selector.is_empty() {
            let selector: Map<String, Value> = spec
                .node_selector
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            pod.insert("nodeSelector".to_string(), Value::Object(selector));
        }
    }

    if let Value::Object(pod) = &mut pod_spec {
        pod.insert("containers".to_string(), json!([container]));
    }

    let document = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": spec.name,
            "namespace": cluster.namespace,
            "labels": labels(spec, jobrun_id),
        },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "metadata": { "labels": labels(spec, jobrun_id) },
                "spec": pod_spec,
            }
        }
    });

    Ok(JobManifest {
        name: spec.name.clone(),
        namespace: cluster.namespace.clone(),
        document: serde_yaml::to_string(&document)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::{Config, RunMode};

    fn smoke_spec() -> BenchmarkJobSpec {
        Config::default()
            .benchmark("mlperf-bench")
            .unwrap()
            .to_spec(RunMode::Smoke, None)
    }

    fn parse(manifest: &JobManifest) -> Value {
        serde_yaml::from_str(&manifest.document).unwrap()
    }

    #[test]
    fn test_render_is_deterministic() {
        let id = Uuid::new_v4();
        let cluster = ClusterConfig::default();
        let a = render_job(&smoke_spec(), &cluster, id).unwrap();
        let b = render_job(&smoke_spec(), &cluster, id).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_job_shape() {
        let cluster = ClusterConfig::default();
        let manifest = render_job(&smoke_spec(), &cluster, Uuid::new_v4()).unwrap();
        let doc = parse(&manifest);

        assert_eq!(doc["kind"], "Job");
        assert_eq!(doc["metadata"]["namespace"], "benchmarks");
        assert_eq!(doc["spec"]["backoffLimit"], 0);

        let pod = &doc["spec"]["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Never");
        assert_eq!(pod["runtimeClassName"], "nvidia");
        assert_eq!(pod["nodeSelector"]["nvidia.com/gpu.present"], "true");

        let container = &pod["containers"][0];
        assert_eq!(container["resources"]["limits"]["nvidia.com/gpu"], 1);
        assert_eq!(container["resources"]["limits"]["memory"], "32Gi");
    }

    #[test]
    fn test_sample_and_secret_env() {
        let cluster = ClusterConfig::default();
        let manifest = render_job(&smoke_spec(), &cluster, Uuid::new_v4()).unwrap();
        let doc = parse(&manifest);
        let env = doc["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()
            .unwrap()
            .clone();

        let value_of = |name: &str| {
            env.iter()
                .find(|e| e["name"] == name)
                .map(|e| e["value"].clone())
        };
        assert_eq!(value_of("SAMPLE_COUNT"), Some(json!("100")));
        assert_eq!(value_of("SAMPLE_SPLIT"), Some(json!("[:100]")));

        let secret = env.iter().find(|e| e["name"] == "HF_TOKEN").unwrap();
        assert_eq!(secret["valueFrom"]["secretKeyRef"]["name"], "hf-token");
        assert_eq!(secret["valueFrom"]["secretKeyRef"]["key"], "token");
    }

    #[test]
    fn test_script_mount() {
        let mut spec = smoke_spec();
        spec.workload.script = Some("bench/mlperf_summarization.py".into());
        let manifest = render_job(&spec, &ClusterConfig::default(), Uuid::new_v4()).unwrap();
        let doc = parse(&manifest);

        let pod = &doc["spec"]["template"]["spec"];
        assert_eq!(pod["volumes"][0]["configMap"]["name"], "mlperf-bench-script");
        assert_eq!(pod["containers"][0]["volumeMounts"][0]["mountPath"], SCRIPT_MOUNT);
        assert_eq!(pod["containers"][0]["volumeMounts"][0]["readOnly"], true);
    }

    #[tokio::test]
    async fn test_load_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.py");
        std::fs::write(&path, "print('ok')\n").unwrap();

        let data = load_script(&path).await.unwrap();
        assert_eq!(data.get("run.py").map(String::as_str), Some("print('ok')\n"));
        assert!(load_script(&dir.path().join("missing.py")).await.is_err());
    }
}
