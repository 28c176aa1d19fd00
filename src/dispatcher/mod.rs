//! Container lifecycle manager: the one component with privileged access to
//! the container runtime. Every `execute` call creates at most one
//! container and guarantees its removal, success or failure.

mod stream;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, RemoveContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::security::capabilities::{self, Capability, CapabilitySecret, ExecutorKind, Mount, NetworkPolicy};

/// The JSON envelope every executor emits on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorResult {
    pub success: bool,
    #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutorResult {
    fn timeout(duration_ms: u64) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms,
            error: Some("timeout".to_string()),
        }
    }
}

pub struct Dispatcher {
    docker: Docker,
    executors: HashMap<ExecutorKind, ExecutorConfig>,
    secret: CapabilitySecret,
}

impl Dispatcher {
    pub fn new(docker: Docker, executors: HashMap<ExecutorKind, ExecutorConfig>, secret: CapabilitySecret) -> Self {
        Self { docker, executors, secret }
    }

    /// Translate a logical tool call into a single container execution and
    /// return its structured result.
    pub async fn execute(&self, kind: ExecutorKind, task: &Value, mounts_override: Option<Vec<Mount>>) -> Result<ExecutorResult> {
        let config = self
            .executors
            .get(&kind)
            .ok_or_else(|| crate::error::CoreError::Config(format!("no executor configured for {kind}")))?;

        let mounts = mounts_override.unwrap_or_else(|| default_mounts(kind, config));
        let network = default_network(kind, config);
        let capability = Capability {
            executor_kind: kind,
            mounts: mounts.clone(),
            network,
            timeout_seconds: config.timeout_secs,
            max_output_bytes: config.max_output_bytes,
        };

        let token = capabilities::mint(&capability, &self.secret)?;
        let task_b64 = base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(task)?);

        let container_name = format!("secureclaw-{kind}-{}", Uuid::new_v4());
        let container_config = build_container_config(kind, config, &mounts, &token, &task_b64, self.secret.expose());

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await?;
        let container_id = created.id;

        let result = self.run_and_wait(&container_id, config.timeout_secs).await;

        if let Err(e) = self
            .docker
            .remove_container(
                &container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(container_id, error = %e, "failed to remove executor container");
        }

        result
    }

    async fn run_and_wait(&self, container_id: &str, timeout_secs: u64) -> Result<ExecutorResult> {
        let start = Instant::now();
        self.docker.start_container::<String>(container_id, None).await?;

        let mut wait_stream = self.docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        let wait_outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), wait_stream.next()).await;

        let duration_ms = start.elapsed().as_millis() as u64;

        match wait_outcome {
            Err(_elapsed) => {
                let _ = self
                    .docker
                    .kill_container(container_id, Some(KillContainerOptions { signal: "SIGKILL" }))
                    .await;
                Ok(ExecutorResult::timeout(duration_ms))
            }
            Ok(None) => Ok(ExecutorResult {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms,
                error: Some("container exited without a wait response".to_string()),
            }),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(Some(Ok(_))) => {
                let demuxed = stream::collect_logs(&self.docker, container_id).await?;
                let stdout_raw = String::from_utf8_lossy(&demuxed.stdout).into_owned();
                let stderr_raw = String::from_utf8_lossy(&demuxed.stderr).into_owned();

                match serde_json::from_str::<ExecutorResult>(&stdout_raw) {
                    Ok(mut envelope) => {
                        if envelope.stderr.is_empty() {
                            envelope.stderr = stderr_raw;
                        }
                        Ok(envelope)
                    }
                    Err(_) => {
                        info!(container_id, "executor stdout was not a JSON envelope, wrapping raw streams");
                        Ok(ExecutorResult {
                            success: false,
                            exit_code: None,
                            stdout: stdout_raw,
                            stderr: stderr_raw,
                            duration_ms,
                            error: Some("executor produced unparsable output".to_string()),
                        })
                    }
                }
            }
        }
    }
}

fn default_mounts(kind: ExecutorKind, config: &ExecutorConfig) -> Vec<Mount> {
    if kind == ExecutorKind::Web {
        return Vec::new();
    }
    config
        .mounts
        .iter()
        .map(|path| Mount {
            host_path: path.clone(),
            container_path: path.clone(),
            read_only: false,
        })
        .collect()
}

fn default_network(kind: ExecutorKind, config: &ExecutorConfig) -> NetworkPolicy {
    if kind == ExecutorKind::Web && !config.allowed_domains.is_empty() {
        NetworkPolicy::Allow {
            allowed_domains: config.allowed_domains.clone(),
        }
    } else {
        NetworkPolicy::None
    }
}

fn build_container_config(
    kind: ExecutorKind,
    config: &ExecutorConfig,
    mounts: &[Mount],
    token: &str,
    task_b64: &str,
    secret: &str,
) -> Config<String> {
    let env = vec![
        format!("CAPABILITY_TOKEN={token}"),
        format!("TASK={task_b64}"),
        format!("CAPABILITY_SECRET={secret}"),
    ];

    let mut host_config = HostConfig {
        memory: Some((config.memory_limit_mb as i64) * 1024 * 1024),
        cpu_quota: Some(config.cpu_quota as i64),
        cpu_period: Some(100_000),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        cap_drop: Some(vec!["ALL".to_string()]),
        ..Default::default()
    };

    match kind {
        ExecutorKind::Shell | ExecutorKind::File => {
            host_config.network_mode = Some("none".to_string());
            host_config.binds = Some(
                mounts
                    .iter()
                    .map(|m| format!("{}:{}:{}", m.host_path, m.container_path, if m.read_only { "ro" } else { "rw" }))
                    .collect(),
            );
        }
        ExecutorKind::Web => {
            host_config.network_mode = Some("bridge".to_string());
            host_config.cap_add = Some(vec!["NET_ADMIN".to_string(), "SETUID".to_string(), "SETGID".to_string()]);
        }
    }

    Config {
        image: Some(config.image.clone()),
        env: Some(env),
        working_dir: Some("/workspace".to_string()),
        // Shell/file run fully unprivileged; web starts as root so the
        // entrypoint can install the egress filter, then execs the worker
        // under an unprivileged uid itself.
        user: match kind {
            ExecutorKind::Shell | ExecutorKind::File => Some("10000:10000".to_string()),
            ExecutorKind::Web => None,
        },
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_config() -> ExecutorConfig {
        ExecutorConfig {
            image: "secureclaw/executor-shell:latest".to_string(),
            timeout_secs: 30,
            max_output_bytes: 1_048_576,
            memory_limit_mb: 256,
            cpu_quota: 100_000,
            mounts: vec!["/workspace".to_string()],
            allowed_domains: vec![],
        }
    }

    #[test]
    fn default_mounts_for_shell_marks_read_write() {
        let mounts = default_mounts(ExecutorKind::Shell, &shell_config());
        assert_eq!(mounts.len(), 1);
        assert!(!mounts[0].read_only);
        assert_eq!(mounts[0].container_path, "/workspace");
    }

    #[test]
    fn web_executor_has_no_mounts() {
        let mounts = default_mounts(ExecutorKind::Web, &shell_config());
        assert!(mounts.is_empty());
    }

    #[test]
    fn shell_container_config_is_network_disabled_and_cap_dropped() {
        let mounts = default_mounts(ExecutorKind::Shell, &shell_config());
        let config = build_container_config(ExecutorKind::Shell, &shell_config(), &mounts, "tok", "dGFzaw==", "secret");
        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert!(host.binds.unwrap()[0].ends_with(":rw"));
    }

    #[test]
    fn web_container_config_grants_only_net_admin_setuid_setgid() {
        let web_config = ExecutorConfig {
            allowed_domains: vec!["example.com".to_string()],
            ..shell_config()
        };
        let config = build_container_config(ExecutorKind::Web, &web_config, &[], "tok", "dGFzaw==", "secret");
        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("bridge"));
        assert_eq!(
            host.cap_add,
            Some(vec!["NET_ADMIN".to_string(), "SETUID".to_string(), "SETGID".to_string()])
        );
        assert_eq!(config.user, None);
    }

    #[test]
    fn env_carries_token_task_and_secret_but_never_logs_them() {
        let mounts = default_mounts(ExecutorKind::Shell, &shell_config());
        let config = build_container_config(ExecutorKind::Shell, &shell_config(), &mounts, "tok-123", "dGFzaw==", "s3cr3t");
        let env = config.env.unwrap();
        assert!(env.iter().any(|e| e == "CAPABILITY_TOKEN=tok-123"));
        assert!(env.iter().any(|e| e == "CAPABILITY_SECRET=s3cr3t"));
    }

    #[test]
    fn executor_result_timeout_has_fixed_error_string() {
        let result = ExecutorResult::timeout(1200);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert_eq!(result.duration_ms, 1200);
    }
}
