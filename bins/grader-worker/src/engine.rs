/// Docker Sandbox - Runs one candidate invocation per container
///
/// **Docker Execution Rules:**
/// 1. Image for the worker's language is pulled once at startup (`warm_up`)
/// 2. Every fixture gets a fresh container with:
///    - Network disabled
///    - CPU/memory/pid limits enforced, no swap
///    - Read-only root filesystem, writable tmpfs scratch at /tmp
///    - All capabilities dropped
/// 3. Source code and arguments are injected through base64 env vars
/// 4. The runner prints the return value on a marker line on stdout
/// 5. Budget is enforced from container start; the container is killed on expiry
/// 6. The container is removed on every path via a drop guard
///
/// Daemon-side failures (create/start/pull) surface as
/// `SandboxError::Unavailable` so the job can be requeued rather than scored.

use crate::config::LanguageConfigManager;
use crate::sandbox::{ExecutionRequest, Sandbox, SandboxError};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use grader_common::types::{ExecutionResult, Language};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Prefix of the stdout line carrying the candidate's return value
pub const RESULT_MARKER: &str = "@@GRADER_RESULT@@ ";

/// Longest single environment string the kernel accepts (`MAX_ARG_STRLEN`,
/// terminating NUL excluded)
const MAX_ENV_ENTRY_BYTES: usize = 128 * 1024 - 1;
const SCRATCH_MOUNT: &str = "/tmp";
const SCRATCH_OPTIONS: &str = "rw,noexec,nosuid,size=64m";

/// Container cleanup guard - guarantees container removal on drop
///
/// Keyed on the container name and armed before the create call, so a
/// container created by a call that was then abandoned is removed too.
struct ContainerGuard {
    docker: Docker,
    container_name: String,
}

impl ContainerGuard {
    fn new(docker: Docker, container_name: String) -> Self {
        Self { docker, container_name }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let container_name = self.container_name.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            match docker.remove_container(&container_name, Some(remove_options)).await {
                Ok(_) => {}
                // never created
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                    debug!(container = %container_name, "No container to clean up");
                }
                Err(e) => warn!(container = %container_name, error = %e, "Failed to clean up container"),
            }
        });
    }
}

/// A started container waiting to be observed
pub struct StartedContainer {
    container_id: String,
    started_at: Instant,
    _guard: ContainerGuard,
}

/// Environment handed to the runner; each entry must fit one env string
fn payload_env(request: &ExecutionRequest) -> Result<Vec<String>, SandboxError> {
    let source = encoded_entry("SOURCE_CODE", &request.source_code).ok_or_else(|| {
        SandboxError::Rejected(format!(
            "source code of {} bytes exceeds the runner's environment limit",
            request.source_code.len()
        ))
    })?;

    let arguments = request.arguments_literal();
    let arguments = encoded_entry("ARGUMENTS", &arguments).ok_or_else(|| {
        SandboxError::Rejected(format!(
            "fixture arguments of {} bytes exceed the runner's environment limit",
            arguments.len()
        ))
    })?;

    Ok(vec![
        source,
        arguments,
        format!("ENTRY_POINT={}", request.entry_point),
        format!("LANGUAGE={}", request.language),
    ])
}

fn encoded_entry(name: &str, value: &str) -> Option<String> {
    let entry = format!("{}={}", name, general_purpose::STANDARD.encode(value));
    (entry.len() <= MAX_ENV_ENTRY_BYTES).then_some(entry)
}

pub struct DockerSandbox {
    docker: Docker,
    config_manager: LanguageConfigManager,
}

impl DockerSandbox {
    pub fn new(config_manager: &LanguageConfigManager) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| anyhow::anyhow!("Failed to connect to Docker daemon: {}", e))?;

        Ok(DockerSandbox {
            docker,
            config_manager: config_manager.clone(),
        })
    }

    /// Pull the language image ahead of the first job
    pub async fn warm_up(&self, language: &Language) -> Result<(), SandboxError> {
        let image = self.image_name(language);
        self.ensure_image(&image).await
    }

    fn image_name(&self, language: &Language) -> String {
        self.config_manager
            .get_image(language)
            .unwrap_or_else(|_| format!("grader-{}:latest", language))
    }

    fn command(&self, language: &Language) -> Vec<String> {
        self.config_manager
            .get_command(language)
            .unwrap_or_else(|_| vec!["/runner/run".to_string()])
    }

    fn memory_limit(&self, language: &Language) -> i64 {
        self.config_manager
            .get_memory_limit_mb(language)
            .map(|mb| (mb as i64) * 1024 * 1024)
            .unwrap_or(256 * 1024 * 1024)
    }

    fn cpu_limit(&self, language: &Language) -> i64 {
        self.config_manager
            .get_cpu_limit(language)
            .map(|cpus| (cpus as f64 * 1_000_000_000.0) as i64)
            .unwrap_or(500_000_000)
    }

    fn pids_limit(&self, language: &Language) -> i64 {
        self.config_manager.get_pids_limit(language).unwrap_or(64)
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss; pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxError::Unavailable(format!("failed to pull image {}: {}", image, e)))?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    fn container_config(&self, language: &Language, env: Vec<String>) -> Config<String> {
        let memory_limit = self.memory_limit(language);

        Config {
            image: Some(self.image_name(language)),
            cmd: Some(self.command(language)),
            env: Some(env),
            working_dir: Some(SCRATCH_MOUNT.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(memory_limit),
                memory_swap: Some(memory_limit),
                nano_cpus: Some(self.cpu_limit(language)),
                pids_limit: Some(self.pids_limit(language)),
                readonly_rootfs: Some(true),
                tmpfs: Some(HashMap::from([(
                    SCRATCH_MOUNT.to_string(),
                    SCRATCH_OPTIONS.to_string(),
                )])),
                network_mode: Some("none".to_string()),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Follow logs until the container exits, then read its exit status
    async fn collect(&self, container_id: &str) -> (String, String, Option<i64>) {
        let mut stdout = String::new();
        let mut stderr = String::new();

        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs_stream.next().await {
            match output {
                Ok(LogOutput::StdOut { message }) => stdout.push_str(&String::from_utf8_lossy(&message)),
                Ok(LogOutput::StdErr { message }) => stderr.push_str(&String::from_utf8_lossy(&message)),
                Ok(_) => {}
                Err(e) => {
                    warn!(container_id, error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        let exit_code = match wait_stream.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(container_id, error = %e, "Failed to read container exit code");
                None
            }
            None => None,
        };

        (stdout, stderr, exit_code)
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    type Prepared = StartedContainer;

    async fn prepare(&self, request: &ExecutionRequest) -> Result<StartedContainer, SandboxError> {
        let env = payload_env(request)?;

        let image = self.image_name(&request.language);
        self.ensure_image(&image).await?;

        let container_name = format!("grader-{}", uuid::Uuid::new_v4());
        let guard = ContainerGuard::new(self.docker.clone(), container_name.clone());

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), self.container_config(&request.language, env))
            .await
            .map_err(|e| SandboxError::Unavailable(format!("failed to create container: {}", e)))?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::Unavailable(format!("failed to start container: {}", e)))?;

        Ok(StartedContainer {
            container_id: container.id,
            started_at: Instant::now(),
            _guard: guard,
        })
    }

    async fn run(
        &self,
        container: StartedContainer,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxError> {
        let container_id = container.container_id.as_str();
        let remaining = request.time_budget.saturating_sub(container.started_at.elapsed());

        let finished = tokio::time::timeout(remaining, self.collect(container_id)).await;
        let duration_ms = container.started_at.elapsed().as_millis() as u64;

        let (stdout, mut stderr, exit_code) = match finished {
            Ok(collected) => collected,
            Err(_) => {
                warn!(
                    container_id = %container_id,
                    budget_ms = request.time_budget.as_millis() as u64,
                    "Execution timed out; killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }
                return Ok(ExecutionResult::timed_out(duration_ms));
            }
        };

        match exit_code {
            Some(0) => {
                let raw = extract_result(&stdout);
                debug!(container_id = %container_id, duration_ms, has_result = raw.is_some(), "Container exited cleanly");
                Ok(ExecutionResult {
                    raw_output: raw,
                    stderr,
                    exit_signal: Some(0),
                    duration_ms,
                    timed_out: false,
                })
            }
            Some(code) => {
                annotate_exit(&mut stderr, code);
                debug!(container_id = %container_id, exit_code = code, "Container exited with failure");
                Ok(ExecutionResult::crashed(stderr, code, duration_ms))
            }
            None => Err(SandboxError::Unavailable(
                "container finished without an exit status".to_string(),
            )),
        }
    }
}

/// Return value printed by the runner; the last marker line wins
pub fn extract_result(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(RESULT_MARKER))
        .map(|payload| payload.trim().to_string())
}

fn annotate_exit(stderr: &mut String, code: i64) {
    match code {
        137 => stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]"),
        139 => stderr.push_str("\n[Container killed: segmentation fault]"),
        _ => {}
    }
}
