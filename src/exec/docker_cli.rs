// src/exec/docker_cli.rs

//! [`ContainerEngine`] backed by the `docker` command-line client.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::exec::backend::{
    CommandOutput, ContainerEngine, CreateContainerRequest, CreatedContainer, EngineFailure,
    EngineFuture, HealthStatus,
};
use crate::model::{Container, DockerContainer, DockerImage, DockerNetwork, ImageSource};

const DOCKER: &str = "docker";
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_STATE_FORMAT: &str = concat!(
    "{{if .State.Health}}{{.State.Health.Status}}{{else}}none{{end}} ",
    "{{.State.Status}} {{.State.ExitCode}}"
);
const HEALTH_LOG_SEPARATOR: char = '\u{1e}';

/// Runs every operation as a `docker` subprocess.
#[derive(Debug, Clone)]
pub struct DockerCliEngine {
    project_name: String,
    task_name: String,
}

impl DockerCliEngine {
    pub fn new(project_name: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            task_name: task_name.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(DOCKER);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion and return trimmed stdout, or stderr as the failure.
    async fn output(&self, args: Vec<String>) -> Result<String, EngineFailure> {
        debug!(args = ?args, "running docker command");

        let output = self
            .command(&args)
            .output()
            .await
            .map_err(|e| EngineFailure::new(format!("could not run '{DOCKER}': {e}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code().unwrap_or(-1);
        Err(EngineFailure::new(if stderr.is_empty() {
            format!("'{DOCKER} {}' exited with code {code}", args.join(" "))
        } else {
            stderr
        }))
    }

    fn unique_suffix() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();
        format!("{}-{nanos:x}", std::process::id())
    }

    async fn write_env_file(
        &self,
        request: &CreateContainerRequest,
    ) -> Result<PathBuf, EngineFailure> {
        let mut contents = String::new();
        for (key, value) in request
            .container
            .environment
            .iter()
            .chain(request.additional_environment.iter())
        {
            contents.push_str(&format!("{key}={value}\n"));
        }

        let path = std::env::temp_dir().join(format!(
            "{}-{}-{}.env",
            self.project_name,
            request.container.name,
            Self::unique_suffix()
        ));
        tokio::fs::write(&path, contents).await.map_err(|e| {
            EngineFailure::new(format!(
                "could not write environment file '{}': {e}",
                path.display()
            ))
        })?;
        Ok(path)
    }

    async fn health_state(
        &self,
        docker_container: &DockerContainer,
    ) -> Result<String, EngineFailure> {
        self.output(vec![
            "inspect".into(),
            "--format".into(),
            HEALTH_STATE_FORMAT.into(),
            docker_container.id.clone(),
        ])
        .await
    }

    async fn last_health_output(&self, docker_container: &DockerContainer) -> String {
        let format = format!(
            "{{{{range .State.Health.Log}}}}{{{{.Output}}}}{HEALTH_LOG_SEPARATOR}{{{{end}}}}"
        );
        match self
            .output(vec![
                "inspect".into(),
                "--format".into(),
                format,
                docker_container.id.clone(),
            ])
            .await
        {
            Ok(log) => log
                .split(HEALTH_LOG_SEPARATOR)
                .filter(|entry| !entry.trim().is_empty())
                .last()
                .unwrap_or_default()
                .trim()
                .to_string(),
            Err(e) => e.message,
        }
    }

    async fn poll_health(
        &self,
        docker_container: &DockerContainer,
    ) -> Result<HealthStatus, EngineFailure> {
        loop {
            let state = self.health_state(docker_container).await?;
            let mut parts = state.split_whitespace();
            let health = parts.next().unwrap_or_default();
            let status = parts.next().unwrap_or_default();
            let exit_code = parts.next().and_then(|c| c.parse().ok()).unwrap_or(-1);

            if status == "exited" || status == "dead" {
                return Ok(HealthStatus::Exited { exit_code });
            }

            match health {
                "none" => return Ok(HealthStatus::NoHealthCheck),
                "healthy" => return Ok(HealthStatus::BecameHealthy),
                "unhealthy" => {
                    let last_output = self.last_health_output(docker_container).await;
                    return Ok(HealthStatus::BecameUnhealthy { last_output });
                }
                _ => tokio::time::sleep(HEALTH_POLL_INTERVAL).await,
            }
        }
    }

    async fn run_attached(&self, docker_container: &DockerContainer) -> Result<i64, EngineFailure> {
        let mut child = self
            .command(["start", "--attach", docker_container.id.as_str()])
            .spawn()
            .map_err(|e| EngineFailure::new(format!("could not run '{DOCKER}': {e}")))?;

        // Container output goes to our stdout/stderr; logs stay on stderr.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let forward_stdout = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    println!("{line}");
                }
            }
        };
        let forward_stderr = async {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    eprintln!("{line}");
                }
            }
        };

        let (status, (), ()) = tokio::join!(child.wait(), forward_stdout, forward_stderr);
        let status = status?;
        debug!(container = %docker_container.id, status = ?status, "attached client exited");

        let exit_code = self
            .output(vec![
                "inspect".into(),
                "--format".into(),
                "{{.State.ExitCode}}".into(),
                docker_container.id.clone(),
            ])
            .await?;

        exit_code.parse().map_err(|_| {
            EngineFailure::new(format!(
                "could not determine the exit code of the container (got '{exit_code}')"
            ))
        })
    }
}

/// Saturates rather than overflowing on absurd health check settings.
fn health_timeout(container: &Container) -> Duration {
    let check = &container.health_check;
    let start_period = check.start_period.unwrap_or_default();
    match (check.interval, check.retries) {
        (Some(interval), Some(retries)) => interval
            .checked_mul(retries.saturating_add(1))
            .unwrap_or(Duration::MAX)
            .saturating_add(start_period),
        _ => DEFAULT_HEALTH_TIMEOUT.saturating_add(start_period),
    }
}

fn duration_arg(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

/// Split a command line into arguments, honouring single and double quotes
/// and backslash escapes.
pub(crate) fn split_command(command: &str) -> Result<Vec<String>, EngineFailure> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => match chars.next() {
                Some(escaped) => {
                    current.push(escaped);
                    in_arg = true;
                }
                None => {
                    return Err(EngineFailure::new(format!(
                        "the command '{command}' ends with a trailing backslash"
                    )));
                }
            },
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_arg = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(EngineFailure::new(format!(
            "the command '{command}' contains an unbalanced {q} quote"
        )));
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}

impl ContainerEngine for DockerCliEngine {
    fn build_image<'a>(&'a self, container: &'a Container) -> EngineFuture<'a, DockerImage> {
        Box::pin(async move {
            let ImageSource::Build {
                build_directory,
                dockerfile,
            } = &container.image_source
            else {
                return Err(EngineFailure::new(format!(
                    "container '{}' does not have a build directory",
                    container.name
                )));
            };

            info!(container = %container.name, dir = %build_directory.display(), "building image");

            let mut args = vec![
                "build".to_string(),
                "--quiet".to_string(),
                "--tag".to_string(),
                format!("{}-{}", self.project_name, container.name),
            ];
            if let Some(dockerfile) = dockerfile {
                args.push("--file".to_string());
                args.push(build_directory.join(dockerfile).display().to_string());
            }
            args.push(build_directory.display().to_string());

            let id = self.output(args).await?;
            Ok(DockerImage { id })
        })
    }

    fn pull_image<'a>(&'a self, image_name: &'a str) -> EngineFuture<'a, DockerImage> {
        Box::pin(async move {
            info!(image = %image_name, "pulling image");
            self.output(vec!["pull".into(), "--quiet".into(), image_name.into()])
                .await?;
            Ok(DockerImage {
                id: image_name.to_string(),
            })
        })
    }

    fn create_network(&self) -> EngineFuture<'_, DockerNetwork> {
        Box::pin(async move {
            let name = format!(
                "{}-{}-{}",
                self.project_name,
                self.task_name,
                Self::unique_suffix()
            );
            let id = self
                .output(vec!["network".into(), "create".into(), name])
                .await?;
            Ok(DockerNetwork { id })
        })
    }

    fn create_container<'a>(
        &'a self,
        request: &'a CreateContainerRequest,
    ) -> EngineFuture<'a, CreatedContainer> {
        Box::pin(async move {
            let container = &request.container;
            let command_args = match &request.command {
                Some(command) => split_command(command)?,
                None => Vec::new(),
            };
            let env_file = self.write_env_file(request).await?;

            let mut args = vec![
                "create".to_string(),
                "--network".to_string(),
                request.network.id.clone(),
                "--network-alias".to_string(),
                container.name.clone(),
                "--env-file".to_string(),
                env_file.display().to_string(),
            ];
            if let Some(dir) = &container.working_directory {
                args.extend(["--workdir".to_string(), dir.clone()]);
            }
            for mount in &container.volume_mounts {
                args.extend(["--volume".to_string(), mount.to_string()]);
            }
            for port in &container.port_mappings {
                args.extend(["--publish".to_string(), port.to_string()]);
            }

            let health = &container.health_check;
            if let Some(command) = &health.command {
                args.extend(["--health-cmd".to_string(), command.clone()]);
            }
            if let Some(interval) = health.interval {
                args.extend(["--health-interval".to_string(), duration_arg(interval)]);
            }
            if let Some(retries) = health.retries {
                args.extend(["--health-retries".to_string(), retries.to_string()]);
            }
            if let Some(start_period) = health.start_period {
                args.extend(["--health-start-period".to_string(), duration_arg(start_period)]);
            }

            args.push(request.image.id.clone());
            args.extend(command_args);

            let created = match self.output(args).await {
                Ok(id) => id,
                Err(e) => {
                    if let Err(remove_err) = tokio::fs::remove_file(&env_file).await {
                        warn!(
                            path = %env_file.display(),
                            error = %remove_err,
                            "could not remove environment file"
                        );
                    }
                    return Err(e);
                }
            };

            let mut result = CreatedContainer::new(DockerContainer { id: created });
            result.temporary_files.push(env_file);
            Ok(result)
        })
    }

    fn start_container<'a>(
        &'a self,
        _container: &'a Container,
        docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.output(vec!["start".into(), docker_container.id.clone()])
                .await?;
            Ok(())
        })
    }

    fn run_container<'a>(
        &'a self,
        container: &'a Container,
        docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, i64> {
        Box::pin(async move {
            info!(container = %container.name, "running task container");
            self.run_attached(docker_container).await
        })
    }

    fn wait_for_health<'a>(
        &'a self,
        container: &'a Container,
        docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, HealthStatus> {
        Box::pin(async move {
            let timeout = health_timeout(container);
            match tokio::time::timeout(timeout, self.poll_health(docker_container)).await {
                Ok(status) => status,
                Err(_) => Ok(HealthStatus::BecameUnhealthy {
                    last_output: format!("no result within {}s", timeout.as_secs_f64()),
                }),
            }
        })
    }

    fn run_setup_command<'a>(
        &'a self,
        _container: &'a Container,
        docker_container: &'a DockerContainer,
        command: &'a str,
    ) -> EngineFuture<'a, CommandOutput> {
        Box::pin(async move {
            let output = self
                .command([
                    "exec",
                    docker_container.id.as_str(),
                    "sh",
                    "-c",
                    command,
                ])
                .output()
                .await?;

            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));

            Ok(CommandOutput {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                output: combined,
            })
        })
    }

    fn stop_container<'a>(
        &'a self,
        _container: &'a Container,
        docker_container: &'a DockerContainer,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.output(vec!["stop".into(), docker_container.id.clone()])
                .await?;
            Ok(())
        })
    }

    fn remove_container<'a>(
        &'a self,
        _container: &'a Container,
        docker_container: &'a DockerContainer,
        force: bool,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let mut args = vec!["rm".to_string()];
            if force {
                args.push("--force".to_string());
            }
            args.push("--volumes".to_string());
            args.push(docker_container.id.clone());

            self.output(args).await?;
            Ok(())
        })
    }

    fn delete_network<'a>(&'a self, network: &'a DockerNetwork) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.output(vec!["network".into(), "rm".into(), network.id.clone()])
                .await?;
            Ok(())
        })
    }
}
