//! Runs the UDLF binary on an uploaded config.
//!
//! Each run is: read config, rewrite paths into a scratch copy, spawn the
//! binary in the outputs directory, drain stdout and stderr concurrently,
//! wait for exit, remove the scratch directory.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ExecutionConfig;
use crate::error::{GatewayError, Result};
use crate::rewrite::PathRewriter;
use crate::types::ExecutionOutput;

/// Accumulate a child stream, logging each line as it arrives.
async fn drain<R: AsyncRead + Unpin>(stream: R, name: &'static str) -> std::io::Result<String> {
    let mut reader = BufReader::new(stream);
    let mut out = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        debug!(
            stream = name,
            line = %String::from_utf8_lossy(&line).trim_end(),
            "udlf output"
        );
        out.extend_from_slice(&line);
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Resolves once the flag is set. Never resolves if the sender goes away
/// without setting it.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Signal the child's whole process group, so helpers it forked holding
/// the output pipes go down with it.
#[cfg(unix)]
fn signal_group(child: &mut Child, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    signal_group(child, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(unix)]
fn force_kill(child: &mut Child) -> std::io::Result<()> {
    signal_group(child, nix::sys::signal::Signal::SIGKILL)?;
    child.start_kill().or_else(|e| match e.kind() {
        std::io::ErrorKind::InvalidInput => Ok(()),
        _ => Err(e),
    })
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// Join a drain task. After a cancellation the wait is bounded, since a
/// process outside the group may still hold the pipe open.
async fn join_drain(
    mut task: JoinHandle<std::io::Result<String>>,
    name: &'static str,
    limit: Option<Duration>,
) -> Result<String> {
    let joined = match limit {
        None => (&mut task).await,
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(stream = name, "output pipe still open after termination, abandoning");
                task.abort();
                return Ok(String::new());
            }
        },
    };
    let output = joined.map_err(|e| GatewayError::Internal(format!("{name} reader failed: {e}")))??;
    Ok(output)
}

pub struct ExecutionDriver {
    executable: PathBuf,
    outputs_dir: PathBuf,
    rewriter: PathRewriter,
    kill_grace: Duration,
}

impl ExecutionDriver {
    pub fn new(config: &ExecutionConfig, outputs_dir: impl Into<PathBuf>, rewriter: PathRewriter) -> Self {
        Self {
            executable: config.executable.clone(),
            outputs_dir: outputs_dir.into(),
            rewriter,
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    /// Run the binary on the config at `config_path`.
    ///
    /// When `cancel` flips to `true` the child is sent SIGTERM and, if it is
    /// still alive after the grace period, killed.
    #[instrument(skip(self, cancel), fields(config = %config_path.display()))]
    pub async fn execute(
        &self,
        config_path: &Path,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ExecutionOutput> {
        let start = Instant::now();

        let config_bytes = match tokio::fs::read(config_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::not_found(config_path.display().to_string()));
            }
            Err(source) => {
                return Err(GatewayError::ConfigFormat {
                    path: config_path.display().to_string(),
                    source,
                })
            }
        };
        let file_name = config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config.ini".to_string());

        let rewritten = self
            .rewriter
            .rewrite_for_deployment(&config_bytes, &file_name)
            .await?;

        let result = self.run(&rewritten.config_path, cancel).await;
        rewritten.scratch.remove().await;

        let status = match &result {
            Ok(_) => "ok",
            Err(GatewayError::ExecutionFailed { .. }) => "failed",
            Err(GatewayError::Spawn { .. }) => "spawn_error",
            Err(_) => "error",
        };
        let elapsed = start.elapsed();
        crate::metrics::EXECUTIONS_TOTAL
            .with_label_values(&[status])
            .inc();
        crate::metrics::EXECUTION_DURATION.observe(elapsed.as_secs_f64());
        info!(status, elapsed_ms = elapsed.as_millis(), "execution finished");

        result
    }

    async fn run(
        &self,
        config_path: &Path,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ExecutionOutput> {
        tokio::fs::create_dir_all(&self.outputs_dir).await?;

        let mut command = Command::new(&self.executable);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .arg(config_path)
            .current_dir(&self.outputs_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                error!(program = %self.executable.display(), error = %source, "failed to spawn");
                GatewayError::Spawn {
                    program: self.executable.display().to_string(),
                    source,
                }
            })?;
        info!(pid = child.id(), "spawned udlf");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Internal("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GatewayError::Internal("child stderr not captured".into()))?;
        let stdout_task = tokio::spawn(drain(stdout, "stdout"));
        let stderr_task = tokio::spawn(drain(stderr, "stderr"));

        let (status, terminated) = self.wait(&mut child, cancel).await?;

        let limit = terminated.then_some(self.kill_grace);
        let stdout = join_drain(stdout_task, "stdout", limit).await?;
        let stderr = join_drain(stderr_task, "stderr", limit).await?;

        if status.success() {
            Ok(ExecutionOutput {
                stdout,
                stderr,
                exit_code: 0,
            })
        } else {
            warn!(code = ?status.code(), "udlf exited with failure");
            Err(GatewayError::ExecutionFailed {
                exit_code: status.code(),
                stdout,
                stderr,
            })
        }
    }

    async fn wait(
        &self,
        child: &mut Child,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<(ExitStatus, bool)> {
        let Some(mut cancel) = cancel else {
            return Ok((child.wait().await?, false));
        };

        tokio::select! {
            status = child.wait() => Ok((status?, false)),
            _ = cancelled(&mut cancel) => {
                warn!(pid = child.id(), "execution cancelled, terminating child");
                Ok((self.terminate(child).await?, true))
            }
        }
    }

    async fn terminate(&self, child: &mut Child) -> Result<ExitStatus> {
        request_termination(child)?;

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(grace_ms = self.kill_grace.as_millis(), "child ignored SIGTERM, killing");
                force_kill(child)?;
                Ok(child.wait().await?)
            }
        }
    }
}
