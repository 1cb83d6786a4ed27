//! Runs the external telemetry tool with a hard timeout.
//!
//! Every call spawns exactly one child and reaps it on all paths. On unix the
//! child leads its own process group, and a timeout kills the whole group so
//! that whatever a wrapper (`sudo`, a shell) forked goes with it. Dropping
//! the calling future does the same.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::error::InvocationError;

const DEVICE_QUERY: &str = "--query-gpu=name,driver_version,memory.total,memory.used,\
utilization.gpu,utilization.memory,temperature.gpu,power.draw,power.limit,fan.speed,\
pcie.link.gen.current,pcie.link.gen.max,pcie.link.width.current,pcie.link.width.max";
const APPS_QUERY: &str = "--query-compute-apps=pid,used_memory,process_name";
const GRAPHICS_APPS_QUERY: &str = "--query-graphics-apps=pid,used_memory";
const CSV_FORMAT: &str = "--format=csv,noheader,nounits";

/// Known command variants. Nothing else is ever executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSpec {
    QueryDevice,
    QueryApps,
    QueryGraphicsApps,
    DriverBanner,
    Version,
    SetPowerLimit { watts: u32 },
}

impl CommandSpec {
    pub fn is_privileged(&self) -> bool {
        matches!(self, CommandSpec::SetPowerLimit { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: CommandSpec, timeout: Duration) -> Result<RawOutput, InvocationError>;
}

/// `nvidia-smi` backed runner.
#[derive(Debug, Clone)]
pub struct SmiRunner {
    pub program: PathBuf,
    pub gpu_index: u32,
    // e.g. ["sudo", "-n"]; only applied to privileged variants
    pub elevate: Vec<String>,
}

impl SmiRunner {
    pub fn new(program: impl Into<PathBuf>, gpu_index: u32, elevate: Vec<String>) -> Self {
        Self {
            program: program.into(),
            gpu_index,
            elevate,
        }
    }

    /// Program and argument vector for a variant.
    pub fn argv(&self, spec: CommandSpec) -> (String, Vec<String>) {
        let smi = self.program.to_string_lossy().into_owned();
        let index = self.gpu_index.to_string();
        let args: Vec<String> = match spec {
            CommandSpec::QueryDevice => vec!["-i".into(), index, DEVICE_QUERY.into(), CSV_FORMAT.into()],
            CommandSpec::QueryApps => vec!["-i".into(), index, APPS_QUERY.into(), CSV_FORMAT.into()],
            CommandSpec::QueryGraphicsApps => {
                vec!["-i".into(), index, GRAPHICS_APPS_QUERY.into(), CSV_FORMAT.into()]
            }
            CommandSpec::DriverBanner => Vec::new(),
            CommandSpec::Version => vec!["--version".into()],
            CommandSpec::SetPowerLimit { watts } => {
                vec!["-i".into(), index, "-pl".into(), watts.to_string()]
            }
        };
        match self.elevate.split_first() {
            Some((wrapper, rest)) if spec.is_privileged() => {
                let mut full: Vec<String> = rest.to_vec();
                full.push(smi);
                full.extend(args);
                (wrapper.clone(), full)
            }
            _ => (smi, args),
        }
    }
}

#[async_trait]
impl CommandRunner for SmiRunner {
    async fn run(&self, spec: CommandSpec, timeout: Duration) -> Result<RawOutput, InvocationError> {
        let (program, args) = self.argv(spec);
        run_with_timeout(&program, &args, timeout).await
    }
}

/// Spawn `program args…`, collect its output, and give up after `timeout`.
pub async fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<RawOutput, InvocationError> {
    let timeout_ms = timeout.as_millis() as u64;
    if timeout.is_zero() {
        return Err(InvocationError::Timeout { timeout_ms });
    }
    debug!(program, ?args, "spawning");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| InvocationError::ProcessFailed {
        exit_code: None,
        stderr: format!("failed to spawn {program}: {e}"),
        stdout: String::new(),
    })?;
    let mut group = ProcessGroup::of(child.id());

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let outcome = {
        let collect = async {
            let (out, err) = tokio::join!(read_pipe(stdout_pipe), read_pipe(stderr_pipe));
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out?, err?))
        };
        tokio::time::timeout(timeout, collect).await
    };

    let (status, out, err) = match outcome {
        Err(_elapsed) => {
            group.kill();
            // kill() also waits, so the direct child is reaped
            if let Err(e) = child.kill().await {
                debug!("kill after timeout failed: {e}");
            }
            return Err(InvocationError::Timeout { timeout_ms });
        }
        Ok(Err(e)) => {
            group.kill();
            let _ = child.kill().await;
            return Err(InvocationError::ProcessFailed {
                exit_code: None,
                stderr: format!("i/o error: {e}"),
                stdout: String::new(),
            });
        }
        Ok(Ok(v)) => {
            group.disarm();
            v
        }
    };

    let stdout = String::from_utf8_lossy(&out).into_owned();
    let stderr = String::from_utf8_lossy(&err).into_owned();

    if !status.success() || stdout.trim().is_empty() {
        return Err(InvocationError::ProcessFailed {
            exit_code: status.code(),
            stderr: if stderr.trim().is_empty() {
                // nvidia-smi reports most errors on stdout
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            },
            stdout,
        });
    }
    Ok(RawOutput { stdout, stderr })
}

/// The child's process group, killed on drop unless disarmed.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else { return };
        let Ok(pgid) = libc::pid_t::try_from(pgid) else { return };
        // SAFETY: killpg only sends a signal; the group was created by us via process_group(0)
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
            debug!("killpg({pgid}) failed: {}", std::io::Error::last_os_error());
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut p) = pipe {
        p.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
