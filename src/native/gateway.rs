use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until, timeout, timeout_at};

use crate::core::{
    domain::{
        BinaryHandle, ExecutionRequest, ExecutionResult, SAFE_FLAG, VERSION_FALLBACK, VERSION_FLAG,
    },
    traits::{
        gateway::{Gateway, GatewayError},
        provisioner::Provisioner,
    },
};
use crate::native::source_file::TransientSourceFile;

/// How long the output readers may keep draining once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct GatewayOptions {
    pub work_dir: PathBuf,
    pub safe_mode: bool,
}

/// Runs submitted source through the interpreter binary as a child process.
#[derive(Debug)]
pub struct ExecutionGateway {
    provisioner: Arc<dyn Provisioner>,
    options: GatewayOptions,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    DeadlineElapsed,
}

impl ExecutionGateway {
    pub fn new(provisioner: Arc<dyn Provisioner>, options: GatewayOptions) -> Self {
        Self {
            provisioner,
            options,
        }
    }

    async fn execute(
        &self,
        binary: &BinaryHandle,
        source_path: &Path,
        inputs: &[String],
        deadline: Duration,
    ) -> ExecutionResult {
        let mut cmd = Command::new(&binary.path);
        cmd.arg(source_path);
        if self.options.safe_mode {
            cmd.arg(SAFE_FLAG);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::debug!("Spawning interpreter: {:?}", cmd.as_std());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Failed to spawn {}: {}", binary.path.display(), e);
                return ExecutionResult::spawn_failed(&e.to_string());
            }
        };
        let deadline_at = Instant::now() + deadline;
        let pid = child.id();

        let stdout = StreamCapture::start(child.stdout.take());
        let stderr = StreamCapture::start(child.stderr.take());
        let feeder = feed_inputs(child.stdin.take(), inputs.to_vec());

        // Only one branch completes, so each invocation is finalized once.
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = sleep_until(deadline_at) => Outcome::DeadlineElapsed,
        };

        let result = match outcome {
            Outcome::Exited(Ok(status)) => {
                // Descendants left behind would hold the pipes open.
                kill_process_group(pid);
                let drain_until = Instant::now() + DRAIN_GRACE;
                let stdout = stdout.finish(drain_until).await;
                let stderr = stderr.finish(drain_until).await;
                tracing::debug!(
                    "Interpreter exited: status={}, stdout={}B, stderr={}B",
                    status,
                    stdout.len(),
                    stderr.len()
                );

                let failure = (!status.success()).then(|| format!("process exited with {}", status));
                ExecutionResult::from_exit(&stdout, &stderr, failure)
            }
            Outcome::Exited(Err(e)) => {
                tracing::warn!("Failed to wait for interpreter: {}", e);
                kill_process_group(pid);
                let _ = child.kill().await;
                let drain_until = Instant::now() + DRAIN_GRACE;
                let stdout = stdout.finish(drain_until).await;
                let stderr = stderr.finish(drain_until).await;

                ExecutionResult::from_exit(&stdout, &stderr, Some(e.to_string()))
            }
            Outcome::DeadlineElapsed => {
                tracing::warn!("Deadline of {:?} elapsed, killing interpreter", deadline);
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill interpreter: {}", e);
                }
                let drain_until = Instant::now() + DRAIN_GRACE;
                let stdout = stdout.finish(drain_until).await;
                let stderr = stderr.finish(drain_until).await;

                ExecutionResult::timed_out(&stdout, &stderr)
            }
        };

        feeder.abort();
        result
    }
}

#[async_trait::async_trait]
impl Gateway for ExecutionGateway {
    #[tracing::instrument(skip(self, request), fields(inputs = request.inputs.len()))]
    async fn run(
        &self,
        request: &ExecutionRequest,
        deadline: Duration,
    ) -> Result<ExecutionResult, GatewayError> {
        let binary = self.provisioner.resolve().await?;

        let source = TransientSourceFile::create(&self.options.work_dir, &request.source_code)
            .await
            .map_err(GatewayError::SourceFile)?;

        let result = self
            .execute(&binary, source.path(), &request.inputs, deadline)
            .await;
        source.remove().await;

        tracing::info!(
            "Execution finished: termination={:?}, output={}B",
            result.termination_reason,
            result.combined_output.len()
        );
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    async fn version(&self, deadline: Duration) -> Result<String, GatewayError> {
        let binary = self.provisioner.resolve().await?;

        let mut cmd = Command::new(&binary.path);
        cmd.arg(VERSION_FLAG)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(deadline, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!("Version query failed to run: {}", e);
                return Ok(VERSION_FALLBACK.to_string());
            }
            Err(_) => {
                tracing::warn!("Version query exceeded {:?}", deadline);
                return Ok(VERSION_FALLBACK.to_string());
            }
        };

        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr)
        } else {
            String::from_utf8_lossy(&output.stdout)
        };

        match text.trim() {
            "" => Ok(VERSION_FALLBACK.to_string()),
            version => Ok(version.to_string()),
        }
    }
}

/// Accumulates one output stream as it arrives, so a killed process still
/// yields whatever it wrote before the deadline.
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
}

impl StreamCapture {
    fn start<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();

        let reader = tokio::spawn(async move {
            let Some(mut stream) = stream else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink.lock().await.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        tracing::warn!("Failed to read interpreter output: {}", e);
                        break;
                    }
                }
            }
        });

        Self { buffer, reader }
    }

    async fn finish(self, until: Instant) -> Vec<u8> {
        let mut reader = self.reader;
        if timeout_at(until, &mut reader).await.is_err() {
            reader.abort();
        }

        std::mem::take(&mut *self.buffer.lock().await)
    }
}

/// Kills everything the interpreter started. The child leads its own group,
/// so the group id is its pid; the group outlives the child while any
/// descendant is alive.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };

    // Safety: killpg only sends a signal and takes no pointers.
    let ret = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!("Failed to kill process group {}: {}", pid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Writes each input as its own line, then closes stdin.
fn feed_inputs(stdin: Option<ChildStdin>, inputs: Vec<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut stdin) = stdin else {
            return;
        };

        for input in &inputs {
            let line = format!("{}\n", input);
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                tracing::warn!("Failed to write interpreter input: {}", e);
                return;
            }
        }

        if let Err(e) = stdin.flush().await {
            tracing::warn!("Failed to flush interpreter input: {}", e);
        }
    })
}
