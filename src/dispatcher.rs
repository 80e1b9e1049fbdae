use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::EngineConfig;
use crate::error::DispatchError;
use crate::types::VerificationRequest;

/// Starts engine processes. Split out so tests can observe spawns.
pub trait Spawner: Send + Sync {
    fn spawn(&self, command: &mut Command) -> io::Result<Child>;
}

/// Spawns real OS processes.
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(&self, command: &mut Command) -> io::Result<Child> {
        command.spawn()
    }
}

/// Everything collected from a finished engine process.
struct Completed {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Runs the external verification engine, one fresh process per request.
///
/// Holds no per-request state, so a single dispatcher serves any number of
/// concurrent requests.
pub struct Dispatcher {
    config: EngineConfig,
    spawner: Arc<dyn Spawner>,
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_spawner(config, Arc::new(ProcessSpawner))
    }

    pub fn with_spawner(config: EngineConfig, spawner: Arc<dyn Spawner>) -> Self {
        Self { config, spawner }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the configured build step, if any. Called once before serving.
    pub async fn prepare(&self) -> Result<(), DispatchError> {
        let (Some(build), Some(mut command)) = (&self.config.build, self.config.build_command())
        else {
            return Ok(());
        };

        tracing::info!(
            "Running verifier build step: {} {}",
            build.command.display(),
            build.args.join(" ")
        );
        let started = Instant::now();

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = self
            .spawner
            .spawn(&mut command)
            .map_err(|source| DispatchError::Spawn {
                command: build.command.display().to_string(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let drains = [stdout.abort_handle(), stderr.abort_handle()];

        let session = exchange(&mut child, None, Vec::new(), stdout, stderr);
        let output = match tokio::time::timeout(build.timeout, session).await {
            Ok(completed) => completed?,
            Err(_) => {
                tracing::warn!(
                    "Verifier build step exceeded {}ms deadline, killing pid={:?}",
                    build.timeout.as_millis(),
                    child.id()
                );
                terminate(&mut child, &drains).await;
                return Err(DispatchError::Timeout(build.timeout));
            }
        };

        if !output.status.success() {
            return Err(DispatchError::EngineFailure {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        tracing::info!(
            "Verifier build step finished in {}ms",
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Verify one request by running the engine to completion.
    ///
    /// The request is written to the engine's stdin as a single JSON object,
    /// then stdin is closed. Exit status 0 means stdout holds the JSON result;
    /// any other status is a failure described by stderr.
    pub async fn dispatch(&self, request: VerificationRequest) -> Result<Value, DispatchError> {
        let payload = serde_json::to_vec(&request)?;

        let mut command = self.config.command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = self
            .spawner
            .spawn(&mut command)
            .map_err(|source| DispatchError::Spawn {
                command: self.config.display_command(),
                source,
            })?;

        tracing::info!(
            "Verifier spawned: pid={:?} payload_bytes={}",
            child.id(),
            payload.len()
        );

        // Both drains run on their own tasks so a chatty engine can never
        // block on a full pipe while we are still writing its input.
        let stdin = child.stdin.take();
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let drains = [stdout.abort_handle(), stderr.abort_handle()];

        let session = exchange(&mut child, stdin, payload, stdout, stderr);
        let completed = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, session).await {
                Ok(completed) => completed?,
                Err(_) => {
                    tracing::warn!(
                        "Verifier exceeded {}ms deadline, killing pid={:?}",
                        limit.as_millis(),
                        child.id()
                    );
                    terminate(&mut child, &drains).await;
                    return Err(DispatchError::Timeout(limit));
                }
            },
            None => session.await?,
        };

        tracing::info!(
            "Verifier finished: status={} stdout_bytes={} stderr_bytes={} elapsed_ms={}",
            completed.status,
            completed.stdout.len(),
            completed.stderr.len(),
            started.elapsed().as_millis()
        );

        classify(completed)
    }
}

/// Feed the payload, wait for exit, then collect both drained streams.
async fn exchange(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    payload: Vec<u8>,
    stdout: JoinHandle<io::Result<Vec<u8>>>,
    stderr: JoinHandle<io::Result<Vec<u8>>>,
) -> Result<Completed, DispatchError> {
    if let Some(mut stdin) = stdin {
        // An engine may exit without reading its input; its exit status decides.
        if let Err(e) = write_input(&mut stdin, &payload).await {
            tracing::warn!("Verifier stopped reading input early: {}", e);
        }
    }

    let status = child.wait().await?;
    let stdout = join_drain(stdout).await?;
    let stderr = join_drain(stderr).await?;

    Ok(Completed {
        status,
        stdout,
        stderr,
    })
}

/// Stop the drains, then kill and reap the child so its pid and pipes are released.
async fn terminate(child: &mut Child, drains: &[AbortHandle]) {
    for handle in drains {
        handle.abort();
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill timed out verifier: {}", e);
    }
}

/// Write the whole payload and close the pipe so the engine sees end-of-input.
async fn write_input(stdin: &mut ChildStdin, payload: &[u8]) -> io::Result<()> {
    stdin.write_all(payload).await?;
    stdin.shutdown().await
}

fn drain<R>(stream: Option<R>) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            stream.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn join_drain(handle: JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

fn classify(completed: Completed) -> Result<Value, DispatchError> {
    if !completed.status.success() {
        return Err(DispatchError::EngineFailure {
            code: completed.status.code(),
            stderr: String::from_utf8_lossy(&completed.stderr).into_owned(),
        });
    }

    serde_json::from_slice(&completed.stdout).map_err(|e| DispatchError::MalformedOutput {
        output: String::from_utf8_lossy(&completed.stdout).into_owned(),
        reason: e.to_string(),
    })
}
