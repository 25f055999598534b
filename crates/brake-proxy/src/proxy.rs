use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use brake_runtime::Verdict;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::interceptor::{Disposition, Interceptor};
use crate::outcome::OutcomeObserver;

const CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound on waiting for queued notifications at session end
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How the proxied session ended
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyExit {
    /// Backend exited on its own with this code
    Exited(i32),
    /// A kill verdict ended the session
    Killed(Verdict),
}

impl ProxyExit {
    pub fn code(&self) -> i32 {
        match self {
            ProxyExit::Exited(code) => *code,
            ProxyExit::Killed(_) => 1,
        }
    }
}

enum UpstreamEnd {
    Closed,
    Killed(Verdict),
}

/// Stdio proxy between an upstream agent and a backend tool server.
/// Requests flow through the interceptor; responses are relayed untouched.
pub struct BrakeProxy {
    command: String,
    args: Vec<String>,
    interceptor: Interceptor,
    observer: Option<Arc<OutcomeObserver>>,
}

impl BrakeProxy {
    pub fn new(command: impl Into<String>, args: Vec<String>, interceptor: Interceptor) -> Self {
        Self {
            command: command.into(),
            args,
            interceptor,
            observer: None,
        }
    }

    /// Watch backend responses and report outcomes to the circuit breaker
    pub fn with_observer(mut self, observer: Arc<OutcomeObserver>) -> Self {
        self.interceptor = self.interceptor.with_observer(observer.clone());
        self.observer = Some(observer);
        self
    }

    /// Proxy the process's own stdin/stdout
    pub async fn run(self) -> Result<ProxyExit> {
        self.run_with_io(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Proxy between `input`/`output` and a freshly spawned backend.
    /// Returns once the backend exits or a kill verdict ends the session,
    /// after pending notifications have been delivered.
    pub async fn run_with_io<R, W>(mut self, input: R, output: W) -> Result<ProxyExit>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(
            cmd = %self.command,
            args = ?self.args,
            session_id = %self.interceptor.tracker().session_id(),
            "Spawning backend"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn backend: {}", self.command))?;

        let child_stdin = child.stdin.take().context("Failed to capture backend stdin")?;
        let child_stdout = child
            .stdout
            .take()
            .context("Failed to capture backend stdout")?;

        let dispatcher = self.interceptor.take_dispatcher();

        // Both pumps write upstream through a single writer task
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(512);
        let writer = tokio::spawn(write_upstream(output, out_rx));
        let backend = tokio::spawn(pump_backend(child_stdout, out_tx.clone(), self.observer));
        let mut upstream = tokio::spawn(pump_upstream(
            input,
            child_stdin,
            out_tx,
            self.interceptor,
        ));
        let mut upstream_done = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.context("Failed to wait for backend")?;
                }
                joined = &mut upstream, if !upstream_done => {
                    upstream_done = true;
                    match joined.context("Upstream pump failed")? {
                        UpstreamEnd::Closed => debug!("Upstream input closed"),
                        UpstreamEnd::Killed(verdict) => {
                            if let Err(e) = child.start_kill() {
                                warn!(error = %e, "Failed to kill backend");
                            }
                            let _ = child.wait().await;
                            backend.abort();
                            let _ = backend.await;
                            let _ = writer.await;
                            drain_notifications(dispatcher).await;
                            info!(policy = %verdict.policy_name, "Session killed");
                            return Ok(ProxyExit::Killed(verdict));
                        }
                    }
                }
            }
        };

        // Relay whatever the backend wrote before exiting
        let _ = backend.await;
        if !upstream_done {
            upstream.abort();
            let _ = upstream.await;
        }
        let _ = writer.await;
        drain_notifications(dispatcher).await;

        let code = status.code().unwrap_or(0);
        info!(code, "Backend exited");
        Ok(ProxyExit::Exited(code))
    }
}

/// Upstream -> backend. Splits input on newlines and adjudicates each line.
async fn pump_upstream<R>(
    input: R,
    mut backend: ChildStdin,
    out_tx: mpsc::Sender<Vec<u8>>,
    mut interceptor: Interceptor,
) -> UpstreamEnd
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(input);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read upstream input");
                break;
            }
        }

        let line = buf.strip_suffix(b"\n").unwrap_or(&buf);
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }

        let disposition = match std::str::from_utf8(line) {
            Ok(text) => interceptor.handle_line(text),
            Err(_) => Disposition::Forward,
        };

        match disposition {
            Disposition::Forward => {
                if let Err(e) = write_line(&mut backend, line).await {
                    warn!(error = %e, "Failed to write to backend stdin");
                    break;
                }
            }
            Disposition::Reject { response, .. } => {
                send_json(&out_tx, &response).await;
            }
            Disposition::Kill { response, verdict } => {
                send_json(&out_tx, &response).await;
                return UpstreamEnd::Killed(verdict);
            }
        }
    }

    UpstreamEnd::Closed
}

/// Backend -> upstream. Raw byte copy, or line by line when outcomes are observed.
async fn pump_backend(
    stdout: ChildStdout,
    out_tx: mpsc::Sender<Vec<u8>>,
    observer: Option<Arc<OutcomeObserver>>,
) {
    let Some(observer) = observer else {
        let mut stdout = stdout;
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if out_tx.send(chunk[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read backend stdout");
                    break;
                }
            }
        }
        return;
    };

    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                observer.observe_line(&buf);
                if out_tx.send(buf.clone()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read backend stdout");
                break;
            }
        }
    }
}

async fn write_upstream<W>(mut output: W, mut rx: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = output.write_all(&bytes).await {
            error!(error = %e, "Failed to write upstream");
            break;
        }
        if let Err(e) = output.flush().await {
            error!(error = %e, "Failed to flush upstream");
            break;
        }
    }
}

/// Wait for the event dispatcher; the interceptor owning its queue is gone
async fn drain_notifications(dispatcher: Option<JoinHandle<()>>) {
    let Some(dispatcher) = dispatcher else {
        return;
    };
    if tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, dispatcher)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = NOTIFY_DRAIN_TIMEOUT.as_secs(),
            "Notifications still pending at exit"
        );
    }
}

async fn write_line(backend: &mut ChildStdin, line: &[u8]) -> std::io::Result<()> {
    backend.write_all(line).await?;
    backend.write_all(b"\n").await?;
    backend.flush().await
}

async fn send_json(out_tx: &mpsc::Sender<Vec<u8>>, value: &Value) {
    let mut bytes = value.to_string().into_bytes();
    bytes.push(b'\n');
    if out_tx.send(bytes).await.is_err() {
        debug!("Upstream writer closed; dropping response");
    }
}
