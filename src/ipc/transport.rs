//! The framed transport itself: child process lifecycle, wire encoding, and
//! request/response correlation.
//!
//! Modelled on the teacher's `McpClient` (spawn a child, pipe its stdio,
//! correlate requests by id, timeout each call) but adapted from
//! line-delimited JSON-RPC to the binary dual-length frame §4.B specifies,
//! and from an `Arc<Mutex<ChildStdin>>` to an explicit single-writer task so
//! concurrent callers' writes never interleave mid-segment.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::DictationError;

/// Response JSON longer than this is a protocol error; the frame is
/// discarded but the stream stays aligned (its length prefix is honoured).
pub const MAX_JSON_LEN: u32 = 8 * 1024 * 1024;

/// Bounded ring of the child's most recent stderr lines, kept for
/// diagnostics when a request or the process itself fails.
const STDERR_TAIL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, DictationError>>>>>;

struct WriteJob {
    json: Vec<u8>,
    binary: Vec<u8>,
    /// Reports a write-side failure back to the caller that queued this
    /// job; a successful write reports nothing (the response, if any,
    /// arrives through `pending` instead).
    failed: oneshot::Sender<DictationError>,
}

struct Inner {
    child: Arc<Mutex<Child>>,
    write_tx: mpsc::Sender<WriteJob>,
    pending: PendingMap,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// A started-or-not framed IPC connection to a single child process.
///
/// `start`/`stop` are idempotent; `request` may be called concurrently from
/// many tasks and each gets its own response regardless of completion
/// order, while the three wire segments of any two requests never
/// interleave.
pub struct FramedTransport {
    /// A read lock is held for the duration of one `request()` call so
    /// concurrent requests never block each other; `start`/`stop` take the
    /// write lock since they replace the connection wholesale.
    inner: RwLock<Option<Inner>>,
}

impl FramedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Spawn the child process, wiring its stdout into the frame parser and
    /// its stderr into the diagnostic tail buffer. A no-op if already
    /// started.
    pub async fn start(&self, program: &str, args: &[String]) -> Result<(), DictationError> {
        let mut guard = self.inner.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DictationError::IpcProtocol("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DictationError::IpcProtocol("child has no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DictationError::IpcProtocol("child has no stderr".into()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_CAPACITY)));
        let child = Arc::new(Mutex::new(child));

        let (write_tx, write_rx) = mpsc::channel(64);
        tokio::spawn(writer_loop(stdin, write_rx));

        let reader_task = tokio::spawn(reader_loop(
            BufReader::new(stdout),
            pending.clone(),
            child.clone(),
        ));
        let stderr_task = tokio::spawn(stderr_loop(stderr, stderr_tail.clone()));

        *guard = Some(Inner {
            child,
            write_tx,
            pending,
            stderr_tail,
            reader_task,
            stderr_task,
        });
        Ok(())
    }

    /// Issue a request and await its response, or a timeout/protocol error.
    ///
    /// Holds only a shared read lock on the connection, so any number of
    /// requests can be outstanding at once; only `start`/`stop` need
    /// exclusive access.
    pub async fn request(
        &self,
        action: &str,
        mut params: Value,
        binary: Vec<u8>,
        timeout: Duration,
    ) -> Result<Value, DictationError> {
        let guard = self.inner.read().await;
        let inner = guard
            .as_ref()
            .ok_or_else(|| DictationError::IpcProtocol("transport not started".into()))?;

        let id = Uuid::new_v4().to_string();
        if let Value::Object(map) = &mut params {
            map.insert("id".to_string(), Value::String(id.clone()));
            map.insert("action".to_string(), Value::String(action.to_string()));
        } else {
            return Err(DictationError::IpcProtocol(
                "request params must be a JSON object".into(),
            ));
        }
        let json = serde_json::to_vec(&params)?;

        let (response_tx, response_rx) = oneshot::channel();
        inner.pending.lock().await.insert(id.clone(), response_tx);

        let (failed_tx, failed_rx) = oneshot::channel();
        let job = WriteJob {
            json,
            binary,
            failed: failed_tx,
        };
        if inner.write_tx.send(job).await.is_err() {
            inner.pending.lock().await.remove(&id);
            return Err(DictationError::AsrRequest("writer task is gone".into()));
        }

        // `failed_rx` resolves once the writer task has either reported a
        // write-side error or finished the write and dropped the sender;
        // only in the error case do we short-circuit before waiting for a
        // response that will never come.
        if let Ok(err) = failed_rx.await {
            inner.pending.lock().await.remove(&id);
            return Err(err);
        }
        await_response(&inner.pending, response_rx, timeout, &id).await
    }

    /// Send a graceful termination signal, wait up to `grace`, then
    /// escalate to a forceful kill. A no-op if not started.
    pub async fn stop(&self, grace: Duration) -> Result<(), DictationError> {
        let mut guard = self.inner.write().await;
        let Some(inner) = guard.take() else {
            return Ok(());
        };

        // Dropping our sender lets the writer task drain and exit once its
        // queue is empty, which closes the child's stdin — many backends
        // treat EOF on stdin as the graceful-shutdown signal.
        drop(inner.write_tx);

        let wait_result = {
            let mut child = inner.child.lock().await;
            tokio::time::timeout(grace, child.wait()).await
        };

        if wait_result.is_err() {
            let mut child = inner.child.lock().await;
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        inner.reader_task.abort();
        inner.stderr_task.abort();
        Ok(())
    }

    /// The most recent stderr lines from the child, oldest first. Empty if
    /// not started.
    pub async fn stderr_tail(&self) -> Vec<String> {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(inner) => inner.stderr_tail.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }
}

/// Waits for a response, removing the pending entry on timeout so a late
/// answer from the child doesn't try to send into a dropped receiver.
async fn await_response(
    pending: &PendingMap,
    rx: oneshot::Receiver<Result<Value, DictationError>>,
    timeout: Duration,
    id: &str,
) -> Result<Value, DictationError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(DictationError::AsrRequest(format!(
            "response channel dropped for request {id}"
        ))),
        Err(_) => {
            pending.lock().await.remove(id);
            Err(DictationError::AsrTimeout(timeout.as_millis() as u64))
        }
    }
}

impl Default for FramedTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the stdin half exclusively; every write goes through here so two
/// callers' header/json/binary segments can never interleave.
async fn writer_loop(
    mut stdin: tokio::process::ChildStdin,
    mut jobs: mpsc::Receiver<WriteJob>,
) {
    while let Some(job) = jobs.recv().await {
        if let Err(err) = write_frame(&mut stdin, &job.json, &job.binary).await {
            let _ = job.failed.send(DictationError::AsrRequest(err.to_string()));
        }
        // Success case: the job's `failed` sender is simply dropped here,
        // which tells the waiting caller the write went through and it can
        // move on to awaiting the real response.
    }
}

async fn write_frame(
    stdin: &mut tokio::process::ChildStdin,
    json: &[u8],
    binary: &[u8],
) -> Result<(), std::io::Error> {
    stdin.write_u32_le(json.len() as u32).await?;
    stdin.write_u32_le(binary.len() as u32).await?;
    stdin.write_all(json).await?;
    stdin.write_all(binary).await?;
    stdin.flush().await
}

/// Parses response frames off the child's stdout and resolves the matching
/// pending request. On EOF or a read error, every still-outstanding
/// request is failed with the process's exit status.
async fn reader_loop(
    mut stdout: BufReader<ChildStdout>,
    pending: PendingMap,
    child: Arc<Mutex<Child>>,
) {
    loop {
        match read_response_frame(&mut stdout).await {
            Ok(Some(value)) => {
                let Some(id) = value.get("id").and_then(Value::as_str) else {
                    tracing::warn!("ipc: response frame carried no id, discarding");
                    continue;
                };
                if let Some(tx) = pending.lock().await.remove(id) {
                    let _ = tx.send(parse_outcome(value));
                }
            }
            Ok(None) => {
                // Oversized frame: already consumed and discarded on the
                // wire, stream stays aligned. Just keep going.
                tracing::warn!("ipc: discarded oversized response frame");
            }
            Err(_) => break,
        }
    }

    let (code, signal) = {
        let mut child = child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => (status.code(), exit_signal(&status)),
            _ => (None, None),
        }
    };

    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(DictationError::AsrWorkerExited { code, signal }));
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Reads one response frame. `Ok(None)` means a frame was seen but
/// discarded for exceeding [`MAX_JSON_LEN`]; the stream remains aligned
/// because the (trusted) length prefix told us exactly how many bytes to
/// skip.
async fn read_response_frame(
    stdout: &mut BufReader<ChildStdout>,
) -> std::io::Result<Option<Value>> {
    let json_len = stdout.read_u32_le().await?;
    if json_len > MAX_JSON_LEN {
        let mut discard = vec![0u8; json_len as usize];
        stdout.read_exact(&mut discard).await?;
        return Ok(None);
    }
    let mut buf = vec![0u8; json_len as usize];
    stdout.read_exact(&mut buf).await?;
    match serde_json::from_slice(&buf) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            tracing::warn!(%err, "ipc: response frame was not valid json, discarding");
            Ok(None)
        }
    }
}

fn parse_outcome(value: Value) -> Result<Value, DictationError> {
    let ok = value.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if ok {
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    } else {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        Err(DictationError::AsrRequest(message))
    }
}

async fn stderr_loop(stderr: tokio::process::ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut reader = tokio::io::BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let mut tail = tail.lock().await;
                if tail.len() == STDERR_TAIL_CAPACITY {
                    tail.pop_front();
                }
                tail.push_back(line.trim_end().to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_outcome_ok_extracts_result() {
        let value = serde_json::json!({"id": "1", "ok": true, "result": {"text": "hi"}});
        let result = parse_outcome(value).unwrap();
        assert_eq!(result["text"], "hi");
    }

    #[test]
    fn parse_outcome_err_extracts_message() {
        let value = serde_json::json!({"id": "1", "ok": false, "error": "boom"});
        let err = parse_outcome(value).unwrap_err();
        assert!(matches!(err, DictationError::AsrRequest(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn start_is_idempotent_on_unstarted_transport_stop_is_a_noop() {
        let transport = FramedTransport::new();
        // No process has been spawned; stop() on a never-started transport
        // must not panic or block.
        transport.stop(Duration::from_millis(10)).await.unwrap();
        assert!(transport.stderr_tail().await.is_empty());
    }

    #[tokio::test]
    async fn request_before_start_is_a_protocol_error() {
        let transport = FramedTransport::new();
        let err = transport
            .request("warmup", serde_json::json!({}), Vec::new(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DictationError::IpcProtocol(_)));
    }
}
