//! Capability server transport
//!
//! Newline-delimited JSON-RPC 2.0 over a spawned subprocess. A background
//! reader task demultiplexes the server's stdout: responses are routed to
//! pending requests by id, progress notifications to the sink registered
//! under their progress token, and server log notifications are re-emitted
//! through tracing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CapabilityServerConfig;
use crate::domain::{ProgressEvent, ProgressSink};
use crate::error::{CapabilityError, CapabilityResult};

/// JSON-RPC request frame
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC error object
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[allow(dead_code)]
    data: Option<Value>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CapabilityResult<Value>>>>>;
type ProgressMap = Arc<Mutex<HashMap<String, ProgressSink>>>;

/// Duplex byte-stream connection to one capability server.
///
/// Seam for test doubles; [`StdioTransport`] is the subprocess-backed
/// implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and await its response
    async fn request(&self, method: &str, params: Option<Value>) -> CapabilityResult<Value>;

    /// Send a one-way notification
    async fn notify(&self, method: &str, params: Option<Value>) -> CapabilityResult<()>;

    /// Route progress notifications carrying `token` to `sink`
    fn register_progress(&self, token: &str, sink: ProgressSink);

    /// Stop routing progress notifications for `token`
    fn unregister_progress(&self, token: &str);

    /// Tear down the connection. Idempotent; never fails.
    async fn close(&self);
}

/// Subprocess transport speaking newline-delimited JSON-RPC over stdio
pub struct StdioTransport {
    server_name: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    pending: PendingMap,
    progress: ProgressMap,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the server subprocess and start the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &CapabilityServerConfig) -> CapabilityResult<Self> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            CapabilityError::Unreachable(format!(
                "Failed to spawn capability server '{}' ({}): {}",
                config.name, config.command, e
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            CapabilityError::Unreachable(format!("No stdin pipe for server '{}'", config.name))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            CapabilityError::Unreachable(format!("No stdout pipe for server '{}'", config.name))
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let progress: ProgressMap = Arc::new(Mutex::new(HashMap::new()));

        let reader = tokio::spawn(read_loop(
            config.name.clone(),
            stdout,
            pending.clone(),
            progress.clone(),
        ));

        info!("Spawned capability server '{}'", config.name);

        Ok(Self {
            server_name: config.name.clone(),
            stdin: tokio::sync::Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            reader: Mutex::new(Some(reader)),
            pending,
            progress,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    async fn write_frame(&self, frame: &JsonRpcRequest<'_>) -> CapabilityResult<()> {
        let mut line = serde_json::to_string(frame)
            .map_err(|e| CapabilityError::Protocol(format!("Failed to encode frame: {}", e)))?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(|e| {
            CapabilityError::Unreachable(format!(
                "Failed to write to server '{}': {}",
                self.server_name, e
            ))
        })?;
        stdin.flush().await.map_err(|e| {
            CapabilityError::Unreachable(format!(
                "Failed to flush to server '{}': {}",
                self.server_name, e
            ))
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> CapabilityResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CapabilityError::Unreachable(format!(
                "Connection to server '{}' is closed",
                self.server_name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }

        let frame = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };
        if let Err(e) = self.write_frame(&frame).await {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
            return Err(e);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CapabilityError::Unreachable(format!(
                "Server '{}' closed before responding to '{}'",
                self.server_name, method
            ))),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> CapabilityResult<()> {
        let frame = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        };
        self.write_frame(&frame).await
    }

    fn register_progress(&self, token: &str, sink: ProgressSink) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.insert(token.to_string(), sink);
        }
    }

    fn unregister_progress(&self, token: &str) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.remove(token);
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let reader = self.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(handle) = reader {
            handle.abort();
        }

        let child = self.child.lock().ok().and_then(|mut c| c.take());
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                debug!("Kill for server '{}' failed: {}", self.server_name, e);
            }
        }

        fail_pending(&self.pending, &self.server_name);
        info!("Released capability server '{}'", self.server_name);
    }
}

/// Fail every in-flight request with an unreachable error
fn fail_pending(pending: &PendingMap, server_name: &str) {
    let drained: Vec<_> = match pending.lock() {
        Ok(mut pending) => pending.drain().collect(),
        Err(_) => return,
    };
    for (_, tx) in drained {
        let _ = tx.send(Err(CapabilityError::Unreachable(format!(
            "Server '{}' closed the connection",
            server_name
        ))));
    }
}

async fn read_loop(
    server_name: String,
    stdout: ChildStdout,
    pending: PendingMap,
    progress: ProgressMap,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatch_frame(&server_name, &line, &pending, &progress);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Read error from server '{}': {}", server_name, e);
                break;
            }
        }
    }
    fail_pending(&pending, &server_name);
}

/// Route one inbound frame: a response to its pending request, a progress
/// notification to its registered sink, a log notification to tracing.
fn dispatch_frame(server_name: &str, line: &str, pending: &PendingMap, progress: &ProgressMap) {
    let frame: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("Malformed frame from server '{}': {}", server_name, e);
            return;
        }
    };

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let outcome = match frame.get("error") {
            Some(raw) => Err(decode_rpc_error(raw)),
            None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
        };
        let sender = pending.lock().ok().and_then(|mut p| p.remove(&id));
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(
                "Response with unknown id {} from server '{}'",
                id, server_name
            ),
        }
        return;
    }

    match frame.get("method").and_then(Value::as_str) {
        Some("notifications/progress") => {
            let params = frame.get("params").cloned().unwrap_or(Value::Null);
            route_progress(server_name, &params, progress);
        }
        Some("notifications/message") => {
            let params = frame.get("params").cloned().unwrap_or(Value::Null);
            log_server_message(server_name, &params);
        }
        Some(other) => debug!("Ignoring '{}' from server '{}'", other, server_name),
        None => debug!("Frame without id or method from server '{}'", server_name),
    }
}

fn route_progress(server_name: &str, params: &Value, progress: &ProgressMap) {
    let token = match params.get("progressToken") {
        Some(Value::String(token)) => token.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => {
            debug!("Progress without token from server '{}'", server_name);
            return;
        }
    };
    let event = ProgressEvent {
        progress: params
            .get("progress")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        total: params.get("total").and_then(Value::as_f64),
        message: params
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    let sink = progress
        .lock()
        .ok()
        .and_then(|map| map.get(&token).cloned());
    if let Some(sink) = sink {
        sink(event);
    }
}

fn log_server_message(server_name: &str, params: &Value) {
    let level = params
        .get("level")
        .and_then(Value::as_str)
        .unwrap_or("info");
    let text = params
        .get("data")
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .or_else(|| {
            params
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();

    match level {
        "debug" => debug!("[{}] {}", server_name, text),
        "warning" | "warn" => warn!("[{}] {}", server_name, text),
        "error" | "critical" | "alert" | "emergency" => error!("[{}] {}", server_name, text),
        _ => info!("[{}] {}", server_name, text),
    }
}

fn decode_rpc_error(raw: &Value) -> CapabilityError {
    match serde_json::from_value::<JsonRpcError>(raw.clone()) {
        // Method/param errors are how servers report unknown names
        Ok(rpc) if rpc.code == -32601 || rpc.code == -32602 => {
            CapabilityError::NotFound(rpc.message)
        }
        Ok(rpc) => CapabilityError::Protocol(format!("[{}] {}", rpc.code, rpc.message)),
        Err(e) => CapabilityError::Protocol(format!("Malformed error object: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn maps() -> (PendingMap, ProgressMap) {
        (
            Arc::new(Mutex::new(HashMap::new())),
            Arc::new(Mutex::new(HashMap::new())),
        )
    }

    #[test]
    fn test_response_routed_to_pending_request() {
        let (pending, progress) = maps();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(7, tx);

        dispatch_frame(
            "test",
            r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#,
            &pending,
            &progress,
        );

        let outcome = rx.try_recv().unwrap().unwrap();
        assert_eq!(outcome, json!({"ok": true}));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_method_not_found_maps_to_not_found() {
        let (pending, progress) = maps();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(1, tx);

        dispatch_frame(
            "test",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"unknown method"}}"#,
            &pending,
            &progress,
        );

        match rx.try_recv().unwrap() {
            Err(CapabilityError::NotFound(message)) => assert_eq!(message, "unknown method"),
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_other_rpc_errors_map_to_protocol() {
        let (pending, progress) = maps();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(1, tx);

        dispatch_frame(
            "test",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"server exploded"}}"#,
            &pending,
            &progress,
        );

        match rx.try_recv().unwrap() {
            Err(CapabilityError::Protocol(message)) => {
                assert!(message.contains("-32000"));
                assert!(message.contains("server exploded"));
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_progress_notification_reaches_registered_sink() {
        let (pending, progress) = maps();
        let received: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_events = received.clone();
        progress.lock().unwrap().insert(
            "tok-1".to_string(),
            Arc::new(move |event| sink_events.lock().unwrap().push(event)),
        );

        dispatch_frame(
            "test",
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":"tok-1","progress":2.0,"total":5.0,"message":"Step 2/5"}}"#,
            &pending,
            &progress,
        );
        // Unregistered token is dropped on the floor
        dispatch_frame(
            "test",
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":"tok-2","progress":1.0}}"#,
            &pending,
            &progress,
        );

        let events = received.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].progress, 2.0);
        assert_eq!(events[0].total, Some(5.0));
        assert_eq!(events[0].message.as_deref(), Some("Step 2/5"));
    }

    #[test]
    fn test_malformed_frame_is_ignored() {
        let (pending, progress) = maps();
        dispatch_frame("test", "not json at all", &pending, &progress);
        dispatch_frame("test", r#"{"jsonrpc":"2.0"}"#, &pending, &progress);
    }
}
