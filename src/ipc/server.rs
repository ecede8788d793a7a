//! Local IPC server for `procwarden-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them to the instance registry.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "list"}
//! {"command": "status", "id": "web"}
//! {"command": "restart", "id": "web"}
//! {"command": "console", "id": "web", "lines": 50}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: instance web"}
//! ```
//!
//! Lifecycle commands can block for the full stop grace period plus the
//! restart cooldown. Each connection runs on its own task, so a slow
//! command only holds up the client that issued it.

use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::orchestrator::InstanceRegistry;
use crate::{AppError, Result};

/// Default console lines returned when a request omits `lines`.
pub const DEFAULT_CONSOLE_LINES: usize = 100;

/// Inbound IPC request from `procwarden-ctl`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Target instance identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Console lines to return (for `console`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
}

impl IpcRequest {
    /// Request targeting one instance.
    #[must_use]
    pub fn for_instance(command: &str, id: &str) -> Self {
        Self {
            command: command.to_owned(),
            id: Some(id.to_owned()),
            lines: None,
        }
    }
}

/// Outbound IPC response to `procwarden-ctl`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn from_result(id: &str, action: &str, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::success(serde_json::json!({ "id": id, "action": action })),
            Err(err) => Self::error(err.to_string()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    ipc_name: &str,
    registry: Arc<InstanceRegistry>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = ipc_name.to_owned();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let registry = Arc::clone(&registry);
                                tokio::spawn(handle_connection(stream, registry));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    registry: Arc<InstanceRegistry>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &registry).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the registry.
pub async fn dispatch_command(request: &IpcRequest, registry: &InstanceRegistry) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async {
        if request.command == "list" {
            return handle_list(registry);
        }

        let Some(ref id) = request.id else {
            return IpcResponse::error("missing required 'id' field");
        };

        match request.command.as_str() {
            "status" => match registry.status(id) {
                Ok(status) => match serde_json::to_value(status) {
                    Ok(value) => IpcResponse::success(value),
                    Err(err) => IpcResponse::error(format!("failed to encode status: {err}")),
                },
                Err(err) => IpcResponse::error(err.to_string()),
            },
            "console" => {
                let lines = request.lines.unwrap_or(DEFAULT_CONSOLE_LINES);
                match registry.console(id, lines) {
                    Ok(output) => {
                        IpcResponse::success(serde_json::json!({ "id": id, "lines": output }))
                    }
                    Err(err) => IpcResponse::error(err.to_string()),
                }
            }
            "start" => IpcResponse::from_result(id, "start", registry.start(id).await),
            "stop" => IpcResponse::from_result(id, "stop", registry.stop(id).await),
            "restart" => IpcResponse::from_result(id, "restart", registry.restart(id).await),
            "kill" => IpcResponse::from_result(id, "kill", registry.kill(id).await),
            "stop_permanently" => IpcResponse::from_result(
                id,
                "stop_permanently",
                registry.stop_permanently(id).await,
            ),
            "resume" => IpcResponse::from_result(id, "resume", registry.resume(id)),
            other => {
                warn!(command = other, "unknown ipc command");
                IpcResponse::error(format!("unknown command: {other}"))
            }
        }
    }
    .instrument(span)
    .await
}

/// List every instance with its status.
fn handle_list(registry: &InstanceRegistry) -> IpcResponse {
    match serde_json::to_value(registry.statuses()) {
        Ok(instances) => IpcResponse::success(serde_json::json!({
            "total": registry.total_count(),
            "running": registry.running_count(),
            "instances": instances,
        })),
        Err(err) => IpcResponse::error(format!("failed to encode statuses: {err}")),
    }
}
