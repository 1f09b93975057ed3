//! Audit trail of model prompts, responses and tool executions
//!
//! Recording never blocks the conversation loop and never fails it: the
//! JSONL sink hands records to a background writer and logs write errors.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{ModelRequest, ModelResponse};

/// Receives one record per model request, model response and tool call
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn record_prompt(&self, request: &ModelRequest<'_>);

    fn record_response(&self, response: &ModelResponse);

    fn record_tool_execution(&self, tool: &str, input: &Value, result: &str, success: bool);

    /// Wait until everything recorded so far has been written
    async fn flush(&self) {}
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record_prompt(&self, _request: &ModelRequest<'_>) {}

    fn record_response(&self, _response: &ModelResponse) {}

    fn record_tool_execution(&self, _tool: &str, _input: &Value, _result: &str, _success: bool) {}
}

enum Command {
    Write(Value),
    Flush(oneshot::Sender<()>),
}

/// Appends one JSON object per line to `<log_dir>/session_<timestamp>.jsonl`
pub struct JsonlAudit {
    session_id: Uuid,
    path: PathBuf,
    tx: mpsc::UnboundedSender<Command>,
}

impl JsonlAudit {
    /// Create the log file and start the writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(log_dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = log_dir.join(format!("session_{}.jsonl", timestamp));
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_records(tokio::fs::File::from_std(file), path.clone(), rx));

        let session_id = Uuid::new_v4();
        debug!(path = %path.display(), session_id = %session_id, "Audit log opened");

        Ok(Self { session_id, path, tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn emit(&self, kind: &str, mut record: Value) {
        if let Value::Object(map) = &mut record {
            map.insert("timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339()));
            map.insert("session_id".to_string(), json!(self.session_id.to_string()));
            map.insert("type".to_string(), json!(kind));
        }
        if self.tx.send(Command::Write(record)).is_err() {
            warn!("Audit writer has stopped; dropping record");
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAudit {
    fn record_prompt(&self, request: &ModelRequest<'_>) {
        self.emit(
            "prompt",
            json!({
                "model": request.params.model,
                "temperature": request.params.temperature,
                "max_tokens": request.params.max_tokens,
                "system_message": request.system,
                "messages": request.messages,
                "tools_count": request.tools.len(),
            }),
        );
    }

    fn record_response(&self, response: &ModelResponse) {
        self.emit(
            "response",
            json!({
                "stop_reason": response.stop_reason,
                "content": response.content,
                "usage": response.usage,
            }),
        );
    }

    fn record_tool_execution(&self, tool: &str, input: &Value, result: &str, success: bool) {
        self.emit(
            "tool_execution",
            json!({
                "tool_name": tool,
                "tool_input": input,
                "result": result,
                "success": success,
            }),
        );
    }

    async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn write_records(
    mut file: tokio::fs::File,
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Write(record) => {
                let mut line = record.to_string();
                line.push('\n');
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(path = %path.display(), error = %e, "Failed to write audit record");
                }
            }
            Command::Flush(done) => {
                if let Err(e) = file.flush().await {
                    warn!(path = %path.display(), error = %e, "Failed to flush audit log");
                }
                let _ = done.send(());
            }
        }
    }
}
