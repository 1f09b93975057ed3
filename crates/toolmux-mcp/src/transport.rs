//! MCP Transport layer implementations

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::server::{McpHandler, McpServer};

/// Grace period for a child to exit on its own after stdin is closed
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, message: Value) -> io::Result<()>;
    /// Next message from the peer, `None` once the peer has gone away
    async fn receive(&mut self) -> io::Result<Option<Value>>;
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        (**self).send(message).await
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        (**self).receive().await
    }

    async fn close(&mut self) -> io::Result<()> {
        (**self).close().await
    }
}

/// Stdio transport for subprocess communication
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<BufReader<ChildStdout>>,
    /// Bytes of the line being read; kept across a cancelled `receive`
    pending: Vec<u8>,
}

impl StdioTransport {
    /// Spawn `command` with `args`, layering `env` over the inherited environment.
    ///
    /// The child is killed if the transport is dropped without `close`.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> io::Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("Failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("Failed to capture stdout"))?;

        // Providers log to stderr; forward it instead of letting the pipe fill up
        if let Some(stderr) = child.stderr.take() {
            let program = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "toolmux_mcp::stderr", program = %program, "{}", line);
                }
            });
        }

        Ok(Self {
            child,
            stdin: Some(stdin),
            reader: Some(BufReader::new(stdout)),
            pending: Vec::new(),
        })
    }

    /// OS process id, if the child is still running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Stdin not available"))?;

        let json = serde_json::to_string(&message)?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Reader not available"))?;

        // read_until appends what it has read before a cancellation, so a
        // timed out call leaves the partial line here for the next one
        loop {
            let n = reader.read_until(b'\n', &mut self.pending).await?;
            if n == 0 {
                self.pending.clear();
                return Ok(None);
            }

            let line = std::mem::take(&mut self.pending);
            if line.trim_ascii().is_empty() {
                continue;
            }

            let value: Value = serde_json::from_slice(&line)?;
            return Ok(Some(value));
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        // Closing stdin is the polite shutdown signal for stdio servers
        self.stdin.take();
        self.reader.take();

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => {
                status?;
                Ok(())
            }
            Err(_) => self.child.kill().await,
        }
    }
}

/// In-process transport that hands every message straight to an [`McpServer`]
pub struct LocalTransport<H: McpHandler> {
    server: Arc<McpServer<H>>,
    outbox: VecDeque<Value>,
    closed: bool,
}

impl<H: McpHandler> LocalTransport<H> {
    pub fn new(server: Arc<McpServer<H>>) -> Self {
        Self {
            server,
            outbox: VecDeque::new(),
            closed: false,
        }
    }

    pub fn from_handler(handler: H) -> Self {
        Self::new(Arc::new(McpServer::new(Arc::new(handler))))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl<H: McpHandler + 'static> Transport for LocalTransport<H> {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Transport closed"));
        }
        if let Some(reply) = self.server.handle_message(message).await {
            self.outbox.push_back(reply);
        }
        Ok(())
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.outbox.pop_front())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.outbox.clear();
        Ok(())
    }
}
