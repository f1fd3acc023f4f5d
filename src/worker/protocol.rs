//! Wire protocol for worker communication.
//!
//! The worker speaks NDJSON (newline-delimited JSON) over stdin/stdout.
//! One request object per line goes out:
//!
//! ```text
//! {"requestId": 7, "command": "query", "question": "...", ...}
//! ```
//!
//! One object per line comes back, either a status message with no
//! `requestId` (the startup `{"status": "ready"}` signal) or a correlated
//! response:
//!
//! ```text
//! {"requestId": 7, "success": true, "answer": "...", ...}
//! ```
//!
//! This module is pure framing and parsing; it owns no I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{WorkerError, WorkerResult};

/// Maximum bytes the read buffer may hold without a line terminator.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Status value the worker emits once its initialization succeeded.
pub const STATUS_READY: &str = "ready";

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the worker. Command parameters are flattened
/// into the envelope, matching what the worker expects on each line.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Correlation id for matching the eventual response.
    #[serde(rename = "requestId")]
    pub request_id: u64,
    /// Command name (e.g., "query").
    pub command: String,
    /// Command-specific fields.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl RequestEnvelope {
    /// Encode the request as a single newline-terminated line.
    pub fn encode(&self) -> WorkerResult<String> {
        let mut line = serde_json::to_string(self).map_err(WorkerError::Serialize)?;
        line.push('\n');
        Ok(line)
    }
}

/// Response envelope received from the worker. Result or error fields
/// arrive flattened next to `success`, not nested.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    /// Request id this response corresponds to.
    #[serde(rename = "requestId")]
    pub request_id: u64,
    /// Whether the command succeeded.
    #[serde(default)]
    pub success: bool,
    /// Error message (present when success = false).
    #[serde(default)]
    pub error: Option<String>,
    /// Remaining result fields (answer, sources, metadata, ...).
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ResponseEnvelope {
    /// Reassemble the full result object as the caller should see it.
    pub fn into_result(self) -> Value {
        let mut body = self.body;
        body.insert("success".to_string(), Value::Bool(self.success));
        if let Some(error) = self.error {
            body.insert("error".to_string(), Value::String(error));
        }
        Value::Object(body)
    }
}

/// Uncorrelated status message from the worker. Sent once after startup,
/// either `{"status": "ready"}` or `{"status": "error", "message": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusMessage {
    /// Whether this message signals the worker is accepting commands.
    pub fn is_ready(&self) -> bool {
        self.status == STATUS_READY
    }
}

/// A decoded inbound line.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Uncorrelated status message (readiness signal).
    Status(StatusMessage),
    /// Correlated response to a dispatched request.
    Response(ResponseEnvelope),
}

/// Decode one complete line from the worker.
///
/// A line carrying a `requestId` is a response; a line carrying `status`
/// is a status message. Anything else (including invalid JSON) is a
/// protocol error the caller must log and discard, never a crash.
pub fn decode_line(line: &str) -> WorkerResult<Inbound> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| WorkerError::Protocol(format!("invalid JSON line: {}", e)))?;

    let Value::Object(ref obj) = value else {
        return Err(WorkerError::Protocol(format!(
            "expected a JSON object, got: {}",
            line.trim()
        )));
    };

    if obj.contains_key("requestId") {
        let envelope: ResponseEnvelope = serde_json::from_value(value)
            .map_err(|e| WorkerError::Protocol(format!("malformed response envelope: {}", e)))?;
        Ok(Inbound::Response(envelope))
    } else if obj.contains_key("status") {
        let status: StatusMessage = serde_json::from_value(value)
            .map_err(|e| WorkerError::Protocol(format!("malformed status message: {}", e)))?;
        Ok(Inbound::Status(status))
    } else {
        Err(WorkerError::Protocol(format!(
            "line carries neither requestId nor status: {}",
            line.trim()
        )))
    }
}

// ============================================================================
// Output Framing
// ============================================================================

/// Accumulates raw bytes from the worker's stdout and yields complete lines.
///
/// The trailing partial line is retained across reads. The retained tail is
/// capped: a worker that floods output without ever terminating a line gets
/// its buffer discarded and the overflow reported as a protocol error.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    cap: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LINE_BYTES)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
        }
    }

    /// Append a chunk of raw bytes.
    ///
    /// Returns a protocol error (and discards the buffered content) if the
    /// unterminated tail exceeds the cap.
    pub fn push(&mut self, bytes: &[u8]) -> WorkerResult<()> {
        self.buf.extend_from_slice(bytes);

        let tail_len = match self.buf.iter().rposition(|&b| b == b'\n') {
            Some(pos) => self.buf.len() - pos - 1,
            None => self.buf.len(),
        };
        if tail_len > self.cap {
            self.buf.clear();
            return Err(WorkerError::Protocol(format!(
                "worker output exceeded {} bytes without a line terminator",
                self.cap
            )));
        }
        Ok(())
    }

    /// Pop the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Number of buffered bytes awaiting a terminator.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Command Parameters
// ============================================================================

/// Worker command names.
pub mod commands {
    pub const STORE: &str = "store";
    pub const QUERY: &str = "query";
    pub const DELETE: &str = "delete";
    pub const CLEAR_ALL: &str = "clear_all";
}

/// Default number of matches the worker is asked to consider per query.
pub const DEFAULT_TOP_K: u32 = 8;

/// Parameters for the `store` command.
#[derive(Debug, Clone, Serialize)]
pub struct StoreParams {
    /// Path of the source file, kept as vector metadata.
    pub file_path: String,
    /// Extracted text to embed and store.
    pub text: String,
    /// Document the text belongs to.
    pub document_id: String,
}

/// Parameters for the `query` command.
#[derive(Debug, Clone, Serialize)]
pub struct QueryParams {
    /// Free-text question.
    pub question: String,
    /// Document to search, or `None` to search everything.
    pub document_id: Option<String>,
    /// Prior conversation turns, passed through to the worker.
    pub conversation_history: Vec<Value>,
    /// Result-count hint.
    pub top_k: u32,
}

impl QueryParams {
    pub fn new(question: impl Into<String>, document_id: Option<String>) -> Self {
        Self {
            question: question.into(),
            document_id,
            conversation_history: Vec::new(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Parameters for the `delete` command.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteParams {
    /// Document whose vectors should be removed.
    pub document_id: String,
}

/// Serialize typed command parameters into the flattened envelope form.
pub fn params_object<P: Serialize>(params: &P) -> WorkerResult<Map<String, Value>> {
    match serde_json::to_value(params).map_err(WorkerError::Serialize)? {
        Value::Object(map) => Ok(map),
        other => Err(WorkerError::Protocol(format!(
            "command parameters must serialize to an object, got {}",
            other
        ))),
    }
}
