//! Streaming action executors
//!
//! `Code` and `FixError` share one pipeline that differs only by endpoint:
//!
//! ```text
//! ActionState ──POST──► backend /api/code | /api/fixErrors
//!                          │
//!                 chunked NDJSON body
//!                          │
//!        ┌─────────────────▼─────────────────┐
//!        │ read unit → should_abort()? → yield│ (repeat)
//!        └─────────────────┬─────────────────┘
//!                          │ (the HTTP backend also checks abort
//!                          │  after every network read)
//!                          │ read error
//!                          ▼
//!          one chunk {"error_occurred":true,...}, then end
//! ```
//!
//! Errors never escape as `Err`: they become the final chunk so the next
//! decision can see them and offer `FixError`.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;

use crate::config::ModelInformation;

use super::masker::ERROR_OCCURRED_MARKER;
use super::state::{AbortSignal, ActionState, ActionType};

/// Raw units read from the backend, one per NDJSON line
pub type UnitStream = Pin<Box<dyn Stream<Item = Result<String, ExecutionError>> + Send>>;

/// Chunks surfaced to the orchestrator; finite and not restartable
pub type ExecutionStream = Pin<Box<dyn Stream<Item = OutputChunk> + Send>>;

/// One unit of executor output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputChunk {
    pub action: ActionType,
    pub content: String,
    /// Set when this unit reports a failed execution
    pub error_occurred: bool,
}

impl OutputChunk {
    pub fn output(action: ActionType, content: impl Into<String>) -> Self {
        let content = content.into();
        let error_occurred = content.contains(ERROR_OCCURRED_MARKER);
        Self {
            action,
            content,
            error_occurred,
        }
    }

    /// Terminal chunk carrying the error-occurred marker
    pub fn error(action: ActionType, message: impl Into<String>) -> Self {
        let content = serde_json::json!({
            "error_occurred": true,
            "message": message.into(),
        })
        .to_string();
        Self {
            action,
            content,
            error_occurred: true,
        }
    }
}

/// Error type for execution backend operations
#[derive(Debug)]
pub enum ExecutionError {
    Request(reqwest::Error),
    Status { code: u16, body: String },
    Decode(String),
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::Request(e) => write!(f, "Request error: {}", e),
            ExecutionError::Status { code, body } => {
                write!(f, "Execution backend returned {}: {}", code, body)
            }
            ExecutionError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<reqwest::Error> for ExecutionError {
    fn from(e: reqwest::Error) -> Self {
        ExecutionError::Request(e)
    }
}

/// Backend path for each executable action
pub fn endpoint_path(action: ActionType) -> Option<&'static str> {
    match action {
        ActionType::Code => Some("/api/code"),
        ActionType::FixError => Some("/api/fixErrors"),
        ActionType::Stop => None,
    }
}

/// Request body sent to the execution backend
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub action_state: ActionState,
    pub model_information: ModelInformation,
    pub unique_id: String,
    pub auto_execute_generated_code: bool,
}

/// Where executor requests go
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Open a streaming request; the stream yields units as they arrive
    ///
    /// Implementations check `abort` after every network read and end the
    /// stream as soon as it is set, without reading further input.
    async fn open(
        &self,
        url: &str,
        request: &ExecutionRequest,
        abort: &AbortSignal,
    ) -> Result<UnitStream, ExecutionError>;
}

/// Splits a chunked byte stream into lines
///
/// Network reads do not respect line boundaries, so partial lines are held
/// until their newline arrives. Bytes are buffered raw so multi-byte
/// characters split across reads decode correctly.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(text) = Self::decode_line(&line) {
                lines.push(text);
            }
        }
        lines
    }

    /// Flush a trailing line that never got its newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(&rest)
    }

    fn decode_line(bytes: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_end_matches(|c| c == '\n' || c == '\r');
        if text.trim().is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

/// Execution backend reached over HTTP
#[derive(Clone)]
pub struct HttpExecutionBackend {
    client: reqwest::Client,
}

impl HttpExecutionBackend {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpExecutionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for HttpExecutionBackend {
    async fn open(
        &self,
        url: &str,
        request: &ExecutionRequest,
        abort: &AbortSignal,
    ) -> Result<UnitStream, ExecutionError> {
        let response = self
            .client
            .post(url)
            .header("X-Trace-Id", &request.unique_id)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutionError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let abort = abort.clone();
        let mut bytes_stream = response.bytes_stream();
        let units = async_stream::stream! {
            let mut decoder = NdjsonDecoder::new();
            while let Some(read) = bytes_stream.next().await {
                // a single line may span many reads
                if abort.should_abort() {
                    tracing::debug!("Abort observed mid-read, dropping response");
                    return;
                }
                match read {
                    Ok(bytes) => {
                        for line in decoder.push(&bytes) {
                            yield Ok(line);
                        }
                    }
                    Err(e) => {
                        // partial line read before the failure
                        if let Some(line) = decoder.finish() {
                            yield Ok(line);
                        }
                        yield Err(ExecutionError::Request(e));
                        return;
                    }
                }
            }
            if let Some(line) = decoder.finish() {
                yield Ok(line);
            }
        };

        Ok(Box::pin(units))
    }
}

/// Shared pipeline behind every executable action
///
/// Checks `abort` before opening, before each read and before each yield.
/// Once an abort is seen nothing else is yielded, not even an error.
pub fn shared_action(
    backend: Arc<dyn ExecutionBackend>,
    action: ActionType,
    url: String,
    request: ExecutionRequest,
    abort: AbortSignal,
) -> ExecutionStream {
    Box::pin(async_stream::stream! {
        if abort.should_abort() {
            return;
        }

        let mut units = match backend.open(&url, &request, &abort).await {
            Ok(units) => units,
            Err(e) => {
                tracing::warn!(action = %action, url = %url, error = %e, "Execution request failed");
                if !abort.should_abort() {
                    yield OutputChunk::error(action, e.to_string());
                }
                return;
            }
        };

        loop {
            if abort.should_abort() {
                break;
            }
            let next = units.next().await;
            if abort.should_abort() {
                break;
            }
            match next {
                Some(Ok(unit)) => {
                    yield OutputChunk::output(action, unit);
                }
                Some(Err(e)) => {
                    tracing::warn!(action = %action, error = %e, "Execution stream failed");
                    yield OutputChunk::error(action, e.to_string());
                    break;
                }
                None => break,
            }
        }
    })
}

/// Caller-resolved values every execution request carries
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub model_info: ModelInformation,
    pub correlation_id: String,
    pub auto_execute_generated_code: bool,
}

/// Dispatches executable actions to the backend
#[derive(Clone)]
pub struct ActionExecutor {
    backend: Arc<dyn ExecutionBackend>,
}

impl ActionExecutor {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self { backend }
    }

    /// Executor used by default: the HTTP backend
    pub fn http() -> Self {
        Self::new(Arc::new(HttpExecutionBackend::new()))
    }

    /// Stream for `action`, or `None` for `Stop`
    pub fn execute(
        &self,
        action: ActionType,
        state: &ActionState,
        ctx: &ExecutionContext,
        abort: &AbortSignal,
    ) -> Option<ExecutionStream> {
        let path = endpoint_path(action)?;
        let url = format!("{}{}", ctx.model_info.execution_base_url(), path);
        let request = ExecutionRequest {
            action_state: state.clone(),
            model_information: ctx.model_info.clone(),
            unique_id: ctx.correlation_id.clone(),
            auto_execute_generated_code: ctx.auto_execute_generated_code,
        };
        Some(shared_action(
            self.backend.clone(),
            action,
            url,
            request,
            abort.clone(),
        ))
    }

    /// Generate and run code for the current state
    pub fn code_action(
        &self,
        state: &ActionState,
        ctx: &ExecutionContext,
        abort: &AbortSignal,
    ) -> ExecutionStream {
        self.execute(ActionType::Code, state, ctx, abort)
            .unwrap_or_else(|| Box::pin(futures_util::stream::empty()))
    }

    /// Repair the previous failed execution
    pub fn fix_error_action(
        &self,
        state: &ActionState,
        ctx: &ExecutionContext,
        abort: &AbortSignal,
    ) -> ExecutionStream {
        self.execute(ActionType::FixError, state, ctx, abort)
            .unwrap_or_else(|| Box::pin(futures_util::stream::empty()))
    }
}

/// How one executor stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    Aborted,
    Errored,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed => "completed",
            ExecutionOutcome::Aborted => "aborted",
            ExecutionOutcome::Errored => "errored",
        }
    }
}

/// Folds streamed chunks into the conversation as they arrive
///
/// The first chunk opens a synthetic assistant turn, later chunks extend it
/// line by line.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    chunks: usize,
    errored: bool,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, state: &mut ActionState, chunk: &OutputChunk) {
        if self.chunks == 0 {
            state.push_assistant(chunk.content.clone());
        } else {
            state.extend_assistant(&format!("\n{}", chunk.content));
        }
        self.chunks += 1;
        self.errored |= chunk.error_occurred;
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Final state once the stream has ended
    pub fn finish(&self, aborted: bool) -> ExecutionOutcome {
        if aborted {
            ExecutionOutcome::Aborted
        } else if self.errored {
            ExecutionOutcome::Errored
        } else {
            ExecutionOutcome::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::masker::compute_allowed_actions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Replays scripted units; optionally trips an abort signal on a read
    struct ScriptedBackend {
        units: Vec<Result<String, String>>,
        trip: Option<(usize, AbortSignal)>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(units: Vec<Result<String, String>>) -> Self {
            Self {
                units,
                trip: None,
                urls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExecutionBackend for ScriptedBackend {
        async fn open(
            &self,
            url: &str,
            _request: &ExecutionRequest,
            _abort: &AbortSignal,
        ) -> Result<UnitStream, ExecutionError> {
            self.urls.lock().unwrap().push(url.to_string());
            let units = self.units.clone();
            let trip = self.trip.clone();
            let reads = Arc::new(AtomicUsize::new(0));
            Ok(Box::pin(futures_util::stream::iter(units).map(move |unit| {
                let n = reads.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some((at, signal)) = &trip {
                    if n == *at {
                        signal.abort();
                    }
                }
                unit.map_err(ExecutionError::Decode)
            })))
        }
    }

    struct RefusingBackend;

    #[async_trait]
    impl ExecutionBackend for RefusingBackend {
        async fn open(
            &self,
            _url: &str,
            _request: &ExecutionRequest,
            _abort: &AbortSignal,
        ) -> Result<UnitStream, ExecutionError> {
            Err(ExecutionError::Status {
                code: 502,
                body: "bad gateway".to_string(),
            })
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            model_info: ModelInformation::default(),
            correlation_id: "corr-1".to_string(),
            auto_execute_generated_code: true,
        }
    }

    fn units(n: usize) -> Vec<Result<String, String>> {
        (1..=n).map(|i| Ok(format!("unit {}", i))).collect()
    }

    #[test]
    fn test_error_chunk_carries_marker() {
        let chunk = OutputChunk::error(ActionType::Code, "boom");
        assert!(chunk.error_occurred);
        assert!(chunk.content.contains(ERROR_OCCURRED_MARKER));
        assert!(chunk.content.contains("boom"));

        let passthrough = OutputChunk::output(ActionType::Code, r#"{"error_occurred":true}"#);
        assert!(passthrough.error_occurred);
        assert!(!OutputChunk::output(ActionType::Code, "fine").error_occurred);
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(endpoint_path(ActionType::Code), Some("/api/code"));
        assert_eq!(endpoint_path(ActionType::FixError), Some("/api/fixErrors"));
        assert_eq!(endpoint_path(ActionType::Stop), None);
    }

    #[test]
    fn test_ndjson_decoder_handles_split_reads() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(b"{\"a\":").is_empty());
        assert_eq!(decoder.push(b"1}\n{\"b\":2}\r\n\n{\"c\""), vec![
            "{\"a\":1}".to_string(),
            "{\"b\":2}".to_string(),
        ]);
        assert_eq!(decoder.push(b":3}"), Vec::<String>::new());
        assert_eq!(decoder.finish(), Some("{\"c\":3}".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_ndjson_decoder_multibyte_split() {
        let bytes = "héllo\n".as_bytes();
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(&bytes[..2]).is_empty());
        assert_eq!(decoder.push(&bytes[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn test_request_body_shape() {
        let request = ExecutionRequest {
            action_state: ActionState::new_query(vec![], "q"),
            model_information: ModelInformation::default(),
            unique_id: "u".to_string(),
            auto_execute_generated_code: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["actionState"]["firstQuery"], true);
        assert_eq!(json["modelInformation"]["modelType"], "openai");
        assert_eq!(json["uniqueId"], "u");
        assert_eq!(json["autoExecuteGeneratedCode"], false);
    }

    #[tokio::test]
    async fn test_streams_every_unit_in_order() {
        let backend = Arc::new(ScriptedBackend::new(units(3)));
        let executor = ActionExecutor::new(backend.clone());
        let state = ActionState::new_query(vec![], "q");

        let chunks: Vec<OutputChunk> = executor
            .code_action(&state, &ctx(), &AbortSignal::new())
            .collect()
            .await;

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["unit 1", "unit 2", "unit 3"]);
        assert!(chunks.iter().all(|c| c.action == ActionType::Code));
        assert_eq!(
            backend.urls.lock().unwrap().as_slice(),
            &["https://api.thread.dev/api/code".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fix_error_uses_fix_endpoint_and_proxy() {
        let backend = Arc::new(ScriptedBackend::new(units(1)));
        let executor = ActionExecutor::new(backend.clone());
        let mut context = ctx();
        context.model_info.server_proxy_url = "http://localhost:8000".to_string();

        let chunks: Vec<OutputChunk> = executor
            .fix_error_action(&ActionState::default(), &context, &AbortSignal::new())
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].action, ActionType::FixError);
        assert_eq!(
            backend.urls.lock().unwrap().as_slice(),
            &["http://localhost:8000/api/fixErrors".to_string()]
        );
    }

    #[tokio::test]
    async fn test_abort_mid_stream_yields_only_prior_chunks() {
        let abort = AbortSignal::new();
        let mut backend = ScriptedBackend::new(units(5));
        backend.trip = Some((3, abort.clone()));
        let executor = ActionExecutor::new(Arc::new(backend));

        let chunks: Vec<OutputChunk> = executor
            .code_action(&ActionState::default(), &ctx(), &abort)
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "unit 2");
    }

    #[tokio::test]
    async fn test_already_aborted_opens_nothing() {
        let backend = Arc::new(ScriptedBackend::new(units(2)));
        let executor = ActionExecutor::new(backend.clone());
        let abort = AbortSignal::new();
        abort.abort();

        let chunks: Vec<OutputChunk> = executor
            .code_action(&ActionState::default(), &ctx(), &abort)
            .collect()
            .await;
        assert!(chunks.is_empty());
        assert!(backend.urls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_error_becomes_final_chunk() {
        let backend = ScriptedBackend::new(vec![
            Ok("partial output".to_string()),
            Err("connection reset".to_string()),
            Ok("never seen".to_string()),
        ]);
        let executor = ActionExecutor::new(Arc::new(backend));

        let chunks: Vec<OutputChunk> = executor
            .code_action(&ActionState::default(), &ctx(), &AbortSignal::new())
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].error_occurred);
        assert!(chunks[1].error_occurred);
        assert!(chunks[1].content.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_open_failure_becomes_error_chunk() {
        let executor = ActionExecutor::new(Arc::new(RefusingBackend));
        let chunks: Vec<OutputChunk> = executor
            .code_action(&ActionState::default(), &ctx(), &AbortSignal::new())
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].error_occurred);
        assert!(chunks[0].content.contains("502"));
    }

    #[test]
    fn test_stop_has_no_executor() {
        let executor = ActionExecutor::new(Arc::new(RefusingBackend));
        assert!(executor
            .execute(ActionType::Stop, &ActionState::default(), &ctx(), &AbortSignal::new())
            .is_none());
    }

    #[test]
    fn test_tracker_appends_and_flags_errors() {
        let mut state = ActionState::new_query(vec![], "q");
        state.first_query = false;
        let mut tracker = ExecutionTracker::new();

        tracker.record(&mut state, &OutputChunk::output(ActionType::Code, "line 1"));
        tracker.record(&mut state, &OutputChunk::error(ActionType::Code, "boom"));

        assert_eq!(tracker.chunks(), 2);
        assert_eq!(tracker.finish(false), ExecutionOutcome::Errored);
        assert_eq!(tracker.finish(true), ExecutionOutcome::Aborted);
        assert_eq!(state.messages_after_query.len(), 2);
        assert!(state.messages_after_query[1].content.starts_with("line 1\n"));
        assert!(compute_allowed_actions(&state).contains(&ActionType::FixError));
    }

    #[test]
    fn test_tracker_without_chunks_leaves_state() {
        let state = ActionState::new_query(vec![], "q");
        let tracker = ExecutionTracker::new();
        assert_eq!(tracker.finish(false), ExecutionOutcome::Completed);
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_tracker_keeps_error_after_later_output() {
        let mut state = ActionState::new_query(vec![], "q");
        let mut tracker = ExecutionTracker::new();

        tracker.record(&mut state, &OutputChunk::error(ActionType::Code, "NameError"));
        tracker.record(&mut state, &OutputChunk::output(ActionType::Code, "cleanup done"));

        assert_eq!(tracker.finish(false), ExecutionOutcome::Errored);
        state.first_query = false;
        assert!(compute_allowed_actions(&state).contains(&ActionType::FixError));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HttpExecutionBackend against a local chunked server
    // ─────────────────────────────────────────────────────────────────────────

    /// What the fixture does after the request is read
    enum Reply {
        /// 200 chunked body: one chunk per piece, `gap` apart
        Chunked {
            pieces: Vec<&'static str>,
            gap: Duration,
            /// Drop the connection instead of sending the final chunk
            cut: bool,
        },
        /// Plain response with the given status and body
        Status(u16, &'static str),
    }

    /// Read one request; returns its head, lowercased
    async fn read_request(socket: &mut TcpStream) -> std::io::Result<String> {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            let n = socket.read(&mut tmp).await?;
            if n == 0 {
                return Ok(String::from_utf8_lossy(&buf).to_ascii_lowercase());
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < end + 4 + body_len {
                    let n = socket.read(&mut tmp).await?;
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&tmp[..n]);
                }
                return Ok(head);
            }
        }
    }

    /// Serve one connection; the handle resolves to the request head and
    /// the number of body pieces written
    async fn serve_once(reply: Reply) -> (String, tokio::task::JoinHandle<(String, usize)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_request(&mut socket).await.unwrap_or_default();
            let mut written = 0;
            match reply {
                Reply::Status(code, body) => {
                    let response = format!(
                        "HTTP/1.1 {} Error\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        code,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                }
                Reply::Chunked { pieces, gap, cut } => {
                    let head_out = "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\n\r\n";
                    if socket.write_all(head_out.as_bytes()).await.is_err() {
                        return (head, written);
                    }
                    for piece in pieces {
                        tokio::time::sleep(gap).await;
                        let chunk = format!("{:x}\r\n{}\r\n", piece.len(), piece);
                        if socket.write_all(chunk.as_bytes()).await.is_err()
                            || socket.flush().await.is_err()
                        {
                            return (head, written);
                        }
                        written += 1;
                    }
                    if !cut {
                        let _ = socket.write_all(b"0\r\n\r\n").await;
                    }
                }
            }
            let _ = socket.shutdown().await;
            (head, written)
        });

        (base_url, handle)
    }

    fn http_ctx(base_url: &str) -> ExecutionContext {
        let mut context = ctx();
        context.model_info.server_proxy_url = base_url.to_string();
        context
    }

    fn http_executor() -> ActionExecutor {
        ActionExecutor::new(Arc::new(HttpExecutionBackend::new()))
    }

    #[tokio::test]
    async fn test_http_reassembles_lines_split_across_reads() {
        let (base_url, server) = serve_once(Reply::Chunked {
            pieces: vec!["{\"a\":", "1}\n{\"b\"", ":2}\n", "{\"c\":3}"],
            gap: Duration::from_millis(10),
            cut: false,
        })
        .await;

        let chunks: Vec<OutputChunk> = http_executor()
            .code_action(&ActionState::new_query(vec![], "q"), &http_ctx(&base_url), &AbortSignal::new())
            .collect()
            .await;

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["{\"a\":1}", "{\"b\":2}", "{\"c\":3}"]);
        assert!(chunks.iter().all(|c| !c.error_occurred));

        let (head, _) = server.await.unwrap();
        assert!(head.starts_with("post /api/code"));
        assert!(head.contains("x-trace-id: corr-1"));
    }

    #[tokio::test]
    async fn test_http_error_status_becomes_error_chunk() {
        let (base_url, _server) = serve_once(Reply::Status(500, "kernel died")).await;

        let chunks: Vec<OutputChunk> = http_executor()
            .fix_error_action(&ActionState::default(), &http_ctx(&base_url), &AbortSignal::new())
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].action, ActionType::FixError);
        assert!(chunks[0].error_occurred);
        assert!(chunks[0].content.contains("500"));
        assert!(chunks[0].content.contains("kernel died"));
    }

    #[tokio::test]
    async fn test_http_read_error_keeps_partial_line() {
        let (base_url, _server) = serve_once(Reply::Chunked {
            pieces: vec!["{\"ok\":1}\n", "Traceback (most"],
            gap: Duration::from_millis(10),
            cut: true,
        })
        .await;

        let chunks: Vec<OutputChunk> = http_executor()
            .code_action(&ActionState::default(), &http_ctx(&base_url), &AbortSignal::new())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "{\"ok\":1}");
        assert_eq!(chunks[1].content, "Traceback (most");
        assert!(!chunks[1].error_occurred);
        assert!(chunks[2].error_occurred);
    }

    #[tokio::test]
    async fn test_http_abort_stops_reading_mid_line() {
        // one 100-char line sent as 20 reads, 50ms apart
        let (base_url, server) = serve_once(Reply::Chunked {
            pieces: vec!["xxxxx"; 20],
            gap: Duration::from_millis(50),
            cut: false,
        })
        .await;

        let abort = AbortSignal::new();
        let trip = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(130)).await;
            trip.abort();
        });

        let started = Instant::now();
        let chunks: Vec<OutputChunk> = http_executor()
            .code_action(&ActionState::default(), &http_ctx(&base_url), &abort)
            .collect()
            .await;
        let elapsed = started.elapsed();

        assert!(chunks.is_empty());
        assert!(
            elapsed < Duration::from_millis(600),
            "kept reading for {:?} after abort",
            elapsed
        );

        // the response was dropped, so the server cannot finish the line
        let (_, written) = server.await.unwrap();
        assert!(written < 20, "server wrote all {} pieces", written);
    }
}
