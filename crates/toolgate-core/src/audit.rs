//! Append-only audit trail for tool calls
//!
//! Every handled call produces exactly one [`AuditRecord`], whatever its
//! outcome. Records are queued on a bounded in-memory buffer and written
//! by a single background flusher so the hot path never blocks on disk.
//! When the buffer is full the oldest record is dropped and counted;
//! auditing must not take the gateway down with it.

use crate::toolcall::ToolCallStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Placeholder written in place of redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Argument keys whose values are never persisted
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "token",
    "secret",
    "password",
    "passwd",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
];

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lowered.contains(f))
}

/// Deep-copy a JSON value with sensitive fields replaced by [`REDACTED`]
#[must_use]
pub fn redact_arguments(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    if is_sensitive_key(k) {
                        (k.clone(), serde_json::Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact_arguments(v))
                    }
                })
                .collect();
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_arguments).collect())
        }
        other => other.clone(),
    }
}

/// One backend invocation made while executing a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCall {
    /// Connector that served the invocation
    pub connector: String,
    /// Backend operation name
    pub operation: String,
    /// Attempts made, including retries
    pub attempt_count: u32,
    /// Terminal status of the invocation
    pub final_status: String,
    /// Backend-assigned handle or failure detail, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Audit record for one handled tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Request identifier
    pub request_id: Uuid,
    /// Tenant that made the call
    pub tenant_id: String,
    /// Requested tool
    pub tool_name: String,
    /// When handling began
    pub started_at: DateTime<Utc>,
    /// When handling finished
    pub ended_at: DateTime<Utc>,
    /// Overall outcome
    pub outcome: ToolCallStatus,
    /// Normalized error label when the call did not succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Arguments with sensitive fields removed
    pub redacted_arguments: serde_json::Value,
    /// Backend invocations made on behalf of this call
    pub backend_calls: Vec<BackendCall>,
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record
    async fn append(&self, record: &AuditRecord) -> std::io::Result<()>;
}

/// Sink writing one JSON object per line to a file
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    /// Create a sink appending to the given path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

/// In-memory sink for tests
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all appended records
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

/// Append attempts per record before it is given up on
const SINK_RETRY_LIMIT: u32 = 5;
/// Pause between append attempts while the sink is failing
const SINK_RETRY_DELAY: Duration = Duration::from_millis(100);

struct SharedQueue {
    buffer: Mutex<VecDeque<AuditRecord>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
}

/// Asynchronous audit logger with a bounded queue and one flusher task
pub struct AuditLogger {
    queue: Arc<SharedQueue>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Spawn the flusher and return the logger
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let queue = Arc::new(SharedQueue {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            capacity: capacity.max(1),
        });
        let flusher = tokio::spawn(Self::flush_loop(Arc::clone(&queue), sink));
        Self {
            queue,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    /// Queue one record; never blocks the caller.
    ///
    /// When the buffer is full the oldest queued record is dropped to
    /// make room and the drop counter is incremented.
    pub fn record(&self, record: AuditRecord) {
        let Ok(mut buffer) = self.queue.buffer.lock() else {
            error!("Audit buffer lock poisoned, record lost");
            return;
        };
        if buffer.len() >= self.queue.capacity {
            buffer.pop_front();
            let dropped = self.queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_total = dropped, "Audit buffer full, dropped oldest record");
        }
        buffer.push_back(record);
        drop(buffer);
        self.queue.notify.notify_one();
    }

    /// Records dropped due to buffer overflow since startup
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting records, flush the queue, and join the flusher
    pub async fn shutdown(&self) {
        self.queue.closed.store(true, Ordering::SeqCst);
        self.queue.notify.notify_one();
        let handle = self.flusher.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Audit flusher task panicked");
            }
        }
    }

    async fn flush_loop(queue: Arc<SharedQueue>, sink: Arc<dyn AuditSink>) {
        loop {
            let next = queue
                .buffer
                .lock()
                .ok()
                .and_then(|mut buffer| buffer.pop_front());

            match next {
                Some(record) => Self::write_record(&*sink, &queue, record).await,
                None => {
                    if queue.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    queue.notify.notified().await;
                }
            }
        }
    }

    /// Append one record, retrying a failing sink before giving up.
    ///
    /// A sink outage must not lose the record immediately: the flusher
    /// retains it and retries with a pause. Only after the retry limit
    /// is the record dropped and counted, so a sustained outage degrades
    /// the same way queue overflow does instead of silently discarding
    /// everything.
    async fn write_record(sink: &dyn AuditSink, queue: &SharedQueue, record: AuditRecord) {
        let mut attempt = 0;
        loop {
            match sink.append(&record).await {
                Ok(()) => {
                    debug!(request_id = %record.request_id, "Audit record written");
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= SINK_RETRY_LIMIT {
                        let dropped = queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        error!(
                            request_id = %record.request_id,
                            attempts = attempt,
                            dropped_total = dropped,
                            error = %e,
                            "Audit record dropped after repeated sink failures"
                        );
                        return;
                    }
                    warn!(
                        request_id = %record.request_id,
                        attempt = attempt,
                        error = %e,
                        "Audit sink append failed, retrying"
                    );
                    tokio::time::sleep(SINK_RETRY_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    /// Sink that fails its first `failures` appends, then stores records
    struct FlakySink {
        records: Mutex<Vec<AuditRecord>>,
        failures_left: AtomicU32,
    }

    impl FlakySink {
        fn failing_first(failures: u32) -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                failures_left: AtomicU32::new(failures),
            }
        }

        fn records(&self) -> Vec<AuditRecord> {
            self.records.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl AuditSink for FlakySink {
        async fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk unavailable",
                ));
            }
            if let Ok(mut records) = self.records.lock() {
                records.push(record.clone());
            }
            Ok(())
        }
    }

    fn record_for(request_id: Uuid) -> AuditRecord {
        AuditRecord {
            request_id,
            tenant_id: "demo".to_string(),
            tool_name: "list_issues".to_string(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            outcome: ToolCallStatus::Success,
            error_kind: None,
            redacted_arguments: json!({}),
            backend_calls: vec![],
        }
    }

    #[test]
    fn test_redacts_sensitive_keys() {
        let args = json!({
            "owner": "acme",
            "api_token": "ghp_secret123",
            "nested": {
                "password": "hunter2",
                "page": 1
            },
            "items": [{"authorization": "Bearer x"}]
        });
        let redacted = redact_arguments(&args);
        assert_eq!(redacted["owner"], "acme");
        assert_eq!(redacted["api_token"], REDACTED);
        assert_eq!(redacted["nested"]["password"], REDACTED);
        assert_eq!(redacted["nested"]["page"], 1);
        assert_eq!(redacted["items"][0]["authorization"], REDACTED);
    }

    #[test]
    fn test_redaction_is_case_insensitive() {
        let args = json!({"API_KEY": "x", "ClientSecret": "y"});
        let redacted = redact_arguments(&args);
        assert_eq!(redacted["API_KEY"], REDACTED);
        assert_eq!(redacted["ClientSecret"], REDACTED);
    }

    #[tokio::test]
    async fn test_logger_flushes_to_sink() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone() as Arc<dyn AuditSink>, 16);
        let id = Uuid::new_v4();
        logger.record(record_for(id));
        logger.shutdown().await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_id, id);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        // No flusher task: fill the buffer synchronously so the drop
        // path is deterministic.
        let queue = Arc::new(SharedQueue {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            capacity: 2,
        });
        let logger = AuditLogger {
            queue: Arc::clone(&queue),
            flusher: Mutex::new(None),
        };
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let third = Uuid::new_v4();
        logger.record(record_for(first));
        logger.record(record_for(second));
        logger.record(record_for(third));
        assert_eq!(logger.dropped_records(), 1);
        {
            let buffer = queue.buffer.lock().unwrap();
            assert_eq!(buffer.len(), 2);
            assert_eq!(buffer[0].request_id, second);
            assert_eq!(buffer[1].request_id, third);
        }
    }

    #[tokio::test]
    async fn test_transient_sink_failure_is_retried() {
        let sink = Arc::new(FlakySink::failing_first(1));
        let logger = AuditLogger::new(sink.clone() as Arc<dyn AuditSink>, 16);
        let id = Uuid::new_v4();
        logger.record(record_for(id));
        logger.shutdown().await;
        // One failed append must not lose the record.
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_id, id);
        assert_eq!(logger.dropped_records(), 0);
    }

    #[tokio::test]
    async fn test_dead_sink_drops_after_retry_limit() {
        let sink = Arc::new(FlakySink::failing_first(u32::MAX));
        let logger = AuditLogger::new(sink.clone() as Arc<dyn AuditSink>, 16);
        logger.record(record_for(Uuid::new_v4()));
        logger.shutdown().await;
        assert!(sink.records().is_empty());
        assert_eq!(logger.dropped_records(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::new(&path);
        sink.append(&record_for(Uuid::new_v4())).await.unwrap();
        sink.append(&record_for(Uuid::new_v4())).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.tenant_id, "demo");
    }
}
