//! Centralized default constants for reviewq.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration structs fall back to these when the matching environment
//! variable is unset or unparsable.

// =============================================================================
// QUEUE
// =============================================================================

/// Default priority assigned to newly enqueued tasks (higher runs first).
pub const TASK_PRIORITY: i32 = 0;

/// Priority for caller-initiated retries, so a retry does not wait behind
/// fresh work of the same credential.
pub const RETRY_PRIORITY: i32 = 5;

/// Maximum queued tasks a single credential may hold at once.
pub const MAX_QUEUED_PER_CREDENTIAL: i64 = 50;

/// Hours a finished task is kept before the sweeper deletes it.
pub const TASK_RETENTION_HOURS: i64 = 24;

/// Interval between cleanup sweeps in seconds.
pub const CLEANUP_INTERVAL_SECS: u64 = 3600;

// =============================================================================
// CONCURRENCY GATE
// =============================================================================

/// Distinct credential hashes serviced in parallel.
pub const GATE_MAX_PARALLEL_CREDENTIALS: usize = 4;

/// Tasks of one credential allowed in flight at the same time.
pub const GATE_MAX_TASKS_PER_CREDENTIAL: usize = 1;

// =============================================================================
// WORKER
// =============================================================================

/// Number of serial worker loops per process.
pub const WORKER_COUNT: usize = 4;

/// Safety-net poll interval in milliseconds.
///
/// Enqueue wakes idle loops through a notify handle; polling only covers rows
/// inserted by other processes.
pub const WORKER_POLL_INTERVAL_MS: u64 = 2_000;

/// Running time after which a task is reported as slow, in seconds
/// (30 minutes). The task keeps running.
pub const SLOW_TASK_WARN_SECS: u64 = 1_800;

// =============================================================================
// REVIEW
// =============================================================================

/// Checklist items sent to the model in one call.
pub const MAX_CHECKLIST_CHUNK_SIZE: i64 = 50;

/// Documents longer than this many characters are reviewed in parts.
pub const MAX_DOCUMENT_CHARS: usize = 120_000;

/// Hard ceiling on parts per document when splitting after context overflow.
pub const MAX_DOCUMENT_PARTS: usize = 16;

/// Evaluation labels, ordered from best to worst.
pub const EVALUATION_LABELS: [&str; 3] = ["A", "B", "C"];

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default upload directory.
pub const UPLOAD_DIR: &str = "./data/uploads";

/// Keep-alive interval for push (SSE) connections in seconds.
pub const PUSH_KEEPALIVE_SECS: u64 = 15;
