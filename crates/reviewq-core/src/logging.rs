//! Structured logging field name constants for reviewq.
//!
//! All crates use these names for structured `tracing` fields so that log
//! aggregation can query the same keys across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, task-level failure, isolated subscriber error |
//! | INFO  | Lifecycle events (startup, shutdown), task transitions |
//! | DEBUG | Decision points (gate admission, chunk counts) |
//! | TRACE | Per-item iteration, individual event deliveries |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "jobs", "broker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "worker", "gate", "retry", "result_cache"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "enqueue", "dequeue", "cancel", "retry", "publish"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Task UUID being processed.
pub const TASK_ID: &str = "task_id";

/// Task type variant.
pub const TASK_TYPE: &str = "task_type";

/// Hashed credential; never log the plaintext credential.
pub const CREDENTIAL_HASH: &str = "credential_hash";

/// Review target UUID.
pub const TARGET_ID: &str = "target_id";

/// Push channel name.
pub const CHANNEL: &str = "channel";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks produced or processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Queued tasks for a credential at enqueue time.
pub const QUEUE_LENGTH: &str = "queue_length";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
