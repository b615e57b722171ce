//! Service configuration read from the environment.

use std::str::FromStr;

use reviewq_core::defaults;

/// Parse `key` from the environment, falling back to `default` when the
/// variable is unset or unparsable.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Admission and retention settings for the task queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queued tasks one credential may hold before enqueue is refused.
    pub max_queued_per_credential: i64,
    /// Hours a finished task is kept before cleanup removes it.
    pub retention_hours: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queued_per_credential: defaults::MAX_QUEUED_PER_CREDENTIAL,
            retention_hours: defaults::TASK_RETENTION_HOURS,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `QUEUE_MAX_QUEUED_PER_CREDENTIAL` | `50` | Per-credential admission limit |
    /// | `TASK_RETENTION_HOURS` | `24` | Age at which finished tasks are deleted |
    pub fn from_env() -> Self {
        Self {
            max_queued_per_credential: env_or(
                "QUEUE_MAX_QUEUED_PER_CREDENTIAL",
                defaults::MAX_QUEUED_PER_CREDENTIAL,
            )
            .max(1),
            retention_hours: env_or("TASK_RETENTION_HOURS", defaults::TASK_RETENTION_HOURS).max(0),
        }
    }

    pub fn with_max_queued_per_credential(mut self, max: i64) -> Self {
        self.max_queued_per_credential = max;
        self
    }

    pub fn with_retention_hours(mut self, hours: i64) -> Self {
        self.retention_hours = hours;
        self
    }
}

/// Limits enforced by the concurrency gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Distinct credentials serviced at the same time.
    pub max_parallel_credentials: usize,
    /// Tasks of one credential in flight at the same time.
    pub max_tasks_per_credential: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_parallel_credentials: defaults::GATE_MAX_PARALLEL_CREDENTIALS,
            max_tasks_per_credential: defaults::GATE_MAX_TASKS_PER_CREDENTIAL,
        }
    }
}

impl GateConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GATE_MAX_PARALLEL_CREDENTIALS` | `4` |
    /// | `GATE_MAX_TASKS_PER_CREDENTIAL` | `1` |
    pub fn from_env() -> Self {
        Self {
            max_parallel_credentials: env_or(
                "GATE_MAX_PARALLEL_CREDENTIALS",
                defaults::GATE_MAX_PARALLEL_CREDENTIALS,
            )
            .max(1),
            max_tasks_per_credential: env_or(
                "GATE_MAX_TASKS_PER_CREDENTIAL",
                defaults::GATE_MAX_TASKS_PER_CREDENTIAL,
            )
            .max(1),
        }
    }

    pub fn with_max_parallel_credentials(mut self, max: usize) -> Self {
        self.max_parallel_credentials = max;
        self
    }

    pub fn with_max_tasks_per_credential(mut self, max: usize) -> Self {
        self.max_tasks_per_credential = max;
        self
    }
}

/// Sizing for review execution.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    /// Checklist items per model call.
    pub max_checklist_chunk_size: i64,
    /// Documents longer than this are reviewed in parts.
    pub max_document_chars: usize,
    /// Upper bound on parts per document after context overflow.
    pub max_document_parts: usize,
    /// Labels ordered from best to worst.
    pub evaluation_labels: Vec<String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_checklist_chunk_size: defaults::MAX_CHECKLIST_CHUNK_SIZE,
            max_document_chars: defaults::MAX_DOCUMENT_CHARS,
            max_document_parts: defaults::MAX_DOCUMENT_PARTS,
            evaluation_labels: defaults::EVALUATION_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ReviewConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `REVIEW_MAX_CHECKLIST_CHUNK_SIZE` | `50` |
    /// | `REVIEW_MAX_DOCUMENT_CHARS` | `120000` |
    /// | `REVIEW_MAX_DOCUMENT_PARTS` | `16` |
    pub fn from_env() -> Self {
        Self {
            max_checklist_chunk_size: env_or(
                "REVIEW_MAX_CHECKLIST_CHUNK_SIZE",
                defaults::MAX_CHECKLIST_CHUNK_SIZE,
            ),
            max_document_chars: env_or("REVIEW_MAX_DOCUMENT_CHARS", defaults::MAX_DOCUMENT_CHARS)
                .max(1),
            max_document_parts: env_or("REVIEW_MAX_DOCUMENT_PARTS", defaults::MAX_DOCUMENT_PARTS)
                .max(1),
            ..Self::default()
        }
    }

    pub fn with_max_checklist_chunk_size(mut self, max: i64) -> Self {
        self.max_checklist_chunk_size = max;
        self
    }

    pub fn with_max_document_chars(mut self, max: usize) -> Self {
        self.max_document_chars = max;
        self
    }

    pub fn with_max_document_parts(mut self, max: usize) -> Self {
        self.max_document_parts = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.max_queued_per_credential, 50);
        assert_eq!(config.retention_hours, 24);
    }

    #[test]
    fn test_gate_config_builder() {
        let config = GateConfig::default()
            .with_max_parallel_credentials(2)
            .with_max_tasks_per_credential(3);
        assert_eq!(config.max_parallel_credentials, 2);
        assert_eq!(config.max_tasks_per_credential, 3);
    }

    #[test]
    fn test_review_config_labels_best_first() {
        let config = ReviewConfig::default();
        assert_eq!(config.evaluation_labels, vec!["A", "B", "C"]);
        assert_eq!(config.max_checklist_chunk_size, 50);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("REVIEWQ_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or("REVIEWQ_TEST_ENV_OR", 7usize), 7);
        std::env::set_var("REVIEWQ_TEST_ENV_OR", " 12 ");
        assert_eq!(env_or("REVIEWQ_TEST_ENV_OR", 7usize), 12);
        std::env::remove_var("REVIEWQ_TEST_ENV_OR");
        assert_eq!(env_or("REVIEWQ_TEST_ENV_OR", 7usize), 7);
    }
}
