//! Per-credential fairness for the worker pool.
//!
//! The gate bounds how many distinct credentials are serviced at once and how
//! many tasks of a single credential may be in flight. Workers rotate over the
//! queued credentials with a shared cursor so a tenant with a deep backlog
//! cannot starve the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use reviewq_core::{CredentialHash, Result, TaskRepository};

use crate::config::GateConfig;

/// Shared admission state. Cheap to clone; clones share counters.
#[derive(Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    config: GateConfig,
    in_flight: Mutex<HashMap<CredentialHash, usize>>,
    cursor: AtomicUsize,
}

/// Slot held while a task of `credential_hash` runs. Dropping it frees the slot.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct GatePermit {
    inner: Arc<GateInner>,
    credential_hash: CredentialHash,
}

impl GatePermit {
    pub fn credential_hash(&self) -> &CredentialHash {
        &self.credential_hash
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut in_flight = self.inner.lock();
        if let Some(count) = in_flight.get_mut(&self.credential_hash) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&self.credential_hash);
            }
        }
        trace!(
            subsystem = "jobs",
            component = "gate",
            credential_hash = self.credential_hash.short(),
            "Gate permit released"
        );
    }
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<CredentialHash, usize>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn admits(&self, in_flight: &HashMap<CredentialHash, usize>, hash: &CredentialHash) -> bool {
        match in_flight.get(hash) {
            Some(count) => *count < self.config.max_tasks_per_credential,
            None => in_flight.len() < self.config.max_parallel_credentials,
        }
    }
}

impl ConcurrencyGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            inner: Arc::new(GateInner {
                config,
                in_flight: Mutex::new(HashMap::new()),
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.inner.config
    }

    /// Reserve a slot for `hash`, or `None` when either limit is reached.
    pub fn try_acquire(&self, hash: &CredentialHash) -> Option<GatePermit> {
        let mut in_flight = self.inner.lock();
        if !self.inner.admits(&in_flight, hash) {
            debug!(
                subsystem = "jobs",
                component = "gate",
                credential_hash = hash.short(),
                active_credentials = in_flight.len(),
                "Gate refused credential"
            );
            return None;
        }
        *in_flight.entry(hash.clone()).or_insert(0) += 1;
        Some(GatePermit {
            inner: self.inner.clone(),
            credential_hash: hash.clone(),
        })
    }

    /// Tasks currently in flight for `hash`.
    pub fn in_flight(&self, hash: &CredentialHash) -> usize {
        self.inner.lock().get(hash).copied().unwrap_or(0)
    }

    /// Distinct credentials currently holding a permit.
    pub fn active_credentials(&self) -> usize {
        self.inner.lock().len()
    }

    /// Rotate `hashes` so that successive calls start one position further
    /// along.
    pub fn rotate(&self, mut hashes: Vec<CredentialHash>) -> Vec<CredentialHash> {
        if hashes.len() > 1 {
            let start = self.inner.cursor.fetch_add(1, Ordering::Relaxed) % hashes.len();
            hashes.rotate_left(start);
        }
        hashes
    }

    /// Queued credentials in round-robin order, minus those the gate would
    /// refuse right now.
    pub async fn candidates(&self, tasks: &dyn TaskRepository) -> Result<Vec<CredentialHash>> {
        let queued = tasks.distinct_queued_credentials().await?;
        let rotated = self.rotate(queued);
        let in_flight = self.inner.lock();
        Ok(rotated
            .into_iter()
            .filter(|h| self.inner.admits(&in_flight, h))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewq_core::NewTask;
    use reviewq_db::MemoryStore;
    use uuid::Uuid;

    fn hash(s: &str) -> CredentialHash {
        CredentialHash::from_credential(s)
    }

    #[test]
    fn test_per_credential_limit() {
        let gate = ConcurrencyGate::new(GateConfig::default());
        let first = gate.try_acquire(&hash("a"));
        assert!(first.is_some());
        assert!(gate.try_acquire(&hash("a")).is_none());
        assert_eq!(gate.in_flight(&hash("a")), 1);

        drop(first);
        assert_eq!(gate.in_flight(&hash("a")), 0);
        assert!(gate.try_acquire(&hash("a")).is_some());
    }

    #[test]
    fn test_parallel_credential_limit() {
        let gate = ConcurrencyGate::new(
            GateConfig::default()
                .with_max_parallel_credentials(2)
                .with_max_tasks_per_credential(2),
        );
        let _a1 = gate.try_acquire(&hash("a")).unwrap();
        let _b = gate.try_acquire(&hash("b")).unwrap();
        assert!(gate.try_acquire(&hash("c")).is_none());
        let _a2 = gate.try_acquire(&hash("a")).unwrap();
        assert_eq!(gate.active_credentials(), 2);
    }

    #[test]
    fn test_rotate_advances_start() {
        let gate = ConcurrencyGate::new(GateConfig::default());
        let hashes = vec![hash("a"), hash("b"), hash("c")];
        let first = gate.rotate(hashes.clone());
        let second = gate.rotate(hashes.clone());
        let third = gate.rotate(hashes.clone());
        assert_eq!(first[0], hash("a"));
        assert_eq!(second[0], hash("b"));
        assert_eq!(third[0], hash("c"));
    }

    #[tokio::test]
    async fn test_candidates_skip_saturated_credentials() {
        let store = MemoryStore::new();
        for key in ["a", "b"] {
            let task = NewTask::new(
                reviewq_core::TaskType::Review,
                hash(key),
                Uuid::new_v4(),
                "user",
                &serde_json::json!({}),
            )
            .unwrap();
            store.create(task).await.unwrap();
        }
        let gate = ConcurrencyGate::new(GateConfig::default());
        let _busy = gate.try_acquire(&hash("a")).unwrap();

        let candidates = gate.candidates(&store).await.unwrap();
        assert_eq!(candidates, vec![hash("b")]);
    }
}
