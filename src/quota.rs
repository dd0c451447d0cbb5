//! Anonymous usage budget
//!
//! Sessions without an API key or proxy URL get a fixed number of calls for
//! the lifetime of the install. The counter is durable (read at startup,
//! written on every change) and shared by every session in the process.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  check(has_credential)                                            │
//! │                                                                   │
//! │   credential? ──yes──► Bypassed   (counter untouched)             │
//! │       │                                                           │
//! │       no                                                          │
//! │       ▼                                                           │
//! │   CAS count → count+1 while count < max ──► Allowed, persist      │
//! │       │                                                           │
//! │   count >= max ──────────────────────────► LimitReached           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::metrics::QUOTA_DENIED;

/// Anonymous calls allowed by the default policy
pub const MAX_AI_API_CALLS: u64 = 25;

/// Key the counter is stored under
pub const QUOTA_STORAGE_KEY: &str = "threadApiCallCount";

/// Durable home of the counter
pub trait QuotaStore: Send + Sync {
    fn load(&self) -> std::io::Result<u64>;
    fn save(&self, count: u64) -> std::io::Result<()>;
}

/// In-memory store, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    value: Mutex<u64>,
}

impl MemoryQuotaStore {
    pub fn new(initial: u64) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn load(&self) -> std::io::Result<u64> {
        Ok(*self.value.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn save(&self, count: u64) -> std::io::Result<()> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = count;
        Ok(())
    }
}

/// JSON object file holding the counter under `QUOTA_STORAGE_KEY`
///
/// Other keys in the file are preserved on write.
#[derive(Debug, Clone)]
pub struct FileQuotaStore {
    path: PathBuf,
}

impl FileQuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.notebook-agent/storage.json`
    pub fn default_store() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(PathBuf::from(home).join(".notebook-agent").join("storage.json"))
    }

    fn read_map(&self) -> std::io::Result<BTreeMap<String, serde_json::Value>> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) if json.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }
}

impl QuotaStore for FileQuotaStore {
    fn load(&self) -> std::io::Result<u64> {
        let map = self.read_map()?;
        // accept both numeric and string-encoded counts
        let count = match map.get(QUOTA_STORAGE_KEY) {
            Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };
        Ok(count)
    }

    fn save(&self, count: u64) -> std::io::Result<()> {
        let mut map = self.read_map().unwrap_or_default();
        map.insert(QUOTA_STORAGE_KEY.to_string(), serde_json::Value::from(count));
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&map)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, json)
    }
}

/// Result of consulting the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Anonymous call admitted; one budget slot consumed
    Allowed,
    /// A credential is configured; the budget does not apply
    Bypassed,
    /// Budget exhausted; the caller should ask for credentials
    LimitReached,
}

/// Process-wide gate over the anonymous call budget
pub struct QuotaGate {
    max_calls: u64,
    count: AtomicU64,
    store: Box<dyn QuotaStore>,
    /// Serializes persistence so the stored value never goes backwards
    persist_lock: Mutex<()>,
}

impl QuotaGate {
    /// Open the gate, reading the current count from `store`
    ///
    /// An unreadable store starts from zero with a warning.
    pub fn open(store: Box<dyn QuotaStore>, max_calls: u64) -> Self {
        let initial = store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read quota counter, starting from zero");
            0
        });
        Self {
            max_calls,
            count: AtomicU64::new(initial),
            store,
            persist_lock: Mutex::new(()),
        }
    }

    /// Gate with the default budget over an in-memory store
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryQuotaStore::default()), MAX_AI_API_CALLS)
    }

    /// Consult the gate, consuming a slot for anonymous calls
    pub fn check(&self, has_credential: bool) -> QuotaDecision {
        if has_credential {
            return QuotaDecision::Bypassed;
        }

        loop {
            let current = self.count.load(Ordering::SeqCst);
            if current >= self.max_calls {
                QUOTA_DENIED.inc();
                tracing::warn!(count = current, max = self.max_calls, "Anonymous call limit reached");
                return QuotaDecision::LimitReached;
            }

            // compare_exchange so two sessions never claim the same slot
            match self.count.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.persist();
                    return QuotaDecision::Allowed;
                }
                Err(_) => continue,
            }
        }
    }

    /// `check` for use inside async code
    ///
    /// Claiming a slot writes the store, so it runs on the blocking pool.
    /// Credentialed calls never touch the store and return immediately.
    pub async fn check_async(self: &Arc<Self>, has_credential: bool) -> QuotaDecision {
        if has_credential {
            return QuotaDecision::Bypassed;
        }
        let gate = Arc::clone(self);
        match tokio::task::spawn_blocking(move || gate.check(false)).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "Quota check did not complete, refusing call");
                QuotaDecision::LimitReached
            }
        }
    }

    /// `true` when the call may proceed
    pub fn allow(&self, has_credential: bool) -> bool {
        self.check(has_credential) != QuotaDecision::LimitReached
    }

    /// Anonymous calls consumed so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn max_calls(&self) -> u64 {
        self.max_calls
    }

    pub fn remaining(&self) -> u64 {
        self.max_calls.saturating_sub(self.count())
    }

    /// Zero the counter and persist it
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.persist();
        tracing::info!("Quota counter reset");
    }

    fn persist(&self) {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        // read under the lock: a later writer always sees the newest value
        let value = self.count.load(Ordering::SeqCst);
        if let Err(e) = self.store.save(value) {
            tracing::warn!(error = %e, count = value, "Failed to persist quota counter");
        }
    }
}
