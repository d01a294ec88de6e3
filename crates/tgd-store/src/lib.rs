//! tgd-store
//!
//! The shared-state-store boundary. Every control (kill switch, breaker,
//! reservations) coordinates cross-process through one [`StateStore`]
//! handle, injected as `Arc<dyn StateStore>` — no hidden globals.
//!
//! # Primitives
//!
//! - plain key/value, list (tail-append) and sorted-set operations, all
//!   with Redis-style negative index semantics
//! - `watch` + `commit_if_unchanged` — optimistic concurrency: observe a
//!   key's version, build a batch of [`StoreOp`]s, commit only if the
//!   watched key is untouched
//! - `run_atomic` — the server-side atomic-section primitive: the section
//!   runs as one indivisible unit with no interleaving from other
//!   clients
//!
//! # Contract for atomic sections
//!
//! A section must do all its reads and checks first and write only once
//! the checks pass, so an early return leaves no partial writes. The
//! in-process [`MemoryStore`] backend holds the store lock for the
//! section's duration; a networked backend maps each named section to a
//! single server-side script.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

use async_trait::async_trait;

/// One member of a sorted set, with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub score: i64,
    pub member: String,
}

/// A write queued into a `commit_if_unchanged` transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set { key: String, value: String },
    Delete { key: String },
    ListPush { key: String, value: String },
    ListTrim { key: String, start: i64, stop: i64 },
    ZAdd { key: String, score: i64, member: String },
    ZRem { key: String, member: String },
    ZRemRangeByRank { key: String, start: i64, stop: i64 },
}

/// Result of an optimistic commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The watched key was unchanged; all ops applied.
    Committed,
    /// Another writer touched the watched key; nothing applied. The
    /// caller re-runs its whole read-decide-write cycle.
    Conflict,
}

/// Operations available inside an atomic section.
///
/// The receiver is a transaction handle, not the store itself; it is
/// only valid for the duration of the section.
pub trait AtomicOps {
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&mut self, key: &str) -> Result<bool, StoreError>;
    fn list_push(&mut self, key: &str, value: &str) -> Result<u64, StoreError>;
    fn list_trim(&mut self, key: &str, start: i64, stop: i64) -> Result<(), StoreError>;
    fn zset_add(&mut self, key: &str, score: i64, member: &str) -> Result<(), StoreError>;
    fn zset_remove(&mut self, key: &str, member: &str) -> Result<bool, StoreError>;
}

/// A closure run as one indivisible store operation.
pub type AtomicSection<'a> =
    Box<dyn FnOnce(&mut dyn AtomicOps) -> Result<(), StoreError> + Send + 'a>;

/// The store protocol all controls are written against.
///
/// Every method is a single store round trip. Any error from these
/// methods means "cannot determine safety state" to the callers above —
/// they fail closed, never default.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Returns `true` if the key was absent and has been created.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Tail append. Returns the new list length.
    async fn list_push(&self, key: &str, value: &str) -> Result<u64, StoreError>;
    async fn list_range(&self, key: &str, start: i64, stop: i64)
        -> Result<Vec<String>, StoreError>;
    /// Keeps only `[start, stop]` (inclusive, negative indices allowed).
    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError>;
    async fn list_len(&self, key: &str) -> Result<u64, StoreError>;

    async fn zset_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError>;
    async fn zset_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// Rank range, ascending by (score, member).
    async fn zset_range(&self, key: &str, start: i64, stop: i64)
        -> Result<Vec<ScoredMember>, StoreError>;
    async fn zset_card(&self, key: &str) -> Result<u64, StoreError>;

    /// Current version of a key (0 if never written). Mutations from any
    /// client bump it.
    async fn watch(&self, key: &str) -> Result<u64, StoreError>;
    /// Applies `ops` all-or-nothing iff the watched key's version still
    /// equals `observed_version`.
    async fn commit_if_unchanged(
        &self,
        watch_key: &str,
        observed_version: u64,
        ops: Vec<StoreOp>,
    ) -> Result<CommitOutcome, StoreError>;

    /// Runs `section` as one indivisible store operation.
    async fn run_atomic(&self, section: AtomicSection<'_>) -> Result<(), StoreError>;
}
