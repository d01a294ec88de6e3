//! In-process reference backend.
//!
//! A typed keyspace behind one `std::sync::Mutex`. Single-node
//! deployments and every scenario test run against this; the mutex gives
//! `run_atomic` its no-interleaving guarantee directly. The guard is
//! never held across an await point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{
    AtomicOps, AtomicSection, CommitOutcome, ScoredMember, StateStore, StoreError, StoreOp,
};

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    List(Vec<String>),
    /// Sorted ascending by (score, member).
    ZSet(Vec<(i64, String)>),
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    versions: HashMap<String, u64>,
    /// Global write sequence; a key's version is the seq of its last write.
    seq: u64,
}

/// Redis-style rank range resolution. Returns the inclusive concrete
/// bounds, or `None` when the range selects nothing.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let n = len as i64;
    if n == 0 {
        return None;
    }
    let mut s = if start < 0 { n + start } else { start };
    let mut e = if stop < 0 { n + stop } else { stop };
    if s < 0 {
        s = 0;
    }
    if e > n - 1 {
        e = n - 1;
    }
    if s > e || s > n - 1 {
        return None;
    }
    Some((s as usize, e as usize))
}

impl Inner {
    fn touch(&mut self, key: &str) {
        self.seq += 1;
        self.versions.insert(key.to_string(), self.seq);
    }

    fn version_of(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::WrongType {
            key: key.to_string(),
        }
    }

    // -- key/value ----------------------------------------------------------

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.slots.get(key) {
            None => Ok(None),
            Some(Slot::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        match self.slots.get(key) {
            None | Some(Slot::Str(_)) => {
                self.slots
                    .insert(key.to_string(), Slot::Str(value.to_string()));
                self.touch(key);
                Ok(())
            }
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn set_if_absent(&mut self, key: &str, value: &str) -> Result<bool, StoreError> {
        if self.slots.contains_key(key) {
            return Ok(false);
        }
        self.slots
            .insert(key.to_string(), Slot::Str(value.to_string()));
        self.touch(key);
        Ok(true)
    }

    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        let existed = self.slots.remove(key).is_some();
        if existed {
            self.touch(key);
        }
        Ok(existed)
    }

    // -- lists --------------------------------------------------------------

    fn list_push(&mut self, key: &str, value: &str) -> Result<u64, StoreError> {
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::List(Vec::new()));
        let len = match slot {
            Slot::List(items) => {
                items.push(value.to_string());
                items.len() as u64
            }
            _ => return Err(Self::wrong_type(key)),
        };
        self.touch(key);
        Ok(len)
    }

    fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let items = match self.slots.get(key) {
            None => return Ok(Vec::new()),
            Some(Slot::List(items)) => items,
            Some(_) => return Err(Self::wrong_type(key)),
        };
        Ok(match resolve_range(items.len(), start, stop) {
            Some((s, e)) => items[s..=e].to_vec(),
            None => Vec::new(),
        })
    }

    fn list_trim(&mut self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        let slot = match self.slots.get_mut(key) {
            None => return Ok(()),
            Some(s) => s,
        };
        match slot {
            Slot::List(items) => {
                match resolve_range(items.len(), start, stop) {
                    Some((s, e)) => {
                        let kept = items[s..=e].to_vec();
                        *items = kept;
                    }
                    None => items.clear(),
                }
            }
            _ => return Err(Self::wrong_type(key)),
        }
        self.touch(key);
        Ok(())
    }

    fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        match self.slots.get(key) {
            None => Ok(0),
            Some(Slot::List(items)) => Ok(items.len() as u64),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    // -- sorted sets --------------------------------------------------------

    fn zset_add(&mut self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::ZSet(Vec::new()));
        match slot {
            Slot::ZSet(items) => {
                items.retain(|(_, m)| m != member);
                let pos = match items.binary_search_by(|probe| {
                    probe.0.cmp(&score).then_with(|| probe.1.as_str().cmp(member))
                }) {
                    Ok(p) | Err(p) => p,
                };
                items.insert(pos, (score, member.to_string()));
            }
            _ => return Err(Self::wrong_type(key)),
        }
        self.touch(key);
        Ok(())
    }

    fn zset_remove(&mut self, key: &str, member: &str) -> Result<bool, StoreError> {
        let slot = match self.slots.get_mut(key) {
            None => return Ok(false),
            Some(s) => s,
        };
        let removed = match slot {
            Slot::ZSet(items) => {
                let before = items.len();
                items.retain(|(_, m)| m != member);
                items.len() != before
            }
            _ => return Err(Self::wrong_type(key)),
        };
        if removed {
            self.touch(key);
        }
        Ok(removed)
    }

    fn zset_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>, StoreError> {
        let items = match self.slots.get(key) {
            None => return Ok(Vec::new()),
            Some(Slot::ZSet(items)) => items,
            Some(_) => return Err(Self::wrong_type(key)),
        };
        Ok(match resolve_range(items.len(), start, stop) {
            Some((s, e)) => items[s..=e]
                .iter()
                .map(|(score, member)| ScoredMember {
                    score: *score,
                    member: member.clone(),
                })
                .collect(),
            None => Vec::new(),
        })
    }

    fn zset_card(&self, key: &str) -> Result<u64, StoreError> {
        match self.slots.get(key) {
            None => Ok(0),
            Some(Slot::ZSet(items)) => Ok(items.len() as u64),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn zset_remove_range_by_rank(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, StoreError> {
        let slot = match self.slots.get_mut(key) {
            None => return Ok(0),
            Some(s) => s,
        };
        let removed = match slot {
            Slot::ZSet(items) => match resolve_range(items.len(), start, stop) {
                Some((s, e)) => {
                    items.drain(s..=e).count() as u64
                }
                None => 0,
            },
            _ => return Err(Self::wrong_type(key)),
        };
        if removed > 0 {
            self.touch(key);
        }
        Ok(removed)
    }

    fn apply_op(&mut self, op: &StoreOp) -> Result<(), StoreError> {
        match op {
            StoreOp::Set { key, value } => self.set(key, value),
            StoreOp::Delete { key } => self.delete(key).map(|_| ()),
            StoreOp::ListPush { key, value } => self.list_push(key, value).map(|_| ()),
            StoreOp::ListTrim { key, start, stop } => self.list_trim(key, *start, *stop),
            StoreOp::ZAdd { key, score, member } => self.zset_add(key, *score, member),
            StoreOp::ZRem { key, member } => self.zset_remove(key, member).map(|_| ()),
            StoreOp::ZRemRangeByRank { key, start, stop } => self
                .zset_remove_range_by_rank(key, *start, *stop)
                .map(|_| ()),
        }
    }
}

impl AtomicOps for Inner {
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        Inner::get(self, key)
    }
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        Inner::set(self, key, value)
    }
    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        Inner::delete(self, key)
    }
    fn list_push(&mut self, key: &str, value: &str) -> Result<u64, StoreError> {
        Inner::list_push(self, key, value)
    }
    fn list_trim(&mut self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        Inner::list_trim(self, key, start, stop)
    }
    fn zset_add(&mut self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        Inner::zset_add(self, key, score, member)
    }
    fn zset_remove(&mut self, key: &str, member: &str) -> Result<bool, StoreError> {
        Inner::zset_remove(self, key, member)
    }
}

/// The in-memory [`StateStore`] backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned keyspace is still internally consistent; the writer
        // that panicked never applied a partial section (see lib.rs).
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.lock().get(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().set(key, value)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.lock().set_if_absent(key, value)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.lock().delete(key)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        self.lock().list_push(key, value)
    }

    async fn list_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, StoreError> {
        self.lock().list_range(key, start, stop)
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        self.lock().list_trim(key, start, stop)
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        self.lock().list_len(key)
    }

    async fn zset_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        self.lock().zset_add(key, score, member)
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.lock().zset_remove(key, member)
    }

    async fn zset_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        self.lock().zset_range(key, start, stop)
    }

    async fn zset_card(&self, key: &str) -> Result<u64, StoreError> {
        self.lock().zset_card(key)
    }

    async fn watch(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.lock().version_of(key))
    }

    async fn commit_if_unchanged(
        &self,
        watch_key: &str,
        observed_version: u64,
        ops: Vec<StoreOp>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.lock();
        if inner.version_of(watch_key) != observed_version {
            return Ok(CommitOutcome::Conflict);
        }
        for op in &ops {
            inner.apply_op(op)?;
        }
        Ok(CommitOutcome::Committed)
    }

    async fn run_atomic(&self, section: AtomicSection<'_>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        section(&mut *inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new()
    }

    #[tokio::test]
    async fn get_set_round_trip() {
        let s = store();
        assert_eq!(s.get("k").await.unwrap(), None);
        s.set("k", "v").await.unwrap();
        assert_eq!(s.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn set_if_absent_only_creates_once() {
        let s = store();
        assert!(s.set_if_absent("k", "first").await.unwrap());
        assert!(!s.set_if_absent("k", "second").await.unwrap());
        assert_eq!(s.get("k").await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn list_push_range_negative_indices() {
        let s = store();
        for v in ["a", "b", "c", "d"] {
            s.list_push("l", v).await.unwrap();
        }
        assert_eq!(s.list_len("l").await.unwrap(), 4);
        let tail = s.list_range("l", -2, -1).await.unwrap();
        assert_eq!(tail, vec!["c".to_string(), "d".to_string()]);
        // Full range.
        assert_eq!(s.list_range("l", 0, -1).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn list_trim_keeps_newest_tail() {
        let s = store();
        for i in 0..10 {
            s.list_push("l", &i.to_string()).await.unwrap();
        }
        // Keep the newest 3 (the head-trim used for history caps).
        s.list_trim("l", -3, -1).await.unwrap();
        assert_eq!(
            s.list_range("l", 0, -1).await.unwrap(),
            vec!["7".to_string(), "8".to_string(), "9".to_string()]
        );
    }

    #[tokio::test]
    async fn zset_orders_by_score_and_evicts_by_rank() {
        let s = store();
        s.zset_add("z", 30, "c").await.unwrap();
        s.zset_add("z", 10, "a").await.unwrap();
        s.zset_add("z", 20, "b").await.unwrap();

        let all = s.zset_range("z", 0, -1).await.unwrap();
        let members: Vec<_> = all.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["a", "b", "c"]);

        // Evict all but the newest 2 (cap semantics: 0..-(cap+1)).
        let removed = {
            let mut inner = s.lock();
            inner.zset_remove_range_by_rank("z", 0, -3).unwrap()
        };
        assert_eq!(removed, 1);
        let rest = s.zset_range("z", 0, -1).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].member, "b");
    }

    #[tokio::test]
    async fn zset_add_updates_score_of_existing_member() {
        let s = store();
        s.zset_add("z", 10, "a").await.unwrap();
        s.zset_add("z", 40, "a").await.unwrap();
        let all = s.zset_range("z", 0, -1).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].score, 40);
    }

    #[tokio::test]
    async fn wrong_type_access_is_an_error() {
        let s = store();
        s.list_push("l", "x").await.unwrap();
        assert!(matches!(
            s.get("l").await,
            Err(StoreError::WrongType { .. })
        ));
        s.set("k", "v").await.unwrap();
        assert!(matches!(
            s.zset_card("k").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn commit_if_unchanged_detects_interleaved_writer() {
        let s = store();
        s.set("state", "v1").await.unwrap();
        let observed = s.watch("state").await.unwrap();

        // Interleaved writer touches the watched key.
        s.set("state", "v2").await.unwrap();

        let outcome = s
            .commit_if_unchanged(
                "state",
                observed,
                vec![StoreOp::Set {
                    key: "state".to_string(),
                    value: "v3".to_string(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Conflict);
        assert_eq!(s.get("state").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn commit_if_unchanged_applies_batch_when_clean() {
        let s = store();
        let observed = s.watch("state").await.unwrap();
        assert_eq!(observed, 0);

        let outcome = s
            .commit_if_unchanged(
                "state",
                observed,
                vec![
                    StoreOp::Set {
                        key: "state".to_string(),
                        value: "v1".to_string(),
                    },
                    StoreOp::ListPush {
                        key: "history".to_string(),
                        value: "e1".to_string(),
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
        assert_eq!(s.get("state").await.unwrap(), Some("v1".to_string()));
        assert_eq!(s.list_len("history").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_atomic_sees_and_writes_consistently() {
        let s = store();
        s.set("counter", "41").await.unwrap();

        s.run_atomic(Box::new(|ops| {
            let cur: i64 = ops
                .get("counter")?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            ops.set("counter", &(cur + 1).to_string())
        }))
        .await
        .unwrap();

        assert_eq!(s.get("counter").await.unwrap(), Some("42".to_string()));
    }

    #[tokio::test]
    async fn run_atomic_can_capture_results() {
        let s = store();
        s.set("k", "v").await.unwrap();

        let mut seen: Option<String> = None;
        s.run_atomic(Box::new(|ops| {
            seen = ops.get("k")?;
            Ok(())
        }))
        .await
        .unwrap();
        assert_eq!(seen, Some("v".to_string()));
    }
}
