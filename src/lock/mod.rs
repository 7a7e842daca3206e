//! Hierarchical lock manager.
//!
//! Locks live in two separate trees: *persistent* locks, created by the
//! LOCK method and visible to clients, and *temporary* locks, which a
//! method handler takes around its own critical section to serialize
//! against other handlers touching the same path.
//!
//! Each tree mirrors the resource namespace. Locking `/a/b/c` creates
//! (owner-less) nodes for `/`, `/a` and `/a/b` so that conflicts can be
//! found by walking up and down the tree. Nodes that have neither owners
//! nor children are garbage and are pruned.
//!
//! All operations run under one mutex per [`ResourceLocks`] instance.
//! They only walk the lock tree and never call into a store, so the
//! mutex is never held across I/O.
//!
//! Expired locks are reclaimed lazily, by the next operation that touches
//! the region or by the periodic full sweep.
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::davheaders::Depth;

mod table;

pub use table::LockedObject;
use table::{parent_path, LockTree, ROOT};

/// Timeout of the temporary locks that guard a method handler.
pub const TEMP_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout of a persistent lock if the client did not ask for one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);
/// Upper limit for the timeout of a persistent lock.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(604800);

// run a full expiry + cleanup sweep every this many operations.
const CLEANUP_INTERVAL: usize = 100;

/// Kind of lock node. Persistent locks are write locks, temporary
/// locks are read locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Read,
    Write,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Read => "read",
            LockType::Write => "write",
        }
    }
}

/// Internal invariant violation in the lock table.
///
/// Ordinary lock conflicts are never an error; `lock()` returns `false`.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock failed: {0}")]
    LockFailed(String),
}

#[derive(Debug)]
struct LockTable {
    locks: LockTree,
    temp_locks: LockTree,
    cleanup_counter: usize,
}

impl LockTable {
    fn tree(&mut self, temporary: bool) -> &mut LockTree {
        if temporary {
            &mut self.temp_locks
        } else {
            &mut self.locks
        }
    }

    // amortized full sweep of both trees.
    fn tick(&mut self) {
        self.cleanup_counter += 1;
        if self.cleanup_counter > CLEANUP_INTERVAL {
            self.cleanup_counter = 0;
            let now = Instant::now();
            for temporary in [false, true] {
                let tree = self.tree(temporary);
                let expired = tree.expire_all(now);
                tree.cleanup(ROOT);
                trace!(
                    "locktable: sweep (temporary={}) expired {} locks, {} nodes left",
                    temporary,
                    expired,
                    tree.len()
                );
            }
        }
    }
}

/// The lock manager.
///
/// Cloning the `Arc` around it is how a lock table is shared between
/// handlers; one instance is one lock domain.
#[derive(Debug)]
pub struct ResourceLocks {
    table: Mutex<LockTable>,
}

impl Default for ResourceLocks {
    fn default() -> Self {
        ResourceLocks {
            table: Mutex::new(LockTable {
                locks: LockTree::new(LockType::Write),
                temp_locks: LockTree::new(LockType::Read),
                cleanup_counter: 0,
            }),
        }
    }
}

// lock table keys: absolute, no trailing slash (except for the root).
fn lock_key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl ResourceLocks {
    /// Create a new, empty lock table.
    pub fn new() -> Arc<ResourceLocks> {
        Arc::new(ResourceLocks::default())
    }

    /// Try to lock `path` for `owner`.
    ///
    /// Returns `Ok(false)` if an incompatible lock is held on the path,
    /// on one of its ancestors or, unless `depth` is zero, anywhere below
    /// it. Locking again as an existing owner refreshes the expiry.
    pub fn lock(
        &self,
        path: &str,
        owner: &str,
        exclusive: bool,
        depth: Depth,
        timeout: Duration,
        temporary: bool,
    ) -> Result<bool, LockError> {
        let key = lock_key(path);
        let mut table = self.table.lock();
        let tree = table.tree(temporary);

        tree.generate(&key)?;
        tree.expire_region(&key, Instant::now());
        // expiry may have pruned part of the chain.
        tree.generate(&key)?;

        if !tree.can_lock(&key, owner, exclusive, depth) {
            tree.prune(&key);
            debug!(
                "locktable: {} lock on {} for {} refused (temporary={})",
                if exclusive { "exclusive" } else { "shared" },
                key,
                owner,
                temporary
            );
            return Ok(false);
        }
        tree.add_owner(&key, owner, exclusive, depth, timeout)?;
        trace!("locktable: locked {} for {} (temporary={})", key, owner, temporary);
        table.tick();
        Ok(true)
    }

    /// Place a persistent exclusive lock.
    pub fn exclusive_lock(
        &self,
        path: &str,
        owner: &str,
        depth: Depth,
        timeout: Duration,
    ) -> Result<bool, LockError> {
        self.lock(path, owner, true, depth, timeout, false)
    }

    /// Place a persistent shared lock.
    pub fn shared_lock(
        &self,
        path: &str,
        owner: &str,
        depth: Depth,
        timeout: Duration,
    ) -> Result<bool, LockError> {
        self.lock(path, owner, false, depth, timeout, false)
    }

    /// Remove `owner` from the persistent lock with token `id`.
    ///
    /// Returns `false` if there is no such lock, or `owner` does not hold it.
    pub fn unlock(&self, id: &str, owner: &str) -> bool {
        let mut table = self.table.lock();
        let removed = match table.locks.get_by_id(id).map(|lo| lo.path.clone()) {
            Some(path) => {
                table.locks.expire_region(&path, Instant::now());
                table.locks.remove_owner(&path, owner)
            }
            None => false,
        };
        table.tick();
        removed
    }

    /// Release a temporary lock. Always called when a handler leaves its
    /// critical section; [`TempLockGuard`] does that on drop.
    pub fn unlock_temporary_locked_objects(&self, path: &str, owner: &str) {
        let key = lock_key(path);
        let mut table = self.table.lock();
        if !table.temp_locks.remove_owner(&key, owner) {
            debug!("locktable: no temporary lock on {} for {}", key, owner);
        }
        table.tick();
    }

    /// Drop every persistent lock on `path` and below it, whoever holds
    /// them. Used when the resources themselves are gone.
    pub fn remove_locks(&self, path: &str) -> usize {
        let key = lock_key(path);
        let mut table = self.table.lock();
        let removed = table.locks.remove_subtree(&key);
        if removed > 0 {
            debug!("locktable: dropped {} locks at or below {}", removed, key);
        }
        table.tick();
        removed
    }

    /// Remove every lock in the given tree whose timeout has passed.
    pub fn check_timeouts(&self, temporary: bool) {
        let mut table = self.table.lock();
        table.tree(temporary).expire_all(Instant::now());
    }

    /// Push the expiry of the persistent lock `id` forward.
    pub fn refresh(&self, id: &str, timeout: Duration) -> Option<LockedObject> {
        let mut table = self.table.lock();
        let path = table.locks.get_by_id(id)?.path.clone();
        table.locks.expire_path(&path, Instant::now());
        table.locks.refresh(id, timeout).cloned()
    }

    fn get_by_path(&self, path: &str, temporary: bool) -> Option<LockedObject> {
        let key = lock_key(path);
        let mut table = self.table.lock();
        let tree = table.tree(temporary);
        tree.expire_path(&key, Instant::now());
        tree.get(&key).cloned()
    }

    fn get_by_id(&self, id: &str, temporary: bool) -> Option<LockedObject> {
        let mut table = self.table.lock();
        let tree = table.tree(temporary);
        let path = tree.get_by_id(id)?.path.clone();
        tree.expire_path(&path, Instant::now());
        tree.get_by_id(id).cloned()
    }

    pub fn get_locked_object_by_path(&self, path: &str) -> Option<LockedObject> {
        self.get_by_path(path, false)
    }

    pub fn get_locked_object_by_id(&self, id: &str) -> Option<LockedObject> {
        self.get_by_id(id, false)
    }

    pub fn get_temp_locked_object_by_path(&self, path: &str) -> Option<LockedObject> {
        self.get_by_path(path, true)
    }

    pub fn get_temp_locked_object_by_id(&self, id: &str) -> Option<LockedObject> {
        self.get_by_id(id, true)
    }

    /// Persistent locks that apply to `path`: a lock on the path itself,
    /// and locks on ancestors that cover their subtree.
    pub fn covering_locks(&self, path: &str) -> Vec<LockedObject> {
        let key = lock_key(path);
        let now = Instant::now();
        let table = self.table.lock();
        let mut res = Vec::new();
        let mut cur = Some(key.as_str());
        while let Some(p) = cur {
            if let Some(lo) = table.locks.get(p) {
                let covers = p == key || lo.depth != Depth::Zero;
                if lo.has_owners() && !lo.has_expired(now) && covers {
                    res.push(lo.clone());
                }
            }
            cur = parent_path(p);
        }
        res
    }

    /// Take a temporary lock, released when the guard is dropped.
    ///
    /// Returns `Ok(None)` if the path is busy.
    pub fn temp_lock(
        self: &Arc<Self>,
        path: &str,
        owner: String,
        exclusive: bool,
        depth: Depth,
    ) -> Result<Option<TempLockGuard>, LockError> {
        if !self.lock(path, &owner, exclusive, depth, TEMP_TIMEOUT, true)? {
            return Ok(None);
        }
        Ok(Some(TempLockGuard {
            locks: self.clone(),
            path: path.to_string(),
            owner,
        }))
    }
}

/// A held temporary lock. Dropping it releases the lock, on every exit
/// path of the handler that took it.
#[derive(Debug)]
pub struct TempLockGuard {
    locks: Arc<ResourceLocks>,
    path: String,
    owner: String,
}

impl TempLockGuard {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for TempLockGuard {
    fn drop(&mut self) {
        self.locks
            .unlock_temporary_locked_objects(&self.path, &self.owner);
    }
}
