//
// Arena of lock nodes for one namespace.
//
// Nodes are keyed by path; parent and child links are path keys into the
// same map. The root node "/" always exists and is never removed.
//
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::{lock_key, LockError, LockType, MAX_TIMEOUT};
use crate::davheaders::Depth;

pub(crate) const ROOT: &str = "/";

/// The lock node for one path.
///
/// Values handed out by [`ResourceLocks`](super::ResourceLocks) are
/// snapshots; mutating them has no effect on the lock table.
#[derive(Debug, Clone)]
pub struct LockedObject {
    pub(crate) path: String,
    pub(crate) id: Option<String>,
    pub(crate) lock_type: LockType,
    pub(crate) exclusive: bool,
    pub(crate) depth: Depth,
    pub(crate) expires_at: Option<Instant>,
    pub(crate) timeout: Duration,
    pub(crate) owners: Vec<String>,
    pub(crate) parent: Option<String>,
    pub(crate) children: BTreeSet<String>,
}

impl LockedObject {
    fn new(path: &str, lock_type: LockType, parent: Option<String>) -> LockedObject {
        LockedObject {
            path: path.to_string(),
            id: None,
            lock_type,
            exclusive: false,
            depth: Depth::Zero,
            expires_at: None,
            timeout: Duration::ZERO,
            owners: Vec::new(),
            parent,
            children: BTreeSet::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The lock token. Only set while the node has owners.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_shared(&self) -> bool {
        !self.exclusive
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn owners(&self) -> &[String] {
        &self.owners
    }

    pub fn has_owners(&self) -> bool {
        !self.owners.is_empty()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.as_str())
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Timeout that was requested when the lock was last set or refreshed.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Seconds left before the lock expires.
    pub fn remaining(&self) -> Duration {
        self.expires_at
            .map(|t| t.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Does this lock apply to `path`? That is the locked node itself, or
    /// a node below it if the lock has depth.
    pub fn covers(&self, path: &str) -> bool {
        let key = lock_key(path);
        if key == self.path {
            return true;
        }
        if self.depth == Depth::Zero {
            return false;
        }
        self.path == ROOT
            || key
                .strip_prefix(self.path.as_str())
                .map_or(false, |rest| rest.starts_with('/'))
    }

    pub fn has_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if now > t)
    }

    // does an existing lock on this node conflict with a new one?
    fn conflicts(&self, owner: &str, exclusive: bool, now: Instant) -> bool {
        if self.owners.is_empty() || self.has_expired(now) {
            return false;
        }
        if !(self.exclusive || exclusive) {
            return false;
        }
        self.owners.iter().any(|o| o != owner)
    }
}

// parent directory of a normalized path. "/" has no parent.
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => Some(ROOT),
    }
}

/// One tree of lock nodes plus its path and id indices.
#[derive(Debug)]
pub(crate) struct LockTree {
    lock_type: LockType,
    nodes: HashMap<String, LockedObject>,
    by_id: HashMap<String, String>,
}

impl LockTree {
    pub(crate) fn new(lock_type: LockType) -> LockTree {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_string(), LockedObject::new(ROOT, lock_type, None));
        LockTree {
            lock_type,
            nodes,
            by_id: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, path: &str) -> Option<&LockedObject> {
        self.nodes.get(path)
    }

    pub(crate) fn get_by_id(&self, id: &str) -> Option<&LockedObject> {
        self.by_id.get(id).and_then(|p| self.nodes.get(p))
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    // Make sure a node exists for path and all of its ancestors.
    pub(crate) fn generate(&mut self, path: &str) -> Result<(), LockError> {
        let mut missing = Vec::new();
        let mut cur = Some(path);
        while let Some(p) = cur {
            if self.nodes.contains_key(p) {
                break;
            }
            missing.push(p.to_string());
            cur = parent_path(p);
        }
        // create top-down so every parent exists before its child links in.
        for p in missing.into_iter().rev() {
            let parent = parent_path(&p)
                .ok_or_else(|| LockError::LockFailed(format!("no parent for {}", p)))?
                .to_string();
            let pnode = self
                .nodes
                .get_mut(&parent)
                .ok_or_else(|| LockError::LockFailed(format!("missing ancestor {}", parent)))?;
            pnode.children.insert(p.clone());
            trace!("locktable: new node {} under {}", p, parent);
            let node = LockedObject::new(&p, self.lock_type, Some(parent));
            self.nodes.insert(p, node);
        }
        Ok(())
    }

    // Can "owner" place a lock on path? The node and its ancestors must
    // exist already (see generate).
    pub(crate) fn can_lock(&self, path: &str, owner: &str, exclusive: bool, depth: Depth) -> bool {
        let now = Instant::now();

        let mut cur = Some(path);
        while let Some(p) = cur {
            match self.nodes.get(p) {
                Some(node) if node.conflicts(owner, exclusive, now) => return false,
                _ => {}
            }
            cur = parent_path(p);
        }

        if depth == Depth::Zero {
            return true;
        }
        let mut stack: Vec<&str> = match self.nodes.get(path) {
            Some(node) => node.children.iter().map(|c| c.as_str()).collect(),
            None => return true,
        };
        while let Some(p) = stack.pop() {
            if let Some(node) = self.nodes.get(p) {
                if node.conflicts(owner, exclusive, now) {
                    return false;
                }
                stack.extend(node.children.iter().map(|c| c.as_str()));
            }
        }
        true
    }

    // Register owner on the node at path. Returns false if the owner was
    // already registered, in which case only the expiry is pushed forward.
    pub(crate) fn add_owner(
        &mut self,
        path: &str,
        owner: &str,
        exclusive: bool,
        depth: Depth,
        timeout: Duration,
    ) -> Result<bool, LockError> {
        let timeout = timeout.min(MAX_TIMEOUT);
        let expires_at = Instant::now() + timeout;
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| LockError::LockFailed(format!("no lock node for {}", path)))?;

        let added = if node.owners.is_empty() {
            let id = Uuid::new_v4().to_string();
            node.id = Some(id.clone());
            node.exclusive = exclusive;
            node.depth = depth;
            node.expires_at = Some(expires_at);
            node.timeout = timeout;
            node.owners.push(owner.to_string());
            self.by_id.insert(id, path.to_string());
            true
        } else {
            node.timeout = timeout;
            node.expires_at = Some(node.expires_at.map_or(expires_at, |t| t.max(expires_at)));
            if node.owners.iter().any(|o| o == owner) {
                if node.owners.len() == 1 {
                    node.exclusive = exclusive;
                    node.depth = depth;
                }
                false
            } else {
                node.owners.push(owner.to_string());
                true
            }
        };

        // structural ancestors follow their youngest child.
        if let Some(parent) = node.parent.clone() {
            if let Some(pnode) = self.nodes.get_mut(&parent) {
                if pnode.owners.is_empty() {
                    pnode.expires_at = Some(pnode.expires_at.map_or(expires_at, |t| t.max(expires_at)));
                }
            }
        }
        Ok(added)
    }

    // Push the expiry of a held lock forward.
    pub(crate) fn refresh(&mut self, id: &str, timeout: Duration) -> Option<&LockedObject> {
        let path = self.by_id.get(id)?.clone();
        let node = self.nodes.get_mut(&path)?;
        let timeout = timeout.min(MAX_TIMEOUT);
        node.timeout = timeout;
        node.expires_at = Some(Instant::now() + timeout);
        Some(&*node)
    }

    // Remove owner from the node at path. The node is pruned when it has
    // no owners and no children left.
    pub(crate) fn remove_owner(&mut self, path: &str, owner: &str) -> bool {
        let node = match self.nodes.get_mut(path) {
            Some(node) => node,
            None => return false,
        };
        let before = node.owners.len();
        node.owners.retain(|o| o != owner);
        if node.owners.len() == before {
            return false;
        }
        if node.owners.is_empty() {
            self.release(path);
        }
        self.prune(path);
        true
    }

    // forget everything about the lock on this node, keep the node.
    fn release(&mut self, path: &str) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.owners.clear();
            node.exclusive = false;
            node.depth = Depth::Zero;
            if let Some(id) = node.id.take() {
                self.by_id.remove(&id);
            }
        }
    }

    // Remove the node if it is garbage, then walk up and do the same
    // for the ancestors it was keeping alive.
    pub(crate) fn prune(&mut self, path: &str) {
        let mut cur = Some(path.to_string());
        while let Some(p) = cur.take() {
            if p == ROOT {
                break;
            }
            let parent = match self.nodes.get(&p) {
                Some(node) if node.owners.is_empty() && node.children.is_empty() => {
                    node.parent.clone()
                }
                _ => break,
            };
            self.nodes.remove(&p);
            trace!("locktable: removed node {}", p);
            if let Some(parent) = parent {
                if let Some(pnode) = self.nodes.get_mut(&parent) {
                    pnode.children.remove(&p);
                }
                cur = Some(parent);
            }
        }
    }

    // Drop the owners of an expired node at path.
    pub(crate) fn expire_path(&mut self, path: &str, now: Instant) {
        let expired = self
            .nodes
            .get(path)
            .map(|n| n.has_expired(now))
            .unwrap_or(false);
        if expired {
            self.expire_node(path);
        }
    }

    fn expire_node(&mut self, path: &str) {
        debug!("locktable: lock on {} expired", path);
        self.release(path);
        if let Some(node) = self.nodes.get_mut(path) {
            node.expires_at = None;
        }
        self.prune(path);
    }

    // Expire nodes on the ancestor chain of path and in its subtree.
    pub(crate) fn expire_region(&mut self, path: &str, now: Instant) {
        let mut expired = Vec::new();
        let mut cur = Some(path);
        while let Some(p) = cur {
            if let Some(node) = self.nodes.get(p) {
                if node.has_expired(now) {
                    expired.push(p.to_string());
                }
            }
            cur = parent_path(p);
        }
        if let Some(node) = self.nodes.get(path) {
            let mut stack: Vec<&String> = node.children.iter().collect();
            while let Some(p) = stack.pop() {
                if let Some(node) = self.nodes.get(p) {
                    if node.has_expired(now) {
                        expired.push(p.clone());
                    }
                    stack.extend(node.children.iter());
                }
            }
        }
        // children before parents, so pruning can cascade upwards.
        expired.sort_by_key(|p| std::cmp::Reverse(p.len()));
        for p in expired {
            self.expire_path(&p, now);
        }
    }

    // Expire every node in the tree. Returns the number of expired locks.
    pub(crate) fn expire_all(&mut self, now: Instant) -> usize {
        let mut expired: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.has_expired(now))
            .map(|n| n.path.clone())
            .collect();
        expired.sort_by_key(|p| std::cmp::Reverse(p.len()));
        let count = expired.len();
        for p in expired {
            if self.nodes.contains_key(&p) {
                self.expire_node(&p);
            }
        }
        count
    }

    // Drop every lock on path and below it, and the nodes that were only
    // there for them. Returns the number of locks dropped.
    pub(crate) fn remove_subtree(&mut self, path: &str) -> usize {
        let mut held = Vec::new();
        let mut stack = vec![path.to_string()];
        while let Some(p) = stack.pop() {
            if let Some(node) = self.nodes.get(&p) {
                if node.has_owners() {
                    held.push(p.clone());
                }
                stack.extend(node.children.iter().cloned());
            }
        }
        for p in &held {
            self.release(p);
        }
        self.cleanup(path);
        held.len()
    }

    // Full cleanup: recursively remove owner-less leaves, bottom-up.
    // Returns true if the node at path itself was removed.
    pub(crate) fn cleanup(&mut self, path: &str) -> bool {
        let children: Vec<String> = match self.nodes.get(path) {
            Some(node) => node.children.iter().cloned().collect(),
            None => return true,
        };
        for child in &children {
            self.cleanup(child);
        }
        let garbage = match self.nodes.get(path) {
            Some(node) => node.owners.is_empty() && node.children.is_empty(),
            None => return true,
        };
        if garbage && path != ROOT {
            self.prune(path);
            return !self.nodes.contains_key(path);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/a/b/c"), Some("/a/b"));
    }

    #[test]
    fn test_generate_links_ancestors() {
        let mut tree = LockTree::new(LockType::Write);
        tree.generate("/a/b/c").unwrap();
        assert_eq!(tree.len(), 4);
        let b = tree.get("/a/b").unwrap();
        assert_eq!(b.parent(), Some("/a"));
        assert_eq!(b.children().collect::<Vec<_>>(), vec!["/a/b/c"]);
        assert!(tree.get("/").unwrap().children.contains("/a"));
    }

    #[test]
    fn test_cleanup_keeps_owned_nodes() {
        let mut tree = LockTree::new(LockType::Write);
        tree.generate("/a/b").unwrap();
        tree.generate("/x/y/z").unwrap();
        tree.add_owner("/a/b", "me", true, Depth::Zero, Duration::from_secs(60))
            .unwrap();
        tree.cleanup(ROOT);
        assert!(tree.get("/a/b").is_some());
        assert!(tree.get("/a").is_some());
        assert!(tree.get("/x").is_none());
        assert!(tree.get("/x/y/z").is_none());
        assert!(!tree.get(ROOT).unwrap().children.contains("/x"));
    }

    #[test]
    fn test_covers() {
        let mut tree = LockTree::new(LockType::Write);
        tree.generate("/a/b").unwrap();
        tree.add_owner("/a/b", "me", true, Depth::Zero, Duration::from_secs(60))
            .unwrap();
        let lo = tree.get("/a/b").unwrap();
        assert!(lo.covers("/a/b"));
        assert!(lo.covers("/a/b/"));
        assert!(!lo.covers("/a/b/c"));
        assert!(!lo.covers("/a"));

        tree.add_owner("/a", "me", true, Depth::Infinity, Duration::from_secs(60))
            .unwrap();
        let lo = tree.get("/a").unwrap();
        assert!(lo.covers("/a/b/c"));
        assert!(!lo.covers("/ab"));
        assert!(!lo.covers("/"));
    }

    #[test]
    fn test_remove_subtree() {
        let mut tree = LockTree::new(LockType::Write);
        for p in &["/d/x", "/d/y/z", "/e"] {
            tree.generate(p).unwrap();
            tree.add_owner(p, "me", true, Depth::Zero, Duration::from_secs(60))
                .unwrap();
        }
        assert_eq!(tree.remove_subtree("/d"), 2);
        assert!(tree.get("/d").is_none());
        assert!(tree.get("/d/y/z").is_none());
        assert!(tree.get("/e").unwrap().has_owners());
        assert_eq!(tree.by_id.len(), 1);
        assert!(!tree.get(ROOT).unwrap().children.contains("/d"));
    }

    #[test]
    fn test_timeout_is_clamped() {
        let mut tree = LockTree::new(LockType::Write);
        tree.generate("/big").unwrap();
        tree.add_owner("/big", "me", true, Depth::Zero, Duration::MAX)
            .unwrap();
        let lo = tree.get("/big").unwrap();
        assert_eq!(lo.timeout(), MAX_TIMEOUT);
        assert!(lo.remaining() <= MAX_TIMEOUT);

        let id = lo.id().unwrap().to_string();
        let lo = tree.refresh(&id, Duration::MAX).unwrap();
        assert_eq!(lo.timeout(), MAX_TIMEOUT);
    }
}
