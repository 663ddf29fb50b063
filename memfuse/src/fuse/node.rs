use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::fs::types::{FileStat, InodeId};

/// The stable per-inode handle returned to the kernel. The cache below
/// guarantees the same `Arc<Node>` is handed out for the same inode
/// number for as long as the kernel holds a reference, so node identity
/// survives across protocol calls.
pub struct Node {
    ino: InodeId,
    attr: Mutex<Option<FileStat>>,
    lookups: AtomicU64,
}

impl Node {
    fn new(ino: InodeId, attr: Option<FileStat>) -> Self {
        Self {
            ino,
            attr: Mutex::new(attr),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn ino(&self) -> InodeId {
        self.ino
    }

    /// The most recent stat record seen for this inode, if any.
    pub fn attr(&self) -> Option<FileStat> {
        *self.attr.lock()
    }

    pub fn update(&self, stat: &FileStat) {
        *self.attr.lock() = Some(*stat);
    }
}

/// Maps inode numbers to their node handles. Guarded by its own mutex,
/// distinct from the backend's inode table lock.
pub struct NodeCache {
    nodes: Mutex<HashMap<InodeId, Arc<Node>>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the handle for `ino`, creating it on first reference.
    /// Each call accounts for one kernel lookup, balanced later by
    /// `forget`. A provided stat refreshes the cached attributes.
    pub fn load_node(&self, ino: InodeId, stat: Option<&FileStat>) -> Arc<Node> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .entry(ino)
            .or_insert_with(|| Arc::new(Node::new(ino, stat.copied())))
            .clone();
        if let Some(stat) = stat {
            node.update(stat);
        }
        node.lookups.fetch_add(1, Ordering::Relaxed);
        node
    }

    pub fn get(&self, ino: InodeId) -> Option<Arc<Node>> {
        self.nodes.lock().get(&ino).cloned()
    }

    /// Gives back `nlookup` kernel references; the handle is dropped
    /// once none remain.
    pub fn forget(&self, ino: InodeId, nlookup: u64) {
        let mut nodes = self.nodes.lock();
        if let Some(node) = nodes.get(&ino) {
            let before = node.lookups.fetch_sub(nlookup, Ordering::Relaxed);
            if before <= nlookup {
                debug!("forget: dropping node for inode {}", ino);
                nodes.remove(&ino);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.nodes.lock().len()
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::types::{S_IFREG, BLOCK_SIZE};
    use std::time::SystemTime;

    fn stat(ino: InodeId) -> FileStat {
        let now = SystemTime::now();
        FileStat {
            ino,
            mode: S_IFREG | 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            blksize: BLOCK_SIZE as u32,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
        }
    }

    #[test]
    fn test_same_node_for_same_inode() {
        let cache = NodeCache::new();
        let first = cache.load_node(5, None);
        let second = cache.load_node(5, None);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.ino(), 5);

        let other = cache.load_node(6, None);
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_load_node_refreshes_attr() {
        let cache = NodeCache::new();
        let node = cache.load_node(5, None);
        assert!(node.attr().is_none());

        let mut s = stat(5);
        s.size = 42;
        cache.load_node(5, Some(&s));
        assert_eq!(node.attr().unwrap().size, 42);
    }

    #[test]
    fn test_forget_balances_lookups() {
        let cache = NodeCache::new();
        cache.load_node(5, None);
        cache.load_node(5, None);
        cache.load_node(5, None);
        assert_eq!(cache.len(), 1);

        cache.forget(5, 2);
        assert_eq!(cache.len(), 1);
        cache.forget(5, 1);
        assert_eq!(cache.len(), 0);

        // Forgetting an unknown inode is a no-op.
        cache.forget(99, 1);
    }
}
