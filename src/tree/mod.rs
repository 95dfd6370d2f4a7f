//! B+ tree over the disk storage engine.
//!
//! The tree layer never constructs identifiers; it receives them back from
//! the store when nodes are written. Mutated nodes are rewritten in place
//! (invalidate, then write); only splits allocate new nodes.

use tracing::debug;

use crate::disk::Disk;
use crate::error::{Result, StoreError};
use crate::node::{InnerNode, LeafNode, Node};
use crate::types::Pid;

/// A B+ tree bound to one store.
pub struct Bptree {
    disk: Disk,
    root: Pid,
    height: u64,
    key_count: u64,
}

impl Bptree {
    /// Starts a fresh tree on a newly created store: one empty root leaf.
    pub fn create(mut disk: Disk) -> Result<Self> {
        let mut root = Node::Leaf(LeafNode::new());
        disk.write_node(&mut root, true)?;
        let root_pid = root.pid();
        disk.set_tree_root(Some(root_pid));
        let offsets = [
            disk.super_block().next_write_offset(0),
            disk.super_block().next_write_offset(1),
            disk.super_block().next_write_offset(2),
            disk.super_block().next_write_offset(3),
        ];
        disk.update_super_block(1, offsets, 0)?;
        Ok(Self {
            disk,
            root: root_pid,
            height: 1,
            key_count: 0,
        })
    }

    /// Binds to the tree persisted in an opened store.
    pub fn open(disk: Disk) -> Result<Self> {
        let root = disk
            .super_block()
            .root()
            .ok_or(StoreError::Corruption("store records no tree root"))?;
        let height = disk.super_block().height();
        let key_count = disk.super_block().key_count();
        Ok(Self {
            disk,
            root,
            height,
            key_count,
        })
    }

    /// Number of keys currently in the tree.
    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    /// Current tree height (a lone root leaf has height 1).
    pub fn height(&self) -> u64 {
        self.height
    }

    /// The underlying store.
    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    /// Looks a key up, returning the stored value slot.
    pub fn search(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
        let mut pid = self.root;
        let mut level = 0usize;
        loop {
            let node = self.fetch(pid)?;
            self.note_hot(level, pid);
            match node {
                Node::Inner(inner) => {
                    pid = route(&inner, key);
                    level += 1;
                }
                Node::Leaf(leaf) => {
                    return Ok(leaf
                        .entries
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| v.clone()));
                }
            }
        }
    }

    /// Inserts a key/value pair, replacing the value if the key exists.
    /// Values are padded or truncated to the configured slot width by the
    /// storage layer.
    pub fn insert(&mut self, key: u64, value: &[u8]) -> Result<()> {
        // Descend, remembering the routing decision at every inner level.
        let mut path: Vec<(InnerNode, usize)> = Vec::new();
        let mut pid = self.root;
        let mut leaf = loop {
            match self.fetch(pid)? {
                Node::Inner(inner) => {
                    let idx = route_index(&inner, key);
                    pid = inner.children[idx];
                    path.push((inner, idx));
                }
                Node::Leaf(leaf) => break leaf,
            }
        };

        match leaf.entries.binary_search_by_key(&key, |(k, _)| *k) {
            Ok(at) => {
                leaf.entries[at].1 = value.to_vec();
                let mut node = Node::Leaf(leaf);
                self.rewrite(&mut node)?;
                return Ok(());
            }
            Err(at) => leaf.entries.insert(at, (key, value.to_vec())),
        }
        self.key_count += 1;

        if leaf.entries.len() <= self.disk.codec().leaf_degree() {
            let mut node = Node::Leaf(leaf);
            self.rewrite(&mut node)?;
            return Ok(());
        }

        // Leaf overflow: split and push the separator up the path.
        let mid = leaf.entries.len() / 2;
        let mut right = LeafNode::new();
        right.entries = leaf.entries.split_off(mid);
        right.next = leaf.next;
        let separator = right.entries[0].0;
        let mut right_node = Node::Leaf(right);
        self.disk.write_node(&mut right_node, true)?;
        leaf.next = right_node.pid();
        let mut left_node = Node::Leaf(leaf);
        self.rewrite(&mut left_node)?;
        debug!(separator, right = %right_node.pid(), "leaf split");

        self.propagate_split(path, separator, right_node.pid())
    }

    fn propagate_split(
        &mut self,
        mut path: Vec<(InnerNode, usize)>,
        mut separator: u64,
        mut new_child: Pid,
    ) -> Result<()> {
        while let Some((mut inner, idx)) = path.pop() {
            inner.keys.insert(idx, separator);
            inner.children.insert(idx + 1, new_child);
            if inner.keys.len() <= self.disk.codec().inner_degree() {
                let mut node = Node::Inner(inner);
                self.rewrite(&mut node)?;
                return Ok(());
            }

            let mid = inner.keys.len() / 2;
            let promoted = inner.keys[mid];
            let mut right = InnerNode::new(
                inner.keys.split_off(mid + 1),
                inner.children.split_off(mid + 1),
            );
            inner.keys.truncate(mid);
            right.next = inner.next;
            let mut right_node = Node::Inner(right);
            self.disk.write_node(&mut right_node, true)?;
            inner.next = right_node.pid();
            let mut left_node = Node::Inner(inner);
            self.rewrite(&mut left_node)?;
            debug!(promoted, right = %right_node.pid(), "inner split");

            separator = promoted;
            new_child = right_node.pid();
        }

        // The root itself split: grow the tree by one level.
        let old_root = self.root;
        let mut new_root = Node::Inner(InnerNode::new(
            vec![separator],
            vec![old_root, new_child],
        ));
        self.disk.write_node(&mut new_root, true)?;
        self.root = new_root.pid();
        self.height += 1;
        debug!(root = %self.root, height = self.height, "tree grew");
        Ok(())
    }

    /// Checkpoints height, allocation cursors, key count, and root, then
    /// closes the store.
    pub fn close(mut self) -> Result<()> {
        let offsets = [
            self.disk.super_block().next_write_offset(0),
            self.disk.super_block().next_write_offset(1),
            self.disk.super_block().next_write_offset(2),
            self.disk.super_block().next_write_offset(3),
        ];
        self.disk.set_tree_root(Some(self.root));
        self.disk
            .update_super_block(self.height, offsets, self.key_count)?;
        self.disk.close()
    }

    fn fetch(&mut self, pid: Pid) -> Result<Node> {
        self.disk
            .read_node(pid)?
            .ok_or(StoreError::Corruption("dangling node identifier"))
    }

    fn rewrite(&mut self, node: &mut Node) -> Result<()> {
        self.disk.invalidate(node.pid());
        self.disk.write_node(node, false)
    }

    // Advisory: remember the hot path in the persistent cache index. A
    // level that does not fit the reserved region is simply not recorded.
    fn note_hot(&mut self, level: usize, pid: Pid) {
        if let Err(e) = self.disk.cache_block_mut().note(level, pid) {
            debug!(level, error = %e, "cache index not updated");
        }
    }
}

/// Child identifier a key routes to inside an inner node.
fn route(inner: &InnerNode, key: u64) -> Pid {
    inner.children[route_index(inner, key)]
}

/// Index of the child covering `key`: separators hold the smallest key of
/// the subtree to their right.
fn route_index(inner: &InnerNode, key: u64) -> usize {
    inner.keys.partition_point(|&k| k <= key)
}
