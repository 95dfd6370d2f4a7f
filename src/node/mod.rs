//! The two persisted node shapes of the B+ tree.

use crate::types::Pid;

pub mod codec;

pub use codec::NodeCodec;

/// An inner (index) node: up to N keys routing into N+1 children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerNode {
    /// Persistent identifier, assigned by the store on first write.
    pub pid: Pid,
    /// Versioned identifier; mirrors `pid` at allocation.
    pub vid: Pid,
    /// Right sibling, or [`Pid::NULL`].
    pub next: Pid,
    /// Separator keys, ascending.
    pub keys: Vec<u64>,
    /// Child identifiers; always one more than `keys`.
    pub children: Vec<Pid>,
}

impl InnerNode {
    /// An unallocated inner node with the given routing entries.
    pub fn new(keys: Vec<u64>, children: Vec<Pid>) -> Self {
        Self {
            pid: Pid::NULL,
            vid: Pid::NULL,
            next: Pid::NULL,
            keys,
            children,
        }
    }
}

/// A leaf node: up to M key/value pairs plus a right-sibling link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Persistent identifier, assigned by the store on first write.
    pub pid: Pid,
    /// Versioned identifier; mirrors `pid` at allocation.
    pub vid: Pid,
    /// Right sibling, or [`Pid::NULL`].
    pub next: Pid,
    /// Key/value pairs, ascending by key. Values occupy fixed-width slots
    /// on disk; see [`codec::NodeCodec`].
    pub entries: Vec<(u64, Vec<u8>)>,
}

impl LeafNode {
    /// An unallocated empty leaf.
    pub fn new() -> Self {
        Self {
            pid: Pid::NULL,
            vid: Pid::NULL,
            next: Pid::NULL,
            entries: Vec::new(),
        }
    }
}

impl Default for LeafNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A persisted tree node, discriminated on disk by the tag byte's high bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Index node.
    Inner(InnerNode),
    /// Data node.
    Leaf(LeafNode),
}

impl Node {
    /// The node's persistent identifier.
    pub fn pid(&self) -> Pid {
        match self {
            Node::Inner(n) => n.pid,
            Node::Leaf(n) => n.pid,
        }
    }

    /// Assigns both identifiers, as done at allocation time.
    pub fn set_ids(&mut self, pid: Pid) {
        match self {
            Node::Inner(n) => {
                n.pid = pid;
                n.vid = pid;
            }
            Node::Leaf(n) => {
                n.pid = pid;
                n.vid = pid;
            }
        }
    }

    /// True for the inner variant.
    pub fn is_inner(&self) -> bool {
        matches!(self, Node::Inner(_))
    }
}
