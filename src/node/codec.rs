//! Fixed-length binary encoding of tree nodes.
//!
//! A record is one tag byte followed by a payload whose length is fully
//! determined by the configured degree parameters: no length prefix exists.
//! Inner payloads are `(2N+4)*8 + 4` bytes, leaf payloads
//! `4 + (M+3)*8 + M*pad` bytes. All integers are big-endian. The tag byte's
//! high bit selects the variant; the remaining bits are reserved and zero.

use crate::config::TreeConfig;
use crate::crypto;
use crate::error::{Result, StoreError};
use crate::node::{InnerNode, LeafNode, Node};
use crate::types::Pid;

/// High bit of the tag byte; set for inner nodes.
pub const TAG_INNER_BIT: u8 = 0x80;

/// Encoder/decoder for one store's node geometry.
#[derive(Debug, Clone, Copy)]
pub struct NodeCodec {
    inner_degree: usize,
    leaf_degree: usize,
    value_pad_len: usize,
}

impl NodeCodec {
    /// Builds a codec from the configured tree geometry.
    pub fn new(tree: &TreeConfig) -> Self {
        Self {
            inner_degree: tree.inner_degree,
            leaf_degree: tree.leaf_degree,
            value_pad_len: tree.value_pad_len,
        }
    }

    /// Maximum keys per inner node.
    pub fn inner_degree(&self) -> usize {
        self.inner_degree
    }

    /// Maximum entries per leaf node.
    pub fn leaf_degree(&self) -> usize {
        self.leaf_degree
    }

    /// Fixed width of a leaf value slot.
    pub fn value_pad_len(&self) -> usize {
        self.value_pad_len
    }

    /// True if the tag byte announces an inner node.
    pub fn is_inner_tag(tag: u8) -> bool {
        tag & TAG_INNER_BIT != 0
    }

    /// Payload length (bytes after the tag) for the given variant.
    pub fn payload_len(&self, inner: bool) -> usize {
        if inner {
            (2 * self.inner_degree + 4) * 8 + 4
        } else {
            4 + (self.leaf_degree + 3) * 8 + self.leaf_degree * self.value_pad_len
        }
    }

    /// Full on-disk record length for the given variant, accounting for
    /// cipher padding when encryption is enabled.
    pub fn stored_len(&self, inner: bool, encrypted: bool) -> usize {
        let payload = self.payload_len(inner);
        if encrypted {
            1 + crypto::padded_len(payload)
        } else {
            1 + payload
        }
    }

    /// Encodes a node into its fixed-length record (tag byte first).
    pub fn encode(&self, node: &Node) -> Result<Vec<u8>> {
        match node {
            Node::Inner(inner) => self.encode_inner(inner),
            Node::Leaf(leaf) => self.encode_leaf(leaf),
        }
    }

    fn encode_inner(&self, node: &InnerNode) -> Result<Vec<u8>> {
        let n = self.inner_degree;
        if node.keys.len() > n {
            return Err(StoreError::Invalid(format!(
                "inner node holds {} keys, degree is {n}",
                node.keys.len()
            )));
        }
        if node.children.len() != node.keys.len() + 1 {
            return Err(StoreError::Invalid(format!(
                "inner node holds {} keys but {} children",
                node.keys.len(),
                node.children.len()
            )));
        }
        let mut buf = Vec::with_capacity(1 + self.payload_len(true));
        buf.push(TAG_INNER_BIT);
        put_u64(&mut buf, node.pid.raw());
        put_u64(&mut buf, node.vid.raw());
        put_u64(&mut buf, node.next.raw());
        put_u32(&mut buf, node.keys.len() as u32);
        for slot in 0..n {
            put_u64(&mut buf, node.keys.get(slot).copied().unwrap_or(0));
        }
        for slot in 0..n + 1 {
            put_u64(&mut buf, node.children.get(slot).copied().map(Pid::raw).unwrap_or(0));
        }
        debug_assert_eq!(buf.len(), 1 + self.payload_len(true));
        Ok(buf)
    }

    fn encode_leaf(&self, node: &LeafNode) -> Result<Vec<u8>> {
        let m = self.leaf_degree;
        if node.entries.len() > m {
            return Err(StoreError::Invalid(format!(
                "leaf node holds {} entries, degree is {m}",
                node.entries.len()
            )));
        }
        let mut buf = Vec::with_capacity(1 + self.payload_len(false));
        buf.push(0);
        put_u64(&mut buf, node.pid.raw());
        put_u64(&mut buf, node.vid.raw());
        put_u64(&mut buf, node.next.raw());
        put_u32(&mut buf, node.entries.len() as u32);
        for slot in 0..m {
            put_u64(&mut buf, node.entries.get(slot).map(|(k, _)| *k).unwrap_or(0));
        }
        for slot in 0..m {
            match node.entries.get(slot) {
                Some((_, value)) => {
                    // Pad or truncate to the fixed slot width.
                    let take = value.len().min(self.value_pad_len);
                    buf.extend_from_slice(&value[..take]);
                    buf.resize(buf.len() + (self.value_pad_len - take), 0);
                }
                None => buf.resize(buf.len() + self.value_pad_len, 0),
            }
        }
        debug_assert_eq!(buf.len(), 1 + self.payload_len(false));
        Ok(buf)
    }

    /// Decodes a plaintext record (tag byte first) back into a node.
    ///
    /// Dispatches purely on the tag byte; truncated or oversized input is a
    /// corruption error.
    pub fn decode(&self, record: &[u8]) -> Result<Node> {
        let (&tag, payload) = record
            .split_first()
            .ok_or(StoreError::Corruption("empty node record"))?;
        if Self::is_inner_tag(tag) {
            self.decode_inner(payload)
        } else {
            self.decode_leaf(payload)
        }
    }

    fn decode_inner(&self, payload: &[u8]) -> Result<Node> {
        let n = self.inner_degree;
        if payload.len() != self.payload_len(true) {
            return Err(StoreError::Corruption("inner node record length mismatch"));
        }
        let mut pos = 0;
        let pid = Pid::from_raw(get_u64(payload, &mut pos));
        let vid = Pid::from_raw(get_u64(payload, &mut pos));
        let next = Pid::from_raw(get_u64(payload, &mut pos));
        let nkeys = get_u32(payload, &mut pos) as usize;
        if nkeys > n {
            return Err(StoreError::Corruption("inner node key count exceeds degree"));
        }
        let mut keys = Vec::with_capacity(nkeys);
        for slot in 0..n {
            let key = get_u64(payload, &mut pos);
            if slot < nkeys {
                keys.push(key);
            }
        }
        let mut children = Vec::with_capacity(nkeys + 1);
        for slot in 0..n + 1 {
            let child = get_u64(payload, &mut pos);
            if slot < nkeys + 1 {
                children.push(Pid::from_raw(child));
            }
        }
        Ok(Node::Inner(InnerNode {
            pid,
            vid,
            next,
            keys,
            children,
        }))
    }

    fn decode_leaf(&self, payload: &[u8]) -> Result<Node> {
        let m = self.leaf_degree;
        if payload.len() != self.payload_len(false) {
            return Err(StoreError::Corruption("leaf node record length mismatch"));
        }
        let mut pos = 0;
        let pid = Pid::from_raw(get_u64(payload, &mut pos));
        let vid = Pid::from_raw(get_u64(payload, &mut pos));
        let next = Pid::from_raw(get_u64(payload, &mut pos));
        let nentries = get_u32(payload, &mut pos) as usize;
        if nentries > m {
            return Err(StoreError::Corruption(
                "leaf node entry count exceeds degree",
            ));
        }
        let mut keys = Vec::with_capacity(nentries);
        for slot in 0..m {
            let key = get_u64(payload, &mut pos);
            if slot < nentries {
                keys.push(key);
            }
        }
        let mut entries = Vec::with_capacity(nentries);
        for (slot, key) in keys.into_iter().enumerate() {
            let start = pos + slot * self.value_pad_len;
            let value = payload[start..start + self.value_pad_len].to_vec();
            entries.push((key, value));
        }
        Ok(Node::Leaf(LeafNode {
            pid,
            vid,
            next,
            entries,
        }))
    }
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn get_u64(buf: &[u8], pos: &mut usize) -> u64 {
    let v = u64::from_be_bytes(buf[*pos..*pos + 8].try_into().expect("slice is 8 bytes"));
    *pos += 8;
    v
}

fn get_u32(buf: &[u8], pos: &mut usize) -> u32 {
    let v = u32::from_be_bytes(buf[*pos..*pos + 4].try_into().expect("slice is 4 bytes"));
    *pos += 4;
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;

    fn codec() -> NodeCodec {
        NodeCodec::new(&TreeConfig {
            height: 0,
            inner_degree: 4,
            leaf_degree: 4,
            min_root_keys: 1,
            value_pad_len: 8,
        })
    }

    fn pid(disk: usize, off: u64) -> Pid {
        Pid::new(disk, off).unwrap()
    }

    #[test]
    fn lengths_follow_the_formulas() {
        let c = codec();
        assert_eq!(c.payload_len(true), (2 * 4 + 4) * 8 + 4);
        assert_eq!(c.payload_len(false), 4 + (4 + 3) * 8 + 4 * 8);
        assert_eq!(c.stored_len(true, false), 1 + c.payload_len(true));
        assert_eq!(
            c.stored_len(false, true),
            1 + crypto::padded_len(c.payload_len(false))
        );
    }

    #[test]
    fn inner_roundtrip_full_fanout() {
        let c = codec();
        let mut node = InnerNode::new(
            vec![10, 20, 30, 40],
            vec![
                pid(0, 100),
                pid(1, 200),
                pid(2, 300),
                pid(3, 400),
                pid(0, 500),
            ],
        );
        node.pid = pid(1, 64);
        node.vid = node.pid;
        node.next = pid(1, 128);
        let node = Node::Inner(node);
        let record = c.encode(&node).unwrap();
        assert_eq!(record.len(), 1 + c.payload_len(true));
        assert!(NodeCodec::is_inner_tag(record[0]));
        assert_eq!(c.decode(&record).unwrap(), node);
    }

    #[test]
    fn leaf_roundtrip_with_padded_values() {
        let c = codec();
        let mut node = LeafNode::new();
        node.pid = pid(0, 4096);
        node.vid = node.pid;
        node.entries = vec![
            (1, b"alpha\0\0\0".to_vec()),
            (2, b"beta\0\0\0\0".to_vec()),
        ];
        let node = Node::Leaf(node);
        let record = c.encode(&node).unwrap();
        assert!(!NodeCodec::is_inner_tag(record[0]));
        assert_eq!(c.decode(&record).unwrap(), node);
    }

    #[test]
    fn short_values_come_back_padded() {
        let c = codec();
        let mut node = LeafNode::new();
        node.entries = vec![(7, b"hi".to_vec())];
        let record = c.encode(&Node::Leaf(node)).unwrap();
        match c.decode(&record).unwrap() {
            Node::Leaf(leaf) => {
                assert_eq!(leaf.entries[0].1, b"hi\0\0\0\0\0\0");
            }
            Node::Inner(_) => panic!("decoded wrong variant"),
        }
    }

    #[test]
    fn oversized_values_are_truncated() {
        let c = codec();
        let mut node = LeafNode::new();
        node.entries = vec![(7, b"exceedingly long".to_vec())];
        let record = c.encode(&Node::Leaf(node)).unwrap();
        match c.decode(&record).unwrap() {
            Node::Leaf(leaf) => assert_eq!(leaf.entries[0].1, b"exceedin"),
            Node::Inner(_) => panic!("decoded wrong variant"),
        }
    }

    #[test]
    fn classification_ignores_payload_content() {
        let c = codec();
        // Arbitrary bytes: only the tag decides the variant.
        let mut record = vec![TAG_INNER_BIT; 1 + c.payload_len(true)];
        record[1..].fill(0);
        assert!(c.decode(&record).unwrap().is_inner());
        let mut record = vec![0u8; 1 + c.payload_len(false)];
        record[0] = 0x7F; // high bit clear, everything else set
        record[1..].fill(0);
        assert!(!c.decode(&record).unwrap().is_inner());
    }

    #[test]
    fn truncated_record_is_corruption() {
        let c = codec();
        let record = c.encode(&Node::Leaf(LeafNode::new())).unwrap();
        assert!(matches!(
            c.decode(&record[..record.len() - 1]),
            Err(StoreError::Corruption(_))
        ));
        assert!(matches!(c.decode(&[]), Err(StoreError::Corruption(_))));
    }

    #[test]
    fn degree_overflow_is_rejected() {
        let c = codec();
        let node = InnerNode::new(
            vec![1, 2, 3, 4, 5],
            vec![Pid::NULL; 6],
        );
        assert!(matches!(
            c.encode(&Node::Inner(node)),
            Err(StoreError::Invalid(_))
        ));
        let mut leaf = LeafNode::new();
        leaf.entries = (0..5).map(|k| (k, vec![0u8; 8])).collect();
        assert!(matches!(
            c.encode(&Node::Leaf(leaf)),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn corrupt_count_is_rejected() {
        let c = codec();
        let mut record = c.encode(&Node::Leaf(LeafNode::new())).unwrap();
        // Entry count lives right after pid/vid/next.
        record[1 + 24..1 + 28].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            c.decode(&record),
            Err(StoreError::Corruption(_))
        ));
    }
}
