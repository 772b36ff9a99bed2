//! Fixed-size page codec.
//!
//! Every page is exactly [`PAGE_SIZE`] bytes and holds either a leaf or an
//! internal node, selected by the leading `is_leaf: i32` tag. The tag is
//! authoritative: decode reads it first and branches into exactly one layout,
//! failing with `CorruptPage` on anything that would index past the page.
//! All numeric fields are little-endian.

use std::fmt;

use crate::error::{Result, TreeError};
use crate::record::{PointRecord, RECORD_SIZE};

/// Physical page size in bytes, the unit of storage I/O.
pub const PAGE_SIZE: usize = 8000;

/// Leaf header: `is_leaf: i32`, `record_count: i32`, `next_leaf_page_id: i32`.
pub const LEAF_HEADER_LEN: usize = 12;

/// Internal header: `is_leaf: i32`, `key_count: i32`.
pub const INTERNAL_HEADER_LEN: usize = 8;

/// Most records a leaf page can hold: floor((8000 - 12) / 66) = 121.
pub const MAX_LEAF_RECORDS: usize = (PAGE_SIZE - LEAF_HEADER_LEN) / RECORD_SIZE;

/// Most separator keys an internal page can hold: largest `k` with
/// `8 + 4k + 4(k + 1) <= 8000`, i.e. 998.
pub const MAX_INTERNAL_KEYS: usize = (PAGE_SIZE - INTERNAL_HEADER_LEN - 4) / 8;

/// On-disk sentinel for "no sibling leaf".
const NO_SIBLING: i32 = -1;

/// Raw page buffer.
pub type PageBuf = [u8; PAGE_SIZE];

/// Identifier of a page within a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Leaf node: sorted point records plus a forward sibling link.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafNode {
    /// Records in ascending `(hilbert_key, id)` order.
    pub records: Vec<PointRecord>,
    /// Next leaf in scan order, `None` for the last leaf.
    pub next_leaf: Option<PageId>,
}

impl LeafNode {
    /// An empty leaf with no sibling.
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            next_leaf: None,
        }
    }

    /// Position at which `record` keeps the leaf sorted by `(key, id)`.
    pub fn insertion_index(&self, record: &PointRecord) -> usize {
        self.records
            .partition_point(|existing| existing.sort_key() < record.sort_key())
    }

    /// Index of the first record with key `>= key`.
    pub fn lower_bound(&self, key: u32) -> usize {
        self.records
            .partition_point(|record| record.hilbert_key() < key)
    }
}

/// Internal node: separator keys routing to `keys.len() + 1` children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternalNode {
    /// Separator keys in ascending order.
    pub keys: Vec<u32>,
    /// Child page references, one more than `keys`.
    pub children: Vec<PageId>,
}

impl InternalNode {
    /// Child index whose range contains `key`: the first separator `>= key`
    /// selects its child, otherwise the last child.
    pub fn route(&self, key: u32) -> usize {
        self.keys.partition_point(|&separator| separator < key)
    }
}

/// A decoded page: exactly one of the two node kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Leaf page.
    Leaf(LeafNode),
    /// Internal routing page.
    Internal(InternalNode),
}

impl Node {
    /// Decodes a raw page, dispatching on the `is_leaf` tag.
    pub fn decode(buf: &PageBuf) -> Result<Self> {
        match read_i32(buf, 0) {
            1 => decode_leaf(buf).map(Node::Leaf),
            0 => decode_internal(buf).map(Node::Internal),
            _ => Err(TreeError::CorruptPage("unknown page tag")),
        }
    }

    /// Encodes the node into a zero-padded page buffer.
    ///
    /// Fails with `InvalidArgument` if the node exceeds what one page can
    /// physically hold; logical capacity limits are the tree's concern.
    pub fn encode(&self) -> Result<PageBuf> {
        let mut buf = [0u8; PAGE_SIZE];
        match self {
            Node::Leaf(leaf) => encode_leaf(leaf, &mut buf)?,
            Node::Internal(node) => encode_internal(node, &mut buf)?,
        }
        Ok(buf)
    }

    /// The leaf view, or `CorruptPage` if this is an internal node.
    ///
    /// Used where the caller already routed to a leaf and a different kind
    /// means the on-disk structure is inconsistent.
    pub fn expect_leaf(self) -> Result<LeafNode> {
        match self {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(TreeError::CorruptPage("expected leaf page")),
        }
    }
}

fn decode_leaf(buf: &PageBuf) -> Result<LeafNode> {
    let record_count = read_i32(buf, 4);
    if record_count < 0 {
        return Err(TreeError::CorruptPage("negative leaf record count"));
    }
    let record_count = record_count as usize;
    if LEAF_HEADER_LEN + record_count * RECORD_SIZE > PAGE_SIZE {
        return Err(TreeError::CorruptPage("leaf record count exceeds page"));
    }
    let next_leaf = match read_i32(buf, 8) {
        NO_SIBLING => None,
        raw if raw >= 0 => Some(PageId(raw as u32)),
        _ => return Err(TreeError::CorruptPage("invalid sibling page id")),
    };
    let mut records = Vec::with_capacity(record_count);
    let mut offset = LEAF_HEADER_LEN;
    for _ in 0..record_count {
        records.push(PointRecord::decode(&buf[offset..offset + RECORD_SIZE])?);
        offset += RECORD_SIZE;
    }
    Ok(LeafNode { records, next_leaf })
}

fn encode_leaf(leaf: &LeafNode, buf: &mut PageBuf) -> Result<()> {
    if leaf.records.len() > MAX_LEAF_RECORDS {
        return Err(TreeError::InvalidArgument("too many records for one page"));
    }
    write_i32(buf, 0, 1);
    write_i32(buf, 4, leaf.records.len() as i32);
    write_i32(
        buf,
        8,
        leaf.next_leaf.map_or(NO_SIBLING, |page| page.0 as i32),
    );
    let mut offset = LEAF_HEADER_LEN;
    for record in &leaf.records {
        record.encode_into(&mut buf[offset..offset + RECORD_SIZE]);
        offset += RECORD_SIZE;
    }
    Ok(())
}

fn decode_internal(buf: &PageBuf) -> Result<InternalNode> {
    let key_count = read_i32(buf, 4);
    if key_count < 0 {
        return Err(TreeError::CorruptPage("negative internal key count"));
    }
    let key_count = key_count as usize;
    if INTERNAL_HEADER_LEN + key_count * 4 + (key_count + 1) * 4 > PAGE_SIZE {
        return Err(TreeError::CorruptPage("internal key count exceeds page"));
    }
    let mut keys = Vec::with_capacity(key_count);
    let mut offset = INTERNAL_HEADER_LEN;
    for _ in 0..key_count {
        keys.push(read_u32(buf, offset));
        offset += 4;
    }
    let mut children = Vec::with_capacity(key_count + 1);
    for _ in 0..key_count + 1 {
        children.push(PageId(read_u32(buf, offset)));
        offset += 4;
    }
    Ok(InternalNode { keys, children })
}

fn encode_internal(node: &InternalNode, buf: &mut PageBuf) -> Result<()> {
    if node.keys.len() > MAX_INTERNAL_KEYS {
        return Err(TreeError::InvalidArgument("too many keys for one page"));
    }
    if node.children.len() != node.keys.len() + 1 {
        return Err(TreeError::InvalidArgument(
            "internal node needs key_count + 1 children",
        ));
    }
    write_i32(buf, 0, 0);
    write_i32(buf, 4, node.keys.len() as i32);
    let mut offset = INTERNAL_HEADER_LEN;
    for &key in &node.keys {
        buf[offset..offset + 4].copy_from_slice(&key.to_le_bytes());
        offset += 4;
    }
    for &child in &node.children {
        buf[offset..offset + 4].copy_from_slice(&child.0.to_le_bytes());
        offset += 4;
    }
    Ok(())
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().expect("4-byte slice"))
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().expect("4-byte slice"))
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
