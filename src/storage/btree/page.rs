//! On-disk format of B-tree pages.
//!
//! Every page starts with a one-byte type tag:
//!
//! - header (page 0): `[tag][pad:3][root u32][leaf cap u16][internal cap u16][key field u16][pad:2][allocation bitmap]`
//! - internal: `[tag][pad][count u16][pad:12][keys i32 x cap][children u32 x (cap + 1)]`
//! - leaf: `[tag][pad][count u16][prev u32][next u32][pad:4][records x cap]`
//!
//! All integers are little-endian. Page number 0 is the header, so it doubles
//! as "no sibling" in leaf links.

use crate::file::{PAGE_SIZE, PageNo};
use crate::record::{Record, RecordResult, Schema};

/// Sibling link meaning "none"
pub const NO_PAGE: PageNo = 0;

/// Bytes reserved at the start of every page
pub const NODE_HEADER_SIZE: usize = 16;

const TAG_UNFORMATTED: u8 = 0;
const TAG_HEADER: u8 = 1;
const TAG_INTERNAL: u8 = 2;
const TAG_LEAF: u8 = 3;

fn read_u16(data: &[u8], offset: usize) -> usize {
    u16::from_le_bytes([data[offset], data[offset + 1]]) as usize
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn write_u16(data: &mut [u8], offset: usize, value: usize) {
    data[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Geometry shared by every node of one tree
#[derive(Debug, Clone)]
pub struct NodeLayout {
    schema: Schema,
    key_field: usize,
    key_offset: usize,
    leaf_capacity: usize,
    internal_capacity: usize,
}

impl NodeLayout {
    pub fn new(schema: Schema, key_field: usize, leaf_capacity: usize, internal_capacity: usize) -> Self {
        let key_offset = schema.field_offset(key_field);
        Self {
            schema,
            key_field,
            key_offset,
            leaf_capacity,
            internal_capacity,
        }
    }

    /// Most records a leaf can hold for the given record width
    pub fn max_leaf_capacity(record_size: usize) -> usize {
        (PAGE_SIZE - NODE_HEADER_SIZE) / record_size.max(1)
    }

    /// Most separator keys an internal page can hold
    pub fn max_internal_capacity() -> usize {
        // cap keys + (cap + 1) children, 4 bytes each
        (PAGE_SIZE - NODE_HEADER_SIZE - 4) / 8
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn key_field(&self) -> usize {
        self.key_field
    }

    pub fn leaf_capacity(&self) -> usize {
        self.leaf_capacity
    }

    pub fn internal_capacity(&self) -> usize {
        self.internal_capacity
    }

    fn children_offset(&self) -> usize {
        NODE_HEADER_SIZE + self.internal_capacity * 4
    }

    fn key_in(&self, record_bytes: &[u8]) -> i32 {
        let o = self.key_offset;
        i32::from_le_bytes([
            record_bytes[o],
            record_bytes[o + 1],
            record_bytes[o + 2],
            record_bytes[o + 3],
        ])
    }
}

/// Page 0: root pointer, geometry and the allocated-page bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPage {
    pub root: PageNo,
    pub leaf_capacity: usize,
    pub internal_capacity: usize,
    pub key_field: usize,
    allocated: Vec<u8>,
}

impl HeaderPage {
    /// Pages addressable by the bitmap
    pub const MAX_PAGES: usize = (PAGE_SIZE - NODE_HEADER_SIZE) * 8;

    pub fn new(root: PageNo, leaf_capacity: usize, internal_capacity: usize, key_field: usize) -> Self {
        let mut header = Self {
            root,
            leaf_capacity,
            internal_capacity,
            key_field,
            allocated: vec![0u8; PAGE_SIZE - NODE_HEADER_SIZE],
        };
        header.set_allocated(0, true);
        header
    }

    pub fn is_allocated(&self, page_no: PageNo) -> bool {
        page_no < Self::MAX_PAGES && self.allocated[page_no / 8] & (1 << (page_no % 8)) != 0
    }

    pub fn set_allocated(&mut self, page_no: PageNo, allocated: bool) {
        if page_no >= Self::MAX_PAGES {
            return;
        }
        if allocated {
            self.allocated[page_no / 8] |= 1 << (page_no % 8);
        } else {
            self.allocated[page_no / 8] &= !(1 << (page_no % 8));
        }
    }

    /// Unallocated page numbers below `limit`, lowest first
    pub fn free_pages(&self, limit: usize) -> impl Iterator<Item = PageNo> + '_ {
        (1..limit.min(Self::MAX_PAGES)).filter(|&p| !self.is_allocated(p))
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn decode(data: &[u8]) -> Result<Self, String> {
        if data[0] != TAG_HEADER {
            return Err(format!("expected header page, found tag {}", data[0]));
        }
        Ok(Self {
            root: read_u32(data, 4) as PageNo,
            leaf_capacity: read_u16(data, 8),
            internal_capacity: read_u16(data, 10),
            key_field: read_u16(data, 12),
            allocated: data[NODE_HEADER_SIZE..PAGE_SIZE].to_vec(),
        })
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[..NODE_HEADER_SIZE].fill(0);
        out[0] = TAG_HEADER;
        write_u32(out, 4, self.root as u32);
        write_u16(out, 8, self.leaf_capacity);
        write_u16(out, 10, self.internal_capacity);
        write_u16(out, 12, self.key_field);
        out[NODE_HEADER_SIZE..PAGE_SIZE].copy_from_slice(&self.allocated);
    }
}

/// Separator keys and child pointers. `children.len() == keys.len() + 1`.
///
/// Every key in `children[i]` lies in `keys[i - 1] ..= keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalPage {
    pub keys: Vec<i32>,
    pub children: Vec<PageNo>,
}

impl InternalPage {
    /// Index of the leftmost child that may hold `key`
    pub fn child_index(&self, key: i32) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// Insert a separator at `idx` with `child` as its right neighbour
    pub fn insert_child(&mut self, idx: usize, key: i32, child: PageNo) {
        self.keys.insert(idx, key);
        self.children.insert(idx + 1, child);
    }

    /// Split an overflowing page around its middle key (push-up).
    /// Returns the separator to insert into the parent and the right half.
    pub fn split(&mut self) -> (i32, InternalPage) {
        let mid = self.keys.len() / 2;
        let right_keys = self.keys.split_off(mid + 1);
        let right_children = self.children.split_off(mid + 1);
        let separator = self.keys.pop().unwrap_or_default();
        (
            separator,
            InternalPage {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    fn decode(data: &[u8], layout: &NodeLayout) -> Result<Self, String> {
        let count = read_u16(data, 2);
        if count > layout.internal_capacity {
            return Err(format!(
                "internal page holds {} keys, capacity is {}",
                count, layout.internal_capacity
            ));
        }

        let keys = (0..count)
            .map(|i| read_u32(data, NODE_HEADER_SIZE + i * 4) as i32)
            .collect();
        let children_at = layout.children_offset();
        let children = (0..=count)
            .map(|i| read_u32(data, children_at + i * 4) as PageNo)
            .collect();
        Ok(Self { keys, children })
    }

    fn encode(&self, layout: &NodeLayout, out: &mut [u8]) {
        out.fill(0);
        out[0] = TAG_INTERNAL;
        write_u16(out, 2, self.keys.len());
        for (i, key) in self.keys.iter().enumerate() {
            write_u32(out, NODE_HEADER_SIZE + i * 4, *key as u32);
        }
        let children_at = layout.children_offset();
        for (i, child) in self.children.iter().enumerate() {
            write_u32(out, children_at + i * 4, *child as u32);
        }
    }
}

/// Sorted `(key, record)` entries plus sibling links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafPage {
    pub entries: Vec<(i32, Record)>,
    pub prev: PageNo,
    pub next: PageNo,
}

impl LeafPage {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            prev: NO_PAGE,
            next: NO_PAGE,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn min_key(&self) -> Option<i32> {
        self.entries.first().map(|(k, _)| *k)
    }

    pub fn max_key(&self) -> Option<i32> {
        self.entries.last().map(|(k, _)| *k)
    }

    /// Insert after any entries with an equal key
    pub fn insert(&mut self, key: i32, record: Record) {
        let pos = self.entries.partition_point(|(k, _)| *k <= key);
        self.entries.insert(pos, (key, record));
    }

    /// Whether keys equal to `key` may continue in the right sibling
    pub fn may_continue(&self, key: i32) -> bool {
        self.max_key().is_none_or(|max| max <= key)
    }

    /// Move all but the first `(len + 1) / 2` entries into a new right sibling (copy-up).
    /// Sibling links are left for the caller to fix.
    pub fn split(&mut self) -> LeafPage {
        let keep = self.entries.len().div_ceil(2);
        LeafPage {
            entries: self.entries.split_off(keep),
            prev: NO_PAGE,
            next: NO_PAGE,
        }
    }

    fn decode(data: &[u8], layout: &NodeLayout) -> Result<Self, String> {
        let count = read_u16(data, 2);
        if count > layout.leaf_capacity {
            return Err(format!(
                "leaf holds {} records, capacity is {}",
                count, layout.leaf_capacity
            ));
        }

        let size = layout.schema.record_size();
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let start = NODE_HEADER_SIZE + i * size;
            let bytes = &data[start..start + size];
            let record = Record::deserialize(bytes, &layout.schema).map_err(|e| e.to_string())?;
            entries.push((layout.key_in(bytes), record));
        }

        Ok(Self {
            entries,
            prev: read_u32(data, 4) as PageNo,
            next: read_u32(data, 8) as PageNo,
        })
    }

    fn encode(&self, layout: &NodeLayout, out: &mut [u8]) -> RecordResult<()> {
        out.fill(0);
        out[0] = TAG_LEAF;
        write_u16(out, 2, self.entries.len());
        write_u32(out, 4, self.prev as u32);
        write_u32(out, 8, self.next as u32);

        let size = layout.schema.record_size();
        for (i, (_, record)) in self.entries.iter().enumerate() {
            let start = NODE_HEADER_SIZE + i * size;
            out[start..start + size].copy_from_slice(&record.serialize(&layout.schema)?);
        }
        Ok(())
    }
}

/// A decoded B-tree page, dispatched on its type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BTreePage {
    /// All-zero page that was allocated but never written
    Unformatted,
    Header(HeaderPage),
    Internal(InternalPage),
    Leaf(LeafPage),
}

impl BTreePage {
    pub fn decode(data: &[u8], layout: &NodeLayout) -> Result<Self, String> {
        if data.len() != PAGE_SIZE {
            return Err(format!("page is {} bytes", data.len()));
        }
        match data[0] {
            TAG_UNFORMATTED => Ok(BTreePage::Unformatted),
            TAG_HEADER => HeaderPage::decode(data).map(BTreePage::Header),
            TAG_INTERNAL => InternalPage::decode(data, layout).map(BTreePage::Internal),
            TAG_LEAF => LeafPage::decode(data, layout).map(BTreePage::Leaf),
            tag => Err(format!("unknown page tag {}", tag)),
        }
    }

    pub fn encode(&self, layout: &NodeLayout, out: &mut [u8]) -> RecordResult<()> {
        match self {
            BTreePage::Unformatted => out.fill(0),
            BTreePage::Header(header) => header.encode(out),
            BTreePage::Internal(internal) => internal.encode(layout, out),
            BTreePage::Leaf(leaf) => leaf.encode(layout, out)?,
        }
        Ok(())
    }
}
