use std::path::Path;
use std::sync::Arc;

use log::debug;

use super::iter::{BTreeScan, EqualityLookup};
use super::page::{BTreePage, HeaderPage, InternalPage, LeafPage, NO_PAGE, NodeLayout};
use crate::buffer::{LockMode, PageCache, PageRef};
use crate::config::BTreeConfig;
use crate::error::{DbError, DbResult};
use crate::file::{DiskFile, PAGE_SIZE, PageId, PageNo};
use crate::record::{Record, RecordError, Schema};
use crate::storage::{RecordIter, StorageFile, StorageKind};
use crate::transaction::TransactionId;

const HEADER_PAGE: PageNo = 0;

/// Deeper than any tree the header bitmap can address; reaching it means a cycle
const MAX_DEPTH: usize = 64;

/// Shape of a tree, as counted by [`BTreeFile::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Levels including the leaf level
    pub height: usize,
    pub leaf_count: usize,
    pub internal_count: usize,
    pub entry_count: usize,
}

/// One internal page on the way from the root to a leaf
struct PathStep {
    page_no: PageNo,
    node: InternalPage,
    child_idx: usize,
}

/// A leaf reached by descending from the root
struct Descent {
    path: Vec<PathStep>,
    leaf_no: PageNo,
    leaf: LeafPage,
}

/// Ordered index over one integer field.
///
/// Page 0 is the header; the root starts as an empty leaf on page 1. Leaves
/// hold whole records sorted by key and are doubly linked left to right.
///
/// Inserts take the header exclusively before anything else, so writers are
/// serialised per tree and a split never waits on a lock once it starts.
pub struct BTreeFile {
    disk: Arc<DiskFile>,
    cache: Arc<PageCache>,
    layout: NodeLayout,
}

impl BTreeFile {
    /// Open (or create) a B-tree file keyed on `key_field` and register it with `cache`.
    ///
    /// A new file takes its page capacities from `config`; an existing one keeps
    /// the capacities stored in its header.
    pub fn open<P: AsRef<Path>>(
        cache: Arc<PageCache>,
        path: P,
        schema: Schema,
        key_field: usize,
        config: &BTreeConfig,
    ) -> DbResult<Self> {
        schema.require_int_field(key_field)?;
        let disk = Arc::new(DiskFile::open_or_create(path)?);

        let layout = if disk.num_pages()? == 0 {
            let leaf_capacity = config
                .leaf_capacity
                .unwrap_or_else(|| NodeLayout::max_leaf_capacity(schema.record_size()));
            let internal_capacity = config
                .internal_capacity
                .unwrap_or_else(NodeLayout::max_internal_capacity);
            check_geometry(&schema, leaf_capacity, internal_capacity)?;

            let layout = NodeLayout::new(schema, key_field, leaf_capacity, internal_capacity);
            format(&disk, &layout)?;
            layout
        } else {
            let header = HeaderPage::decode(&disk.read_page_vec(HEADER_PAGE)?)
                .map_err(|reason| DbError::corrupt(PageId::new(disk.id(), HEADER_PAGE), reason))?;
            if header.key_field != key_field {
                return Err(DbError::Unsupported(format!(
                    "{} is keyed on field {}, not {}",
                    disk.path().display(),
                    header.key_field,
                    key_field
                )));
            }
            check_geometry(&schema, header.leaf_capacity, header.internal_capacity)?;
            NodeLayout::new(schema, key_field, header.leaf_capacity, header.internal_capacity)
        };

        debug!(
            "Opened B-tree {} (leaf capacity {}, internal capacity {})",
            disk.path().display(),
            layout.leaf_capacity(),
            layout.internal_capacity()
        );
        cache.register_file(Arc::clone(&disk));
        Ok(Self {
            disk,
            cache,
            layout,
        })
    }

    /// Index of the integer field the tree is ordered on
    pub fn key_field(&self) -> usize {
        self.layout.key_field()
    }

    /// Most entries a leaf holds before it splits
    pub fn leaf_capacity(&self) -> usize {
        self.layout.leaf_capacity()
    }

    /// Most separator keys an internal page holds before it splits
    pub fn internal_capacity(&self) -> usize {
        self.layout.internal_capacity()
    }

    fn pid(&self, page_no: PageNo) -> PageId {
        PageId::new(self.disk.id(), page_no)
    }

    fn key_of(&self, record: &Record) -> DbResult<i32> {
        let field = self.layout.key_field();
        record.get_int(field).ok_or_else(|| {
            RecordError::SchemaMismatch(format!("key field {} is not an INT", field)).into()
        })
    }

    fn fetch(&self, txn: TransactionId, page_no: PageNo, mode: LockMode) -> DbResult<(PageRef, BTreePage)> {
        let pid = self.pid(page_no);
        let page = self.cache.get_page(txn, pid, mode)?;
        let node = {
            let guard = page.read();
            BTreePage::decode(guard.data(), &self.layout)
        }
        .map_err(|reason| DbError::corrupt(pid, reason))?;
        Ok((page, node))
    }

    fn fetch_header(&self, txn: TransactionId, mode: LockMode) -> DbResult<(PageRef, HeaderPage)> {
        match self.fetch(txn, HEADER_PAGE, mode)? {
            (page, BTreePage::Header(header)) => Ok((page, header)),
            _ => Err(DbError::corrupt(self.pid(HEADER_PAGE), "not a header page")),
        }
    }

    pub(super) fn fetch_leaf(
        &self,
        txn: TransactionId,
        page_no: PageNo,
        mode: LockMode,
    ) -> DbResult<(PageRef, LeafPage)> {
        match self.fetch(txn, page_no, mode)? {
            (page, BTreePage::Leaf(leaf)) => Ok((page, leaf)),
            _ => Err(DbError::corrupt(self.pid(page_no), "expected a leaf page")),
        }
    }

    /// Encode `node` into a page the transaction has already marked dirty
    fn store(&self, page: &PageRef, node: &BTreePage) -> DbResult<()> {
        let mut guard = page.write();
        node.encode(&self.layout, guard.data_mut())?;
        Ok(())
    }

    /// Walk from `root` to the leftmost leaf that may hold `key`
    /// (the leftmost leaf of the tree when `key` is `None`), under shared locks
    fn descend(&self, txn: TransactionId, root: PageNo, key: Option<i32>) -> DbResult<Descent> {
        let mut path = Vec::new();
        let mut current = root;

        loop {
            if path.len() > MAX_DEPTH {
                return Err(DbError::corrupt(self.pid(current), "tree deeper than any valid tree"));
            }
            match self.fetch(txn, current, LockMode::Shared)?.1 {
                BTreePage::Internal(node) => {
                    let child_idx = key.map_or(0, |k| node.child_index(k));
                    let child = node.children[child_idx];
                    path.push(PathStep {
                        page_no: current,
                        node,
                        child_idx,
                    });
                    current = child;
                }
                BTreePage::Leaf(leaf) => {
                    return Ok(Descent {
                        path,
                        leaf_no: current,
                        leaf,
                    });
                }
                _ => return Err(DbError::corrupt(self.pid(current), "expected a tree node")),
            }
        }
    }

    /// Page number of the first leaf to visit for `key` (or for a full scan)
    pub(super) fn start_leaf(&self, txn: TransactionId, key: Option<i32>) -> DbResult<PageNo> {
        let (_, header) = self.fetch_header(txn, LockMode::Shared)?;
        Ok(self.descend(txn, header.root, key)?.leaf_no)
    }

    /// Reserve `count` pages: unallocated pages inside the file first, then new ones
    fn allocate(&self, header: &mut HeaderPage, count: usize) -> DbResult<Vec<PageNo>> {
        let num_pages = self.disk.num_pages()?;
        let mut pages: Vec<PageNo> = header.free_pages(num_pages).take(count).collect();
        while pages.len() < count {
            pages.push(self.disk.append_page()?);
        }

        if let Some(&page_no) = pages.iter().find(|&&p| p >= HeaderPage::MAX_PAGES) {
            return Err(DbError::Unsupported(format!(
                "page {} is beyond the {} pages a B-tree file can address",
                page_no,
                HeaderPage::MAX_PAGES
            )));
        }
        for &page_no in &pages {
            header.set_allocated(page_no, true);
        }
        Ok(pages)
    }

    /// Insert into a full leaf, splitting it and as many ancestors as needed.
    ///
    /// Every page the split writes is locked, fetched and marked dirty before
    /// any of them changes, so a failure leaves nothing half-applied.
    fn insert_with_split(
        &self,
        txn: TransactionId,
        header_ref: PageRef,
        mut header: HeaderPage,
        descent: Descent,
        key: i32,
        record: Record,
    ) -> DbResult<Vec<PageId>> {
        let Descent {
            mut path,
            leaf_no,
            mut leaf,
        } = descent;
        let internal_capacity = self.layout.internal_capacity();

        // Full ancestors split; the first one with room absorbs the last separator
        let splits = path
            .iter()
            .rev()
            .take_while(|step| step.node.keys.len() >= internal_capacity)
            .count();
        let new_root = splits == path.len();
        let touched = path.split_off(path.len() - (splits + 1).min(path.len()));

        self.cache.mark_dirty(&header_ref, txn)?;
        let mut ancestor_refs = Vec::with_capacity(touched.len());
        for step in &touched {
            let page = self.cache.get_page(txn, self.pid(step.page_no), LockMode::Exclusive)?;
            self.cache.mark_dirty(&page, txn)?;
            ancestor_refs.push(page);
        }

        let leaf_ref = self.cache.get_page(txn, self.pid(leaf_no), LockMode::Exclusive)?;
        self.cache.mark_dirty(&leaf_ref, txn)?;

        let sibling = if leaf.next != NO_PAGE {
            let (page, node) = self.fetch_leaf(txn, leaf.next, LockMode::Exclusive)?;
            self.cache.mark_dirty(&page, txn)?;
            Some((page, node))
        } else {
            None
        };

        let allocated = self.allocate(&mut header, 1 + splits + usize::from(new_root))?;
        let mut new_refs = Vec::with_capacity(allocated.len());
        for &page_no in &allocated {
            let page = self.cache.get_page(txn, self.pid(page_no), LockMode::Exclusive)?;
            self.cache.mark_dirty(&page, txn)?;
            new_refs.push(page);
        }
        let mut fresh = allocated.iter().copied().zip(new_refs);

        // Only in-memory nodes change from here until the final encode
        let mut writes: Vec<(PageRef, BTreePage)> = Vec::new();

        leaf.insert(key, record);
        let mut right = leaf.split();
        let (right_no, right_ref) = fresh.next().ok_or_else(|| self.allocation_shortfall())?;
        right.prev = leaf_no;
        right.next = leaf.next;
        leaf.next = right_no;
        if let Some((page, mut node)) = sibling {
            node.prev = right_no;
            writes.push((page, BTreePage::Leaf(node)));
        }

        let mut separator = right.min_key().unwrap_or(key);
        let mut child = right_no;
        writes.push((leaf_ref, BTreePage::Leaf(leaf)));
        writes.push((right_ref, BTreePage::Leaf(right)));

        for (step, page) in touched.into_iter().rev().zip(ancestor_refs.into_iter().rev()) {
            let mut node = step.node;
            node.insert_child(step.child_idx, separator, child);
            if node.keys.len() <= internal_capacity {
                writes.push((page, BTreePage::Internal(node)));
                break;
            }

            let (pushed, right_half) = node.split();
            let (right_half_no, right_half_ref) =
                fresh.next().ok_or_else(|| self.allocation_shortfall())?;
            writes.push((page, BTreePage::Internal(node)));
            writes.push((right_half_ref, BTreePage::Internal(right_half)));
            separator = pushed;
            child = right_half_no;
        }

        if new_root {
            let (root_no, root_ref) = fresh.next().ok_or_else(|| self.allocation_shortfall())?;
            let root = InternalPage {
                keys: vec![separator],
                children: vec![header.root, child],
            };
            writes.push((root_ref, BTreePage::Internal(root)));
            debug!("B-tree {} grew a new root on page {}", self.disk.path().display(), root_no);
            header.root = root_no;
        }
        writes.push((header_ref, BTreePage::Header(header)));

        let mut dirtied = Vec::with_capacity(writes.len());
        for (page, node) in &writes {
            self.store(page, node)?;
            dirtied.push(page.read().id());
        }
        Ok(dirtied)
    }

    fn allocation_shortfall(&self) -> DbError {
        DbError::corrupt(self.pid(HEADER_PAGE), "page allocation returned too few pages")
    }

    /// Walk the whole tree and check its structure: sorted leaves, separators
    /// bounding their subtrees, all leaves at one depth, and a leaf chain that
    /// links every leaf left to right in both directions.
    pub fn stats(&self, txn: TransactionId) -> DbResult<TreeStats> {
        let (_, header) = self.fetch_header(txn, LockMode::Shared)?;
        let mut walk = StatsWalk::default();
        let height = self.check_subtree(txn, header.root, None, None, 0, &mut walk)?;
        walk.stats.height = height;

        for (i, &(page_no, prev, next)) in walk.leaves.iter().enumerate() {
            let expected_prev = if i == 0 { NO_PAGE } else { walk.leaves[i - 1].0 };
            let expected_next = walk.leaves.get(i + 1).map_or(NO_PAGE, |leaf| leaf.0);
            if prev != expected_prev || next != expected_next {
                return Err(DbError::corrupt(
                    self.pid(page_no),
                    format!(
                        "sibling links ({}, {}) should be ({}, {})",
                        prev, next, expected_prev, expected_next
                    ),
                ));
            }
        }
        Ok(walk.stats)
    }

    /// Returns the height of the subtree rooted at `page_no`
    fn check_subtree(
        &self,
        txn: TransactionId,
        page_no: PageNo,
        low: Option<i32>,
        high: Option<i32>,
        depth: usize,
        walk: &mut StatsWalk,
    ) -> DbResult<usize> {
        let pid = self.pid(page_no);
        if depth > MAX_DEPTH {
            return Err(DbError::corrupt(pid, "tree deeper than any valid tree"));
        }
        let in_bounds = |k: i32| low.is_none_or(|lo| k >= lo) && high.is_none_or(|hi| k <= hi);

        match self.fetch(txn, page_no, LockMode::Shared)?.1 {
            BTreePage::Leaf(leaf) => {
                if leaf.entries.windows(2).any(|pair| pair[0].0 > pair[1].0) {
                    return Err(DbError::corrupt(pid, "leaf keys out of order"));
                }
                if !leaf.entries.iter().all(|(k, _)| in_bounds(*k)) {
                    return Err(DbError::corrupt(pid, "leaf key outside its parent's range"));
                }
                walk.stats.leaf_count += 1;
                walk.stats.entry_count += leaf.len();
                walk.leaves.push((page_no, leaf.prev, leaf.next));
                Ok(1)
            }
            BTreePage::Internal(node) => {
                if node.children.len() != node.keys.len() + 1 || node.keys.is_empty() {
                    return Err(DbError::corrupt(pid, "internal page with wrong child count"));
                }
                if node.keys.windows(2).any(|pair| pair[0] > pair[1]) {
                    return Err(DbError::corrupt(pid, "separator keys out of order"));
                }
                if !node.keys.iter().all(|k| in_bounds(*k)) {
                    return Err(DbError::corrupt(pid, "separator outside its parent's range"));
                }
                walk.stats.internal_count += 1;

                let mut height = None;
                for (i, &child) in node.children.iter().enumerate() {
                    let child_low = if i == 0 { low } else { Some(node.keys[i - 1]) };
                    let child_high = node.keys.get(i).copied().or(high);
                    let h = self.check_subtree(txn, child, child_low, child_high, depth + 1, walk)?;
                    if height.is_some_and(|prev| prev != h) {
                        return Err(DbError::corrupt(pid, "children at different depths"));
                    }
                    height = Some(h);
                }
                Ok(height.unwrap_or(0) + 1)
            }
            _ => Err(DbError::corrupt(pid, "expected a tree node")),
        }
    }

    /// Lazy lookup of every record whose key equals `key`
    pub fn lookup(&self, txn: TransactionId, key: i32) -> EqualityLookup<'_> {
        EqualityLookup::new(self, txn, key)
    }

    /// Lazy scan of every record in key order
    pub fn iter(&self, txn: TransactionId) -> BTreeScan<'_> {
        BTreeScan::new(self, txn)
    }
}

#[derive(Default)]
struct StatsWalk {
    stats: TreeStats,
    /// (page, prev, next) of each leaf in key order
    leaves: Vec<(PageNo, PageNo, PageNo)>,
}

fn check_geometry(schema: &Schema, leaf_capacity: usize, internal_capacity: usize) -> DbResult<()> {
    let max_leaf = NodeLayout::max_leaf_capacity(schema.record_size());
    if !(2..=max_leaf).contains(&leaf_capacity) {
        return Err(DbError::Unsupported(format!(
            "leaf capacity {} outside 2..={} for {}-byte records",
            leaf_capacity,
            max_leaf,
            schema.record_size()
        )));
    }
    let max_internal = NodeLayout::max_internal_capacity();
    if !(2..=max_internal).contains(&internal_capacity) {
        return Err(DbError::Unsupported(format!(
            "internal capacity {} outside 2..={}",
            internal_capacity, max_internal
        )));
    }
    Ok(())
}

/// Write the header and an empty root leaf to a new file
fn format(disk: &DiskFile, layout: &NodeLayout) -> DbResult<()> {
    let root = 1;
    let mut header = HeaderPage::new(
        root,
        layout.leaf_capacity(),
        layout.internal_capacity(),
        layout.key_field(),
    );
    header.set_allocated(root, true);

    let mut buf = vec![0u8; PAGE_SIZE];
    BTreePage::Header(header).encode(layout, &mut buf)?;
    disk.write_page(HEADER_PAGE, &buf)?;
    BTreePage::Leaf(LeafPage::empty()).encode(layout, &mut buf)?;
    disk.write_page(root, &buf)?;
    disk.sync()?;
    Ok(())
}

impl StorageFile for BTreeFile {
    fn disk(&self) -> &DiskFile {
        &self.disk
    }

    fn schema(&self) -> &Schema {
        self.layout.schema()
    }

    fn kind(&self) -> StorageKind {
        StorageKind::BTree {
            key_field: self.layout.key_field(),
        }
    }

    fn insert_record(&self, txn: TransactionId, record: &Record) -> DbResult<Vec<PageId>> {
        self.layout.schema().validate(record.fields())?;
        let key = self.key_of(record)?;
        let record = Record::new(record.fields().to_vec());

        let (header_ref, header) = self.fetch_header(txn, LockMode::Exclusive)?;
        let mut descent = self.descend(txn, header.root, Some(key))?;

        if descent.leaf.len() >= self.layout.leaf_capacity() {
            return self.insert_with_split(txn, header_ref, header, descent, key, record);
        }

        let leaf_ref = self.cache.get_page(txn, self.pid(descent.leaf_no), LockMode::Exclusive)?;
        self.cache.mark_dirty(&leaf_ref, txn)?;
        descent.leaf.insert(key, record);
        self.store(&leaf_ref, &BTreePage::Leaf(descent.leaf))?;
        Ok(vec![self.pid(descent.leaf_no)])
    }

    /// Remove one entry whose fields equal `record`. Leaves are never merged.
    fn delete_record(&self, txn: TransactionId, record: &Record) -> DbResult<Vec<PageId>> {
        self.layout.schema().validate(record.fields())?;
        let key = self.key_of(record)?;

        let Descent {
            mut leaf_no,
            mut leaf,
            ..
        } = {
            let (_, header) = self.fetch_header(txn, LockMode::Shared)?;
            self.descend(txn, header.root, Some(key))?
        };

        loop {
            let found = leaf
                .entries
                .iter()
                .position(|(k, stored)| *k == key && stored == record);
            if let Some(pos) = found {
                let page = self.cache.get_page(txn, self.pid(leaf_no), LockMode::Exclusive)?;
                self.cache.mark_dirty(&page, txn)?;
                leaf.entries.remove(pos);
                self.store(&page, &BTreePage::Leaf(leaf))?;
                return Ok(vec![self.pid(leaf_no)]);
            }
            if !leaf.may_continue(key) || leaf.next == NO_PAGE {
                return Err(DbError::RecordNotFound);
            }
            leaf_no = leaf.next;
            leaf = self.fetch_leaf(txn, leaf_no, LockMode::Shared)?.1;
        }
    }

    fn scan(&self, txn: TransactionId) -> RecordIter<'_> {
        Box::new(self.iter(txn))
    }

    fn equality_lookup(&self, txn: TransactionId, key: i32) -> DbResult<RecordIter<'_>> {
        Ok(Box::new(self.lookup(txn, key)))
    }
}
