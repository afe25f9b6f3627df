use std::collections::VecDeque;

use super::file::BTreeFile;
use super::page::NO_PAGE;
use crate::buffer::LockMode;
use crate::error::DbResult;
use crate::file::{PageId, PageNo};
use crate::record::{Record, RecordId};
use crate::transaction::TransactionId;

enum Position {
    /// Nothing read yet; the first call descends from the root
    Start,
    Leaf(PageNo),
    Done,
}

/// Walks the leaf chain left to right under shared locks, one leaf at a time.
/// With a key, only matching entries are produced and the walk stops at the
/// first leaf whose keys go past it.
struct LeafWalk<'a> {
    tree: &'a BTreeFile,
    txn: TransactionId,
    key: Option<i32>,
    position: Position,
    buffered: VecDeque<Record>,
}

impl<'a> LeafWalk<'a> {
    fn new(tree: &'a BTreeFile, txn: TransactionId, key: Option<i32>) -> Self {
        Self {
            tree,
            txn,
            key,
            position: Position::Start,
            buffered: VecDeque::new(),
        }
    }

    /// Read leaves until some record is buffered or the walk ends
    fn fill(&mut self) -> DbResult<()> {
        while self.buffered.is_empty() {
            let leaf_no = match self.position {
                Position::Start => self.tree.start_leaf(self.txn, self.key)?,
                Position::Leaf(page_no) => page_no,
                Position::Done => return Ok(()),
            };

            let (page, leaf) = self.tree.fetch_leaf(self.txn, leaf_no, LockMode::Shared)?;
            let pid: PageId = page.read().id();

            let keep_going = match self.key {
                Some(key) => leaf.may_continue(key),
                None => true,
            };
            self.position = if keep_going && leaf.next != NO_PAGE {
                Position::Leaf(leaf.next)
            } else {
                Position::Done
            };

            for (slot, (k, record)) in leaf.entries.into_iter().enumerate() {
                if self.key.is_none_or(|key| key == k) {
                    self.buffered.push_back(record.with_rid(RecordId::new(pid, slot)));
                }
            }
        }
        Ok(())
    }

    fn next_record(&mut self) -> Option<DbResult<Record>> {
        if let Err(err) = self.fill() {
            self.position = Position::Done;
            self.buffered.clear();
            return Some(Err(err));
        }
        self.buffered.pop_front().map(Ok)
    }
}

/// Every record of a B-tree in ascending key order
pub struct BTreeScan<'a>(LeafWalk<'a>);

impl<'a> BTreeScan<'a> {
    pub(super) fn new(tree: &'a BTreeFile, txn: TransactionId) -> Self {
        Self(LeafWalk::new(tree, txn, None))
    }

    /// Start again from the leftmost leaf
    pub fn rewind(&mut self) {
        self.0.position = Position::Start;
        self.0.buffered.clear();
    }
}

impl Iterator for BTreeScan<'_> {
    type Item = DbResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_record()
    }
}

/// Every record whose key equals the search key, following sibling links
/// across as many leaves as the duplicates span
pub struct EqualityLookup<'a>(LeafWalk<'a>);

impl<'a> EqualityLookup<'a> {
    pub(super) fn new(tree: &'a BTreeFile, txn: TransactionId, key: i32) -> Self {
        Self(LeafWalk::new(tree, txn, Some(key)))
    }
}

impl Iterator for EqualityLookup<'_> {
    type Item = DbResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_record()
    }
}
