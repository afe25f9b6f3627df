use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use log::debug;

use super::page::HeapPage;
use crate::buffer::{LockMode, PageCache};
use crate::error::{DbError, DbResult};
use crate::file::{DiskFile, PageId, PageNo};
use crate::record::{Record, RecordId, Schema};
use crate::storage::{RecordIter, StorageFile, StorageKind};
use crate::transaction::TransactionId;

/// Unordered collection of fixed-width records
pub struct HeapFile {
    disk: Arc<DiskFile>,
    schema: Schema,
    cache: Arc<PageCache>,
}

impl HeapFile {
    /// Open (or create) a heap file and register it with `cache`
    pub fn open<P: AsRef<Path>>(cache: Arc<PageCache>, path: P, schema: Schema) -> DbResult<Self> {
        if HeapPage::<&[u8]>::calculate_slot_count(schema.record_size()) == 0 {
            return Err(DbError::Unsupported(format!(
                "records of {} bytes do not fit in a page",
                schema.record_size()
            )));
        }

        let disk = Arc::new(DiskFile::open_or_create(path)?);
        cache.register_file(Arc::clone(&disk));
        Ok(Self {
            disk,
            schema,
            cache,
        })
    }

    /// Records per page
    pub fn slots_per_page(&self) -> usize {
        HeapPage::<&[u8]>::calculate_slot_count(self.schema.record_size())
    }

    fn page_id(&self, page_no: PageNo) -> PageId {
        PageId::new(self.disk.id(), page_no)
    }

    /// First free slot of a page, after checking the page is well formed
    fn free_slot(&self, pid: PageId, data: &[u8]) -> DbResult<Option<usize>> {
        let view = HeapPage::new(data, self.schema.record_size());
        view.validate().map_err(|reason| DbError::corrupt(pid, reason))?;
        Ok(view.find_free_slot())
    }

    /// Write `bytes` into `slot` of a page the transaction holds exclusively
    fn put(&self, txn: TransactionId, pid: PageId, slot: usize, bytes: &[u8]) -> DbResult<()> {
        let page = self.cache.get_page(txn, pid, LockMode::Exclusive)?;
        self.cache.mark_dirty(&page, txn)?;
        let mut guard = page.write();
        HeapPage::new(guard.data_mut(), self.schema.record_size()).put(slot, bytes);
        Ok(())
    }

    /// Decode every occupied slot of one page
    fn read_records(&self, txn: TransactionId, page_no: PageNo) -> DbResult<Vec<Record>> {
        let pid = self.page_id(page_no);
        let page = self.cache.get_page(txn, pid, LockMode::Shared)?;
        let guard = page.read();
        let view = HeapPage::new(guard.data(), self.schema.record_size());
        view.validate().map_err(|reason| DbError::corrupt(pid, reason))?;

        let records = view
            .used_slots()
            .map(|slot| -> DbResult<Record> {
                Ok(Record::deserialize(view.slot_bytes(slot), &self.schema)?
                    .with_rid(RecordId::new(pid, slot)))
            })
            .collect();
        records
    }

    /// Lazy scan over every record in file order
    pub fn iter(&self, txn: TransactionId) -> HeapScan<'_> {
        HeapScan::new(self, txn)
    }
}

impl StorageFile for HeapFile {
    fn disk(&self) -> &DiskFile {
        &self.disk
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Heap
    }

    fn insert_record(&self, txn: TransactionId, record: &Record) -> DbResult<Vec<PageId>> {
        let bytes = record.serialize(&self.schema)?;

        for page_no in 0..self.disk.num_pages()? {
            let pid = self.page_id(page_no);
            let held_before = self.cache.holds_lock(txn, pid);
            let page = self.cache.get_page(txn, pid, LockMode::Exclusive)?;

            let free = {
                let guard = page.read();
                self.free_slot(pid, guard.data())?
            };
            match free {
                Some(slot) => {
                    self.put(txn, pid, slot, &bytes)?;
                    return Ok(vec![pid]);
                }
                // Full: let other inserters past unless we held it anyway
                None if !held_before => self.cache.release_page(txn, pid),
                None => {}
            }
        }

        let pid = self.page_id(self.disk.append_page()?);
        debug!("Heap {} grew to page {}", self.disk.path().display(), pid.page_no);
        self.put(txn, pid, 0, &bytes)?;
        Ok(vec![pid])
    }

    fn delete_record(&self, txn: TransactionId, record: &Record) -> DbResult<Vec<PageId>> {
        let rid = record.rid().ok_or(DbError::RecordNotFound)?;
        if rid.page.file != self.disk.id() || rid.page.page_no >= self.disk.num_pages()? {
            return Err(DbError::RecordNotFound);
        }

        let page = self.cache.get_page(txn, rid.page, LockMode::Exclusive)?;
        let used = {
            let guard = page.read();
            HeapPage::new(guard.data(), self.schema.record_size()).is_slot_used(rid.slot)
        };
        if !used {
            return Err(DbError::RecordNotFound);
        }

        self.cache.mark_dirty(&page, txn)?;
        let mut guard = page.write();
        HeapPage::new(guard.data_mut(), self.schema.record_size()).clear(rid.slot);
        Ok(vec![rid.page])
    }

    fn scan(&self, txn: TransactionId) -> RecordIter<'_> {
        Box::new(self.iter(txn))
    }
}

/// Restartable scan over a heap file. Pages are read one at a time as the
/// iterator advances; empty pages are skipped.
pub struct HeapScan<'a> {
    file: &'a HeapFile,
    txn: TransactionId,
    next_page: PageNo,
    num_pages: Option<usize>,
    buffered: VecDeque<Record>,
    failed: bool,
}

impl<'a> HeapScan<'a> {
    fn new(file: &'a HeapFile, txn: TransactionId) -> Self {
        Self {
            file,
            txn,
            next_page: 0,
            num_pages: None,
            buffered: VecDeque::new(),
            failed: false,
        }
    }

    /// Start again from the first page
    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.num_pages = None;
        self.buffered.clear();
        self.failed = false;
    }

    fn fill(&mut self) -> DbResult<bool> {
        let num_pages = match self.num_pages {
            Some(n) => n,
            None => {
                let n = self.file.disk.num_pages()?;
                self.num_pages = Some(n);
                n
            }
        };

        while self.buffered.is_empty() && self.next_page < num_pages {
            let records = self.file.read_records(self.txn, self.next_page)?;
            self.next_page += 1;
            self.buffered.extend(records);
        }
        Ok(!self.buffered.is_empty())
    }
}

impl Iterator for HeapScan<'_> {
    type Item = DbResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffered.is_empty() {
            match self.fill() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
        self.buffered.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::EvictionPolicy;
    use crate::record::{Field, FieldType, RecordError};
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(capacity: usize) -> (TempDir, Arc<PageCache>, HeapFile) {
        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(PageCache::new(
            capacity,
            Duration::from_millis(50),
            EvictionPolicy::LeastRecent,
        ));
        let schema = Schema::from_types(&[FieldType::Int, FieldType::Str(1000)]);
        let heap = HeapFile::open(Arc::clone(&cache), temp_dir.path().join("heap.db"), schema).unwrap();
        (temp_dir, cache, heap)
    }

    fn row(i: i32) -> Record {
        Record::new(vec![Field::Int(i), Field::Str(format!("row{}", i))])
    }

    fn collect(heap: &HeapFile, txn: TransactionId) -> Vec<i32> {
        heap.scan(txn)
            .map(|r| r.unwrap().get_int(0).unwrap())
            .collect()
    }

    #[test]
    fn test_insert_fills_pages_in_order() {
        let (_temp, cache, heap) = setup(16);
        assert_eq!(heap.slots_per_page(), 4);
        let txn = TransactionId::new();

        let mut pages = Vec::new();
        for i in 0..9 {
            pages.extend(heap.insert_record(txn, &row(i)).unwrap());
        }
        let page_nos: Vec<_> = pages.iter().map(|p| p.page_no).collect();
        assert_eq!(page_nos, vec![0, 0, 0, 0, 1, 1, 1, 1, 2]);
        assert_eq!(heap.num_pages().unwrap(), 3);

        cache.commit(txn).unwrap();
        assert_eq!(collect(&heap, TransactionId::new()), (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_schema_mismatch_touches_nothing() {
        let (_temp, cache, heap) = setup(16);
        let txn = TransactionId::new();
        let bad = Record::new(vec![Field::from("x"), Field::from("y")]);

        assert!(matches!(
            heap.insert_record(txn, &bad),
            Err(DbError::Record(_))
        ));
        assert_eq!(heap.num_pages().unwrap(), 0);
        assert!(cache.lock_manager().locked_pages().is_empty());
    }

    #[test]
    fn test_string_with_nul_is_refused() {
        let (_temp, cache, heap) = setup(16);
        let txn = TransactionId::new();
        let bad = Record::new(vec![Field::Int(1), Field::from("a\0b")]);

        assert!(matches!(
            heap.insert_record(txn, &bad),
            Err(DbError::Record(RecordError::SchemaMismatch(_)))
        ));
        assert_eq!(heap.num_pages().unwrap(), 0);
        assert_eq!(cache.dirty_page_count(), 0);
        cache.commit(txn).unwrap();
        assert!(collect(&heap, TransactionId::new()).is_empty());
    }

    #[test]
    fn test_full_pages_are_unlocked_during_insert() {
        let (_temp, cache, heap) = setup(16);
        let t1 = TransactionId::new();
        for i in 0..4 {
            heap.insert_record(t1, &row(i)).unwrap();
        }
        cache.commit(t1).unwrap();

        let t2 = TransactionId::new();
        let dirtied = heap.insert_record(t2, &row(4)).unwrap();
        assert_eq!(dirtied, vec![PageId::new(heap.id(), 1)]);
        assert!(!cache.holds_lock(t2, PageId::new(heap.id(), 0)));
        assert!(cache.holds_lock(t2, PageId::new(heap.id(), 1)));
    }

    #[test]
    fn test_delete_by_record_id_and_reuse_slot() {
        let (_temp, cache, heap) = setup(16);
        let txn = TransactionId::new();
        for i in 0..6 {
            heap.insert_record(txn, &row(i)).unwrap();
        }

        let victim = heap
            .scan(txn)
            .map(Result::unwrap)
            .find(|r| r.get_int(0) == Some(2))
            .unwrap();
        let rid = victim.rid().unwrap();
        assert_eq!(heap.delete_record(txn, &victim).unwrap(), vec![rid.page]);
        assert!(matches!(
            heap.delete_record(txn, &victim),
            Err(DbError::RecordNotFound)
        ));
        assert!(matches!(
            heap.delete_record(txn, &row(3)),
            Err(DbError::RecordNotFound)
        ));

        // The freed slot is the first one found by the next insert
        heap.insert_record(txn, &row(100)).unwrap();
        cache.commit(txn).unwrap();
        assert_eq!(collect(&heap, TransactionId::new()), vec![0, 1, 100, 3, 4, 5]);
    }

    #[test]
    fn test_scan_skips_empty_pages_and_rewinds() {
        let (_temp, cache, heap) = setup(16);
        let txn = TransactionId::new();
        for i in 0..12 {
            heap.insert_record(txn, &row(i)).unwrap();
        }
        let middle: Vec<Record> = heap
            .scan(txn)
            .map(Result::unwrap)
            .filter(|r| r.rid().unwrap().page.page_no == 1)
            .collect();
        for record in &middle {
            heap.delete_record(txn, record).unwrap();
        }
        cache.commit(txn).unwrap();

        let reader = TransactionId::new();
        let mut scan = heap.iter(reader);
        let first: Vec<i32> = scan.by_ref().map(|r| r.unwrap().get_int(0).unwrap()).collect();
        assert_eq!(first, vec![0, 1, 2, 3, 8, 9, 10, 11]);
        assert!(scan.next().is_none());

        scan.rewind();
        assert_eq!(scan.count(), 8);
    }

    #[test]
    fn test_aborted_insert_is_invisible() {
        let (_temp, cache, heap) = setup(16);
        let t1 = TransactionId::new();
        heap.insert_record(t1, &row(1)).unwrap();
        cache.commit(t1).unwrap();

        let t2 = TransactionId::new();
        heap.insert_record(t2, &row(2)).unwrap();
        for i in 3..8 {
            heap.insert_record(t2, &row(i)).unwrap();
        }
        cache.abort(t2);

        assert_eq!(collect(&heap, TransactionId::new()), vec![1]);
    }

    #[test]
    fn test_corrupt_bitmap() {
        let (_temp, _cache, heap) = setup(16);
        let mut data = vec![0u8; crate::file::PAGE_SIZE];
        data[0] = 0xff;
        heap.write_page(0, &data).unwrap();

        let mut scan = heap.scan(TransactionId::new());
        assert!(matches!(scan.next(), Some(Err(DbError::CorruptPage { .. }))));
        assert!(scan.next().is_none());
    }
}
