use crate::file::PAGE_SIZE;
use crate::record::SlotId;

/// View over one heap page: `[occupancy bitmap][fixed-width record slots]`.
///
/// Works on any byte buffer, so the same code reads a page behind a read
/// guard and edits one behind a write guard.
pub struct HeapPage<B> {
    buffer: B,
    record_size: usize,
    slot_count: usize,
}

impl<B: AsRef<[u8]>> HeapPage<B> {
    /// Calculate maximum number of slots for a given record size
    pub fn calculate_slot_count(record_size: usize) -> usize {
        if record_size == 0 || record_size > PAGE_SIZE {
            return 0;
        }
        // ceil(slots / 8) + slots * record_size <= PAGE_SIZE
        (PAGE_SIZE * 8) / (1 + record_size * 8)
    }

    pub fn new(buffer: B, record_size: usize) -> Self {
        Self {
            buffer,
            record_size,
            slot_count: Self::calculate_slot_count(record_size),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn bitmap_len(&self) -> usize {
        self.slot_count.div_ceil(8)
    }

    fn slot_range(&self, slot: SlotId) -> std::ops::Range<usize> {
        let start = self.bitmap_len() + slot * self.record_size;
        start..start + self.record_size
    }

    /// Check if a slot is used
    pub fn is_slot_used(&self, slot: SlotId) -> bool {
        if slot >= self.slot_count {
            return false;
        }
        self.buffer.as_ref()[slot / 8] & (1 << (slot % 8)) != 0
    }

    /// Find a free slot, returns None if page is full
    pub fn find_free_slot(&self) -> Option<SlotId> {
        (0..self.slot_count).find(|&slot| !self.is_slot_used(slot))
    }

    pub fn used_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.slot_count).filter(|&slot| self.is_slot_used(slot))
    }

    pub fn used_count(&self) -> usize {
        self.buffer.as_ref()[..self.bitmap_len()]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.as_ref()[..self.bitmap_len()]
            .iter()
            .all(|&b| b == 0)
    }

    /// Raw bytes stored in `slot`
    pub fn slot_bytes(&self, slot: SlotId) -> &[u8] {
        &self.buffer.as_ref()[self.slot_range(slot)]
    }

    /// Bits set past the last slot mean the page was not written by a heap file
    pub fn validate(&self) -> Result<(), String> {
        if self.slot_count == 0 {
            return Err(format!("record size {} does not fit a page", self.record_size));
        }
        let tail_bits = self.slot_count % 8;
        if tail_bits != 0 {
            let last = self.buffer.as_ref()[self.bitmap_len() - 1];
            if last >> tail_bits != 0 {
                return Err(format!(
                    "occupancy bitmap marks slots beyond {}",
                    self.slot_count
                ));
            }
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeapPage<B> {
    /// Store `bytes` in `slot` and mark it used
    pub fn put(&mut self, slot: SlotId, bytes: &[u8]) {
        let range = self.slot_range(slot);
        let buffer = self.buffer.as_mut();
        buffer[range].copy_from_slice(bytes);
        buffer[slot / 8] |= 1 << (slot % 8);
    }

    /// Mark `slot` free. Returns whether it was in use.
    pub fn clear(&mut self, slot: SlotId) -> bool {
        if !self.is_slot_used(slot) {
            return false;
        }
        let range = self.slot_range(slot);
        let buffer = self.buffer.as_mut();
        buffer[slot / 8] &= !(1 << (slot % 8));
        buffer[range].fill(0);
        true
    }
}
