//! Swap store
//!
//! Fixed-size slot allocator over a block device. Each slot holds
//! exactly one page image, stored as [`SECTORS_PER_PAGE`] consecutive
//! sectors with no header or checksum. The store guards only its slot
//! occupancy bookkeeping; sector I/O runs outside the lock because the
//! device already serializes it.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::addr::{PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_PAGE};
use crate::error::{Result, VmError};
use crate::hal::BlockDevice;

/// Stable index of one swap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    /// Returns the slot index as a raw usize value.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Slot allocator over the swap device.
pub struct SwapStore {
    device: Arc<dyn BlockDevice>,
    /// Occupancy bitmap; `true` means some page's contents live there.
    slots: Mutex<Vec<bool>>,
}

impl SwapStore {
    /// Builds a store over `device`, with one slot per page of device
    /// capacity. All slots start free.
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let slot_count = device.sector_count() / SECTORS_PER_PAGE;
        log::debug!("swap store: {} slots ({} KiB)", slot_count, slot_count * PAGE_SIZE / 1024);
        Self {
            device,
            slots: Mutex::new(vec![false; slot_count]),
        }
    }

    /// Total number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of occupied slots.
    pub fn occupied_count(&self) -> usize {
        self.slots.lock().iter().filter(|&&o| o).count()
    }

    /// Whether `slot` currently holds a page image.
    pub fn is_occupied(&self, slot: SlotId) -> bool {
        self.slots.lock().get(slot.0).copied().unwrap_or(false)
    }

    /// Reserves the first free slot, or `None` when the swap area is
    /// full. There is no reclamation policy; callers treat `None` as an
    /// unrecoverable exhaustion fault.
    pub fn allocate(&self) -> Option<SlotId> {
        let mut slots = self.slots.lock();
        let free = slots.iter().position(|&occupied| !occupied)?;
        slots[free] = true;
        Some(SlotId(free))
    }

    /// Marks `slot` free, making it eligible for reuse by a later
    /// eviction anywhere.
    pub fn free(&self, slot: SlotId) {
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get_mut(slot.0) {
            *entry = false;
        }
    }

    /// Writes one page image into `slot` as eight sector writes.
    pub fn write(&self, slot: SlotId, src: &[u8]) -> Result<()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        for i in 0..SECTORS_PER_PAGE {
            let sector = slot.0 * SECTORS_PER_PAGE + i;
            self.device
                .write_sector(sector, &src[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE])?;
        }
        log::trace!("swap out -> slot {}", slot.0);
        Ok(())
    }

    /// Reads the page image stored in `slot` as eight sector reads.
    /// Fails with [`VmError::SwapSlotMissing`] if the slot is not
    /// occupied: the caller's record points at stale data.
    pub fn read(&self, slot: SlotId, dst: &mut [u8]) -> Result<()> {
        debug_assert_eq!(dst.len(), PAGE_SIZE);
        if !self.is_occupied(slot) {
            return Err(VmError::SwapSlotMissing);
        }
        for i in 0..SECTORS_PER_PAGE {
            let sector = slot.0 * SECTORS_PER_PAGE + i;
            self.device
                .read_sector(sector, &mut dst[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE])?;
        }
        log::trace!("swap in <- slot {}", slot.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RamDisk;

    fn store(pages: usize) -> SwapStore {
        SwapStore::new(Arc::new(RamDisk::new(pages * SECTORS_PER_PAGE)))
    }

    #[test]
    fn test_slot_count_from_capacity() {
        let store = SwapStore::new(Arc::new(RamDisk::new(4 * SECTORS_PER_PAGE + 3)));
        // A partial trailing page of sectors does not make a slot.
        assert_eq!(store.slot_count(), 4);
    }

    #[test]
    fn test_first_fit_allocation() {
        let store = store(3);
        let a = store.allocate().unwrap();
        let b = store.allocate().unwrap();
        let c = store.allocate().unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert!(store.allocate().is_none());

        store.free(b);
        // The freed slot is reused before any higher index.
        assert_eq!(store.allocate().unwrap(), b);
    }

    #[test]
    fn test_write_read_round_trip() {
        let store = store(2);
        let slot = store.allocate().unwrap();
        let mut image = [0u8; PAGE_SIZE];
        for (i, byte) in image.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        store.write(slot, &image).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        store.read(slot, &mut out).unwrap();
        assert_eq!(image[..], out[..]);
    }

    #[test]
    fn test_read_unoccupied_slot_fails() {
        let store = store(2);
        let slot = store.allocate().unwrap();
        store.free(slot);
        let mut out = [0u8; PAGE_SIZE];
        assert_eq!(store.read(slot, &mut out), Err(VmError::SwapSlotMissing));
    }
}
