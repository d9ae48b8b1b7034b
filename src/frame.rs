//! Frame table and eviction
//!
//! Global registry of the physical frames currently backing virtual
//! pages. Frames live in an arena indexed by [`FrameId`]; the eviction
//! scan walks frames in registration order with a second-chance pass
//! over the hardware accessed bits.
//!
//! Locking: the table lock covers only the arena bookkeeping. It is
//! never held across pool allocation or swap I/O. Page locks are taken
//! inside the scan only with `try_lock`; a contended page counts as
//! recently used. Swap-out of a selected victim happens after the
//! table lock is dropped, under the victim's own page lock.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{Result, VmError};
use crate::hal::{FramePool, PageBuf};
use crate::page::PageRef;
use crate::swap::SwapStore;

/// Stable handle to one registered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// Returns the arena index as a raw usize value.
    pub const fn index(self) -> usize {
        self.0
    }
}

struct Frame {
    /// The frame's physical page, shared so I/O can run outside the
    /// table lock.
    buf: Arc<Mutex<PageBuf>>,
    /// Page currently occupying this frame, if any.
    page: Option<PageRef>,
    /// Set while the frame is in transition: freshly registered but not
    /// yet attached, or selected for eviction. Pinned frames are
    /// invisible to the victim scan and must not be released.
    pinned: bool,
}

#[derive(Default)]
struct FrameArena {
    frames: Vec<Option<Frame>>,
    free: Vec<usize>,
    /// Registration order; the victim scan starts from the front every
    /// time (no persistent clock hand).
    order: Vec<FrameId>,
}

/// Global frame registry with eviction.
pub struct FrameTable {
    pool: Arc<dyn FramePool>,
    inner: Mutex<FrameArena>,
}

enum Victim {
    /// A frame with no resident page; reusable as-is.
    Vacant(FrameId),
    /// A resident page to swap out, with its frame's contents.
    Occupied(FrameId, PageRef, Arc<Mutex<PageBuf>>),
}

impl FrameTable {
    /// Creates an empty table over `pool`.
    pub fn new(pool: Arc<dyn FramePool>) -> Self {
        Self {
            pool,
            inner: Mutex::new(FrameArena::default()),
        }
    }

    /// Number of registered frames.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether the table has no registered frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Obtains one frame for reuse, evicting if the pool is exhausted.
    ///
    /// The returned frame is registered, pinned and has no resident
    /// page; the caller must [`attach`](Self::attach) a page to it.
    /// Its contents are stale and will be overwritten by the new
    /// occupant's load.
    pub fn allocate(&self, swap: &SwapStore) -> Result<FrameId> {
        if let Some(buf) = self.pool.allocate() {
            return Ok(self.register(buf));
        }
        match self.select_victim()? {
            Victim::Vacant(id) => Ok(id),
            Victim::Occupied(id, page, buf) => {
                // Outside the table lock now; only the victim's own
                // lock serializes the write-out.
                let mut victim = page.lock();
                if victim.frame != Some(id) {
                    // The page was torn down between selection and
                    // here; the frame is already ours.
                    return Ok(id);
                }
                log::debug!("evicting page {:#x} from frame {}", victim.va().as_usize(), id.0);
                let written = {
                    let guard = buf.lock();
                    victim.swap_out(swap, guard.as_slice())
                };
                match written {
                    Ok(()) => Ok(id),
                    Err(e) => {
                        // Write-out failed, so the page keeps its
                        // content and stays resident. Relink the frame
                        // and unpin it; a later scan may retry.
                        log::warn!(
                            "eviction of page {:#x} failed: {}",
                            victim.va().as_usize(),
                            e
                        );
                        drop(victim);
                        self.attach(id, page);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Registers a fresh pool page as a pinned, unoccupied frame.
    fn register(&self, buf: PageBuf) -> FrameId {
        let mut inner = self.inner.lock();
        let frame = Frame {
            buf: Arc::new(Mutex::new(buf)),
            page: None,
            pinned: true,
        };
        let id = match inner.free.pop() {
            Some(index) => {
                inner.frames[index] = Some(frame);
                FrameId(index)
            }
            None => {
                inner.frames.push(Some(frame));
                FrameId(inner.frames.len() - 1)
            }
        };
        inner.order.push(id);
        id
    }

    /// Second-chance victim selection, run under the table lock.
    ///
    /// Scans frames in registration order from the beginning: a frame
    /// with no resident page is an immediate victim; an accessed
    /// resident page gets its bit cleared and one more epoch; an
    /// unaccessed one is selected. If the scan reaches the end, the
    /// last examined frame is taken, which guarantees termination but
    /// not a globally least-recently-used choice.
    fn select_victim(&self) -> Result<Victim> {
        let mut inner = self.inner.lock();
        let order = inner.order.clone();
        let mut last_examined: Option<FrameId> = None;
        for id in order {
            let Some(frame) = inner.frames[id.0].as_mut() else {
                continue;
            };
            if frame.pinned {
                continue;
            }
            let Some(page_ref) = frame.page.clone() else {
                frame.pinned = true;
                return Ok(Victim::Vacant(id));
            };
            // try_lock: a page mid-claim or mid-teardown holds its own
            // lock while waiting on the table lock, so blocking here
            // would deadlock. Treat contended pages as recently used.
            let Some(page) = page_ref.try_lock() else {
                continue;
            };
            let (va, table) = (page.va(), page.table().clone());
            drop(page);
            last_examined = Some(id);
            if table.is_accessed(va) {
                table.set_accessed(va, false);
            } else {
                return Ok(Self::take_victim(&mut inner, id));
            }
        }
        match last_examined {
            Some(id) => Ok(Self::take_victim(&mut inner, id)),
            None => Err(VmError::OutOfMemory),
        }
    }

    fn take_victim(inner: &mut FrameArena, id: FrameId) -> Victim {
        let frame = inner.frames[id.0]
            .as_mut()
            .unwrap_or_else(|| unreachable!());
        frame.pinned = true;
        match frame.page.take() {
            Some(page) => Victim::Occupied(id, page, frame.buf.clone()),
            None => Victim::Vacant(id),
        }
    }

    /// Links `page` as the resident of `id` and unpins the frame,
    /// making it visible to the victim scan again.
    pub fn attach(&self, id: FrameId, page: PageRef) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames[id.0].as_mut() {
            debug_assert!(frame.page.is_none());
            frame.page = Some(page);
            frame.pinned = false;
        }
    }

    /// Clears the frame's resident-page reference.
    pub fn detach(&self, id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames[id.0].as_mut() {
            frame.page = None;
        }
    }

    /// The page currently resident in `id`, if any.
    pub fn resident(&self, id: FrameId) -> Option<PageRef> {
        let inner = self.inner.lock();
        inner.frames.get(id.0)?.as_ref()?.page.clone()
    }

    /// Runs `f` over the frame's contents. The table lock is dropped
    /// before the buffer lock is taken, so `f` may perform I/O.
    pub fn with_buffer<R>(&self, id: FrameId, f: impl FnOnce(&mut PageBuf) -> R) -> Result<R> {
        let buf = {
            let inner = self.inner.lock();
            inner
                .frames
                .get(id.0)
                .and_then(|slot| slot.as_ref())
                .map(|frame| frame.buf.clone())
                .ok_or_else(|| VmError::InvalidArgument("stale frame handle".into()))?
        };
        let mut guard = buf.lock();
        Ok(f(&mut guard))
    }

    /// Removes `id` from the table and returns its memory to the pool.
    /// The frame must have no resident page.
    pub fn release(&self, id: FrameId) -> Result<()> {
        let frame = {
            let mut inner = self.inner.lock();
            let Some(slot) = inner.frames.get_mut(id.0) else {
                return Err(VmError::InvalidArgument("stale frame handle".into()));
            };
            match slot {
                Some(frame) if frame.page.is_some() => {
                    return Err(VmError::InvalidArgument("releasing an occupied frame".into()));
                }
                Some(frame) if frame.pinned => {
                    return Err(VmError::InvalidArgument("releasing a pinned frame".into()));
                }
                None => {
                    return Err(VmError::InvalidArgument("stale frame handle".into()));
                }
                Some(_) => {}
            }
            let frame = slot.take().unwrap_or_else(|| unreachable!());
            inner.free.push(id.0);
            inner.order.retain(|&other| other != id);
            frame
        };
        match Arc::try_unwrap(frame.buf) {
            Ok(buf) => self.pool.release(buf.into_inner()),
            // A transient with_buffer borrow is still alive; the memory
            // is dropped when it ends instead of returning to the pool.
            Err(_) => log::warn!("frame {} released while its buffer was borrowed", id.0),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::SECTORS_PER_PAGE;
    use crate::testing::{CountingFramePool, RamDisk};

    fn fixtures(frames: usize, swap_pages: usize) -> (FrameTable, SwapStore) {
        let table = FrameTable::new(Arc::new(CountingFramePool::new(frames)));
        let swap = SwapStore::new(Arc::new(RamDisk::new(swap_pages * SECTORS_PER_PAGE)));
        (table, swap)
    }

    #[test]
    fn test_allocate_registers_in_order() {
        let (table, swap) = fixtures(3, 0);
        let a = table.allocate(&swap).unwrap();
        let b = table.allocate(&swap).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_exhausted_pool_without_victims_is_out_of_memory() {
        let (table, swap) = fixtures(1, 0);
        let id = table.allocate(&swap).unwrap();
        // The only frame is pinned (never attached), so nothing is
        // evictable.
        assert_eq!(table.allocate(&swap), Err(VmError::OutOfMemory));
        let _ = id;
    }

    #[test]
    fn test_vacated_frame_is_immediate_victim() {
        let (table, swap) = fixtures(1, 0);
        let id = table.allocate(&swap).unwrap();
        // Simulate a page that came and went: attach then detach.
        let page = crate::testing::anon_page_ref(0x40_0000);
        table.attach(id, page);
        table.detach(id);
        let reused = table.allocate(&swap).unwrap();
        assert_eq!(reused, id);
    }

    #[test]
    fn test_release_returns_memory_to_pool() {
        let pool = Arc::new(CountingFramePool::new(1));
        let table = FrameTable::new(pool.clone());
        let swap = SwapStore::new(Arc::new(RamDisk::new(0)));
        let id = table.allocate(&swap).unwrap();
        let page = crate::testing::anon_page_ref(0x40_0000);
        table.attach(id, page);
        table.detach(id);
        assert_eq!(pool.available(), 0);
        table.release(id).unwrap();
        assert_eq!(pool.available(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_failed_swap_out_relinks_victim() {
        let (table, swap) = fixtures(1, 0);
        let id = table.allocate(&swap).unwrap();
        let page = crate::testing::anon_page_ref(0x40_0000);
        page.lock().frame = Some(id);
        table.attach(id, page.clone());

        // No swap slots: eviction fails, and the victim must keep its
        // frame link with the frame evictable again afterwards.
        assert_eq!(table.allocate(&swap), Err(VmError::SwapExhausted));
        assert_eq!(page.lock().frame, Some(id));
        assert!(Arc::ptr_eq(&table.resident(id).unwrap(), &page));

        page.lock().frame = None;
        table.detach(id);
        table.release(id).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_release_occupied_frame_fails() {
        let (table, swap) = fixtures(1, 0);
        let id = table.allocate(&swap).unwrap();
        let page = crate::testing::anon_page_ref(0x40_0000);
        table.attach(id, page);
        assert!(table.release(id).is_err());
    }
}
