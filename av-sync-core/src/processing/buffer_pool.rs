use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::error::PoolError;
use crate::models::media::StreamKind;
use crate::models::metrics::PoolStats;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Pool capacity that absorbs a full queue plus one unit in the engine and
/// one in the consumer, doubled for headroom.
pub fn recommended_capacity(queue_capacity: usize) -> usize {
    queue_capacity.saturating_add(2).saturating_mul(2)
}

/// Ownership tag of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Free,
    /// Checked out to the capture side (capture adapter, queue, engine).
    Capture,
    /// Handed to a render/playback consumer; never written again until free.
    Consumer,
}

/// Identity of one checkout of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pool: u64,
    index: u32,
    generation: u32,
}

impl SlotId {
    pub fn index(&self) -> u32 {
        self.index
    }
}

struct SlotEntry<B> {
    state: SlotState,
    generation: u32,
    storage: Option<B>,
}

struct PoolSlots<B> {
    entries: Vec<SlotEntry<B>>,
    free: Vec<u32>,
    checked_out: usize,
}

struct PoolShared<B> {
    id: u64,
    kind: StreamKind,
    capacity: usize,
    slots: Mutex<PoolSlots<B>>,
    exhausted: AtomicU64,
    high_water: AtomicUsize,
    violations: AtomicU64,
}

impl<B> PoolShared<B> {
    fn checkin(&self, id: SlotId, data: B) -> Result<(), PoolError> {
        let mut guard = self.slots.lock();
        let PoolSlots {
            entries,
            free,
            checked_out,
        } = &mut *guard;

        let Some(entry) = entries.get_mut(id.index as usize) else {
            return Err(PoolError::StaleHandle {
                kind: self.kind,
                index: id.index,
            });
        };
        if entry.state == SlotState::Free {
            return Err(PoolError::DoubleRelease {
                kind: self.kind,
                index: id.index,
            });
        }
        if entry.generation != id.generation {
            return Err(PoolError::StaleHandle {
                kind: self.kind,
                index: id.index,
            });
        }

        entry.state = SlotState::Free;
        entry.storage = Some(data);
        free.push(id.index);
        *checked_out -= 1;
        Ok(())
    }

    fn retag(&self, id: SlotId, from: SlotState, to: SlotState) -> Result<(), PoolError> {
        let mut guard = self.slots.lock();
        match guard.entries.get_mut(id.index as usize) {
            Some(entry) if entry.generation == id.generation && entry.state == from => {
                entry.state = to;
                Ok(())
            }
            _ => Err(PoolError::StaleHandle {
                kind: self.kind,
                index: id.index,
            }),
        }
    }

    fn report(&self, error: &PoolError) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        log::error!("{} buffer pool contract violation: {}", self.kind, error);
    }
}

/// Fixed-capacity pool of reusable buffers for one stream.
///
/// `acquire` never blocks: when every slot is checked out it returns
/// `PoolError::Exhausted` and the caller drops the unit. Slots move between
/// stages inside a `PooledBuffer`, so only one stage can touch a slot's
/// payload at a time. Releasing is checked against the slot table; a second
/// release of the same checkout is reported, never accepted.
pub struct BufferPool<B> {
    shared: Arc<PoolShared<B>>,
}

impl<B> Clone for BufferPool<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Default + Send + 'static> BufferPool<B> {
    /// Preallocate `capacity` buffers using `factory`.
    pub fn new(kind: StreamKind, capacity: usize, mut factory: impl FnMut() -> B) -> Self {
        let entries = (0..capacity)
            .map(|_| SlotEntry {
                state: SlotState::Free,
                generation: 0,
                storage: Some(factory()),
            })
            .collect();
        // Reverse so that slot 0 is handed out first.
        let free = (0..capacity as u32).rev().collect();

        Self {
            shared: Arc::new(PoolShared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                capacity,
                slots: Mutex::new(PoolSlots {
                    entries,
                    free,
                    checked_out: 0,
                }),
                exhausted: AtomicU64::new(0),
                high_water: AtomicUsize::new(0),
                violations: AtomicU64::new(0),
            }),
        }
    }

    /// Check out a free slot, tagged `Capture`.
    pub fn acquire(&self) -> Result<PooledBuffer<B>, PoolError> {
        let mut guard = self.shared.slots.lock();
        let PoolSlots {
            entries,
            free,
            checked_out,
        } = &mut *guard;

        let Some(index) = free.pop() else {
            drop(guard);
            self.shared.exhausted.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::Exhausted {
                kind: self.shared.kind,
                capacity: self.shared.capacity,
            });
        };

        let entry = &mut entries[index as usize];
        entry.state = SlotState::Capture;
        entry.generation = entry.generation.wrapping_add(1);
        let generation = entry.generation;
        let data = entry.storage.take().unwrap_or_default();

        *checked_out += 1;
        let in_use = *checked_out;
        drop(guard);
        self.shared.high_water.fetch_max(in_use, Ordering::Relaxed);

        Ok(PooledBuffer {
            id: SlotId {
                pool: self.shared.id,
                index,
                generation,
            },
            state: SlotState::Capture,
            data,
            released: false,
            pool: Arc::clone(&self.shared),
        })
    }

    /// Return a slot to this pool.
    ///
    /// A buffer belonging to another pool is reported as `ForeignSlot` and
    /// handed back to the pool that owns it.
    pub fn release(&self, buffer: PooledBuffer<B>) -> Result<(), PoolError> {
        if buffer.id.pool != self.shared.id {
            let error = PoolError::ForeignSlot {
                kind: self.shared.kind,
            };
            self.shared.report(&error);
            // The owning pool still gets its slot back.
            let _ = buffer.release();
            return Err(error);
        }
        buffer.release()
    }

    pub fn kind(&self) -> StreamKind {
        self.shared.kind
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn checked_out(&self) -> usize {
        self.shared.slots.lock().checked_out
    }

    pub fn available(&self) -> usize {
        self.shared.slots.lock().free.len()
    }

    pub fn exhausted_count(&self) -> u64 {
        self.shared.exhausted.load(Ordering::Relaxed)
    }

    pub fn high_water_mark(&self) -> usize {
        self.shared.high_water.load(Ordering::Relaxed)
    }

    pub fn contract_violations(&self) -> u64 {
        self.shared.violations.load(Ordering::Relaxed)
    }

    pub fn slot_state(&self, index: u32) -> Option<SlotState> {
        self.shared
            .slots
            .lock()
            .entries
            .get(index as usize)
            .map(|entry| entry.state)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            kind: self.shared.kind,
            capacity: self.shared.capacity,
            checked_out: self.checked_out(),
            high_water_mark: self.high_water_mark(),
            exhausted: self.exhausted_count(),
            contract_violations: self.contract_violations(),
        }
    }
}

/// Exclusive handle to a checked-out pool slot and its payload.
///
/// Moving the handle moves ownership of the slot. Once handed to a consumer
/// the payload is read-only. A handle dropped without `release` is reclaimed
/// with a warning.
pub struct PooledBuffer<B: Default + Send + 'static> {
    id: SlotId,
    state: SlotState,
    data: B,
    released: bool,
    pool: Arc<PoolShared<B>>,
}

impl<B: Default + Send + 'static> PooledBuffer<B> {
    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn kind(&self) -> StreamKind {
        self.pool.kind
    }

    pub fn data(&self) -> &B {
        &self.data
    }

    /// Mutable payload access; `None` once the slot belongs to a consumer.
    pub fn data_mut(&mut self) -> Option<&mut B> {
        match self.state {
            SlotState::Capture => Some(&mut self.data),
            SlotState::Free | SlotState::Consumer => None,
        }
    }

    /// Retag the slot `Capture → Consumer`.
    pub fn hand_to_consumer(&mut self) -> Result<(), PoolError> {
        if self.state == SlotState::Consumer {
            return Ok(());
        }
        match self
            .pool
            .retag(self.id, SlotState::Capture, SlotState::Consumer)
        {
            Ok(()) => {
                self.state = SlotState::Consumer;
                Ok(())
            }
            Err(error) => {
                self.pool.report(&error);
                Err(error)
            }
        }
    }

    /// Return the slot to its pool, making it immediately reusable.
    pub fn release(mut self) -> Result<(), PoolError> {
        self.released = true;
        let data = std::mem::take(&mut self.data);
        self.pool.checkin(self.id, data).inspect_err(|error| {
            self.pool.report(error);
        })
    }
}

/// A second handle to the same checkout, which the ownership discipline
/// otherwise makes impossible to construct.
#[cfg(test)]
impl<B: Default + Send + 'static> PooledBuffer<B> {
    pub(crate) fn forge(&self) -> Self {
        PooledBuffer {
            id: self.id,
            state: self.state,
            data: B::default(),
            released: false,
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<B: Default + Send + 'static> Drop for PooledBuffer<B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        log::warn!(
            "{} slot {} dropped without release; reclaiming",
            self.pool.kind,
            self.id.index
        );
        let data = std::mem::take(&mut self.data);
        if let Err(error) = self.pool.checkin(self.id, data) {
            self.pool.report(&error);
        }
    }
}

impl<B: Default + Send + 'static> fmt::Debug for PooledBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("kind", &self.pool.kind)
            .field("index", &self.id.index)
            .field("generation", &self.id.generation)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn video_pool(capacity: usize) -> BufferPool<Vec<u8>> {
        BufferPool::new(StreamKind::Video, capacity, || Vec::with_capacity(64))
    }

    #[test]
    fn acquire_until_exhausted() {
        let pool = video_pool(3);
        let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

        assert_eq!(pool.checked_out(), 3);
        assert_eq!(
            pool.acquire().unwrap_err(),
            PoolError::Exhausted {
                kind: StreamKind::Video,
                capacity: 3
            }
        );
        assert_eq!(pool.exhausted_count(), 1);

        for buffer in held {
            buffer.release().unwrap();
        }
        assert_eq!(pool.checked_out(), 0);
        assert_eq!(pool.high_water_mark(), 3);
    }

    #[test]
    fn released_slot_is_immediately_reusable() {
        let pool = video_pool(1);
        let first = pool.acquire().unwrap();
        let index = first.id().index();
        pool.release(first).unwrap();

        let second = pool.acquire().unwrap();
        assert_eq!(second.id().index(), index);
        assert_eq!(pool.slot_state(index), Some(SlotState::Capture));
        second.release().unwrap();
        assert_eq!(pool.slot_state(index), Some(SlotState::Free));
    }

    #[test]
    fn checked_out_never_exceeds_capacity() {
        let pool = video_pool(4);
        let mut held = Vec::new();
        let mut seed: u32 = 0x1234_5678;

        for _ in 0..2_000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            if seed % 3 == 0 && !held.is_empty() {
                let victim = (seed as usize / 3) % held.len();
                let buffer: PooledBuffer<Vec<u8>> = held.swap_remove(victim);
                buffer.release().unwrap();
            } else if let Ok(buffer) = pool.acquire() {
                held.push(buffer);
            }
            assert!(pool.checked_out() <= pool.capacity());
            assert_eq!(pool.checked_out(), held.len());
        }
    }

    #[test]
    fn double_release_is_reported() {
        let pool = video_pool(2);
        let buffer = pool.acquire().unwrap();
        let index = buffer.id().index();
        let duplicate = buffer.forge();

        buffer.release().unwrap();
        assert_eq!(
            duplicate.release().unwrap_err(),
            PoolError::DoubleRelease {
                kind: StreamKind::Video,
                index
            }
        );
        assert_eq!(pool.contract_violations(), 1);
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn stale_handle_is_reported() {
        let pool = video_pool(1);
        let first = pool.acquire().unwrap();
        let stale = first.forge();
        first.release().unwrap();

        let second = pool.acquire().unwrap();
        assert!(matches!(
            stale.release(),
            Err(PoolError::StaleHandle { .. })
        ));
        assert_eq!(pool.checked_out(), 1);
        second.release().unwrap();
    }

    #[test]
    fn foreign_slot_goes_back_to_its_owner() {
        let a = video_pool(1);
        let b = video_pool(1);
        let buffer = a.acquire().unwrap();

        assert_eq!(
            b.release(buffer).unwrap_err(),
            PoolError::ForeignSlot {
                kind: StreamKind::Video
            }
        );
        assert_eq!(a.checked_out(), 0);
        assert_eq!(b.contract_violations(), 1);
    }

    #[test]
    fn consumer_slot_is_read_only() {
        let pool = video_pool(1);
        let mut buffer = pool.acquire().unwrap();
        buffer.data_mut().unwrap().extend_from_slice(&[1, 2, 3]);

        buffer.hand_to_consumer().unwrap();
        assert!(buffer.data_mut().is_none());
        assert_eq!(buffer.data(), &vec![1, 2, 3]);
        assert_eq!(pool.slot_state(0), Some(SlotState::Consumer));
        buffer.release().unwrap();
    }

    #[test]
    fn dropped_handle_is_reclaimed() {
        let pool = video_pool(1);
        drop(pool.acquire().unwrap());
        assert_eq!(pool.checked_out(), 0);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn storage_is_reused_across_checkouts() {
        let pool = video_pool(1);
        let mut buffer = pool.acquire().unwrap();
        buffer.data_mut().unwrap().resize(4096, 7);
        buffer.release().unwrap();

        let again = pool.acquire().unwrap();
        assert!(again.data().capacity() >= 4096);
        again.release().unwrap();
    }

    #[test]
    fn release_from_another_thread() {
        let pool = video_pool(8);
        let held: Vec<_> = (0..8).map(|_| pool.acquire().unwrap()).collect();

        let worker = thread::spawn(move || {
            for buffer in held {
                buffer.release().unwrap();
            }
        });
        worker.join().unwrap();

        assert_eq!(pool.checked_out(), 0);
        assert_eq!(pool.available(), 8);
    }

    #[test]
    fn recommended_capacity_covers_queue_engine_and_consumer() {
        assert_eq!(recommended_capacity(8), 20);
        assert_eq!(recommended_capacity(usize::MAX), usize::MAX);
    }
}
