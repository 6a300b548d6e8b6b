//! Thread-safe epoch-indexed circular buffer.
//!
//! [`EpochRing`] hands values between a producer thread and any number of
//! consumer threads. Every insertion is stamped with an **epoch**, a
//! monotonically increasing sequence number starting at 0, distinct from
//! any wall-clock timestamp the value itself may carry. The buffer keeps
//! the most recent `capacity` values; older epochs are overwritten and
//! become unavailable.
//!
//! Consumers can poll with [`EpochRing::get`] or block in
//! [`EpochRing::wait_for_epoch`] until the producer catches up. The wait
//! path uses its own mutex/condvar pair, decoupled from the data lock, so
//! a blocked consumer never holds up the producer.

use std::sync::{Condvar, Mutex, MutexGuard};

/// Sequence number assigned by the ring at insertion time.
pub type Epoch = i64;

/// Epoch value meaning "no data yet" / "latest available".
const EPOCH_NONE: Epoch = -1;

struct RingInner<T> {
    slots: Vec<Option<T>>,
    /// Epoch of the most recent insertion, -1 before the first.
    epoch: Epoch,
    count: usize,
    head: usize,
}

/// Fixed-capacity circular buffer addressed by insertion epoch.
///
/// All methods take `&self`; the ring is safe to share across threads
/// behind an `Arc`.
pub struct EpochRing<T> {
    inner: Mutex<RingInner<T>>,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
}

impl<T: Clone> EpochRing<T> {
    /// Creates a ring holding up to `capacity` values.
    ///
    /// `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring capacity must be at least 1");
        Self {
            inner: Mutex::new(RingInner {
                slots: (0..capacity).map(|_| None).collect(),
                epoch: EPOCH_NONE,
                count: 0,
                head: 0,
            }),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
        }
    }

    /// Inserts `value`, assigns it the next epoch, and wakes all waiters.
    ///
    /// When the ring is full the oldest slot is overwritten; the evicted
    /// value is dropped. Returns the epoch assigned to `value`.
    pub fn put(&self, value: T) -> Epoch {
        let epoch;
        {
            let mut inner = self.lock_inner();
            let head = inner.head;
            inner.slots[head] = Some(value);
            inner.head = (head + 1) % inner.slots.len();
            if inner.count < inner.slots.len() {
                inner.count += 1;
            }
            inner.epoch += 1;
            epoch = inner.epoch;
        }
        // Waiters check the epoch under this lock, so a put landing
        // between their check and their wait still wakes them.
        let _guard = self.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.wait_cond.notify_all();
        epoch
    }

    /// Returns a clone of the value stored at `epoch`.
    ///
    /// An `epoch` of -1 selects the latest value. Epochs that have been
    /// evicted or have not yet occurred return `None`; that is a normal
    /// outcome, not an error.
    pub fn get(&self, epoch: Epoch) -> Option<T> {
        let inner = self.lock_inner();
        let epoch = if epoch == EPOCH_NONE { inner.epoch } else { epoch };
        Self::slot_for(&inner, epoch).and_then(|idx| inner.slots[idx].clone())
    }

    /// Returns the latest value together with its epoch.
    pub fn latest(&self) -> Option<(Epoch, T)> {
        let inner = self.lock_inner();
        let epoch = inner.epoch;
        Self::slot_for(&inner, epoch)
            .and_then(|idx| inner.slots[idx].clone())
            .map(|value| (epoch, value))
    }

    /// Epoch of the most recent insertion, -1 while empty.
    pub fn latest_epoch(&self) -> Epoch {
        self.lock_inner().epoch
    }

    /// Epoch of the oldest value still held.
    ///
    /// Clamped to 0 while the ring has yet to wrap, matching the
    /// first-insertion-is-epoch-0 numbering.
    pub fn oldest_epoch(&self) -> Epoch {
        let inner = self.lock_inner();
        let oldest = inner.epoch - inner.count as Epoch + 1;
        oldest.max(0)
    }

    /// Number of values currently held.
    pub fn len(&self) -> usize {
        self.lock_inner().count
    }

    /// Returns true when no values are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of values the ring can hold.
    pub fn capacity(&self) -> usize {
        self.lock_inner().slots.len()
    }

    /// Drops all values and resets epoch tracking to empty.
    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
        inner.epoch = EPOCH_NONE;
        inner.count = 0;
        inner.head = 0;
    }

    /// Blocks the calling thread until `epoch` has been inserted.
    ///
    /// Returns immediately if it already has. Does not spin: the thread
    /// sleeps on a condition variable signalled by every [`put`].
    ///
    /// [`put`]: EpochRing::put
    pub fn wait_for_epoch(&self, epoch: Epoch) {
        let mut guard = self.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
        while self.lock_inner().epoch < epoch {
            guard = self
                .wait_cond
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, RingInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Maps an epoch to its slot index, or `None` when out of range.
    fn slot_for(inner: &RingInner<T>, epoch: Epoch) -> Option<usize> {
        if epoch == EPOCH_NONE || epoch > inner.epoch || epoch <= inner.epoch - inner.count as Epoch
        {
            return None;
        }
        let capacity = inner.slots.len();
        // Latest value sits one behind head; walk back by the epoch gap.
        let back = (inner.epoch - epoch) as usize;
        let latest = (inner.head + capacity - 1) % capacity;
        Some((latest + capacity - back) % capacity)
    }
}
