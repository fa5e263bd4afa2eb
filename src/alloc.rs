//! Two-level pooling for buffer storage
//!
//! Features:
//! - Process-global, size-classed pool of raw byte arrays (power-of-two
//!   classes, bounded per class, internally synchronized)
//! - Thread-local recycler of buffer storage nodes, so the object and the
//!   array are both reused without touching the system allocator in the
//!   hot path
//! - [`BufAllocator`], the allocation seam handlers see
//!
//! An array is recycled on the thread that releases it; the array pool
//! itself is shared by all threads.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufCore, ByteBuf};
use crate::{DEFAULT_MAX_CAPACITY, MAX_POOLED_ARRAY, MIN_ARRAY_CLASS};

/// Arrays cached per size class
const BUCKET_CAP: usize = 64;

/// Storage nodes cached per thread
const RECYCLER_CAP: usize = 64;

/// Size classes from `MIN_ARRAY_CLASS` to `MAX_POOLED_ARRAY`, inclusive
const NUM_CLASSES: usize =
    (MAX_POOLED_ARRAY.trailing_zeros() - MIN_ARRAY_CLASS.trailing_zeros() + 1) as usize;

/// Process-global pool of backing arrays, keyed by power-of-two size class
///
/// Oversize requests bypass the pool entirely; returning an array whose
/// length is not a pooled class is tolerated silently and simply drops it.
pub struct ArrayPool {
    buckets: [Mutex<Vec<Box<[u8]>>>; NUM_CLASSES],
}

static GLOBAL_POOL: ArrayPool = ArrayPool {
    buckets: [const { Mutex::new(Vec::new()) }; NUM_CLASSES],
};

impl ArrayPool {
    /// The process-wide pool
    pub fn global() -> &'static ArrayPool {
        &GLOBAL_POOL
    }

    /// Size class an allocation of `min_cap` lands in
    pub(crate) fn size_class(min_cap: usize) -> usize {
        if min_cap > MAX_POOLED_ARRAY {
            return min_cap;
        }
        min_cap.next_power_of_two().max(MIN_ARRAY_CLASS)
    }

    fn class_index(len: usize) -> Option<usize> {
        if len.is_power_of_two() && (MIN_ARRAY_CLASS..=MAX_POOLED_ARRAY).contains(&len) {
            Some((len.trailing_zeros() - MIN_ARRAY_CLASS.trailing_zeros()) as usize)
        } else {
            None
        }
    }

    /// Rent an array of at least `min_cap` bytes
    pub fn rent(&self, min_cap: usize) -> Box<[u8]> {
        let size = Self::size_class(min_cap);
        if let Some(idx) = Self::class_index(size) {
            if let Some(array) = self.buckets[idx].lock().pop() {
                return array;
            }
        }
        vec![0u8; size].into_boxed_slice()
    }

    /// Return an array to its class bucket
    ///
    /// Foreign arrays (lengths that are not a pooled class) and overflow
    /// beyond the per-class bound are dropped without complaint.
    pub fn give(&self, array: Box<[u8]>) {
        if let Some(idx) = Self::class_index(array.len()) {
            let mut bucket = self.buckets[idx].lock();
            if bucket.len() < BUCKET_CAP {
                bucket.push(array);
            }
        }
    }

    /// Number of arrays currently cached across all classes
    pub fn cached_arrays(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    /// Drop every cached array; the shutdown hook for tests
    pub fn purge(&self) {
        for bucket in &self.buckets {
            bucket.lock().clear();
        }
    }
}

thread_local! {
    static CORE_RECYCLER: RefCell<Vec<Arc<BufCore>>> = const { RefCell::new(Vec::new()) };
}

/// Produce a storage node with a rented array installed and a count of 1,
/// reusing a node recycled on this thread when one is free
pub(crate) fn acquire_core(capacity: usize) -> Arc<BufCore> {
    let array = ArrayPool::global().rent(capacity);
    let recycled = CORE_RECYCLER
        .try_with(|ring| {
            let mut ring = ring.borrow_mut();
            while let Some(core) = ring.pop() {
                if Arc::strong_count(&core) == 1 {
                    return Some(core);
                }
                // a stale handle still aliases this node; it cannot be reused
            }
            None
        })
        .ok()
        .flatten();
    match recycled {
        Some(core) => {
            // SAFETY: strong_count == 1 was checked, so this thread holds
            // the only handle.
            unsafe { core.install(array, capacity) };
            core
        }
        None => Arc::new(BufCore::new(array, capacity)),
    }
}

/// Park a fully released storage node in this thread's ring
pub(crate) fn recycle_core(core: Arc<BufCore>) {
    let _ = CORE_RECYCLER.try_with(|ring| {
        let mut ring = ring.borrow_mut();
        if ring.len() < RECYCLER_CAP {
            ring.push(core);
        }
    });
}

/// Allocation seam the pipeline hands to handlers
pub trait BufAllocator {
    /// Pooled, growable, array-backed buffer
    fn buffer(&self, initial: usize) -> ByteBuf;

    /// Heap buffer; the core carries array-backed storage only, so this is
    /// the same pooled variety as [`Self::buffer`]
    fn heap_buffer(&self, initial: usize) -> ByteBuf;

    /// Empty composite buffer
    fn composite_buffer(&self) -> ByteBuf;
}

/// The default allocator: thread-local node recycling over the global
/// array pool
#[derive(Debug, Default, Clone, Copy)]
pub struct PooledAllocator;

impl BufAllocator for PooledAllocator {
    fn buffer(&self, initial: usize) -> ByteBuf {
        let max = DEFAULT_MAX_CAPACITY.max(initial);
        ByteBuf::pooled(initial, max).expect("initial capacity bounded by max")
    }

    fn heap_buffer(&self, initial: usize) -> ByteBuf {
        self.buffer(initial)
    }

    fn composite_buffer(&self) -> ByteBuf {
        ByteBuf::composite()
    }
}
