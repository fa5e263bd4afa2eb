//! Reference-counted, pooled byte buffers
//!
//! [`ByteBuf`] is the indexed byte container the rest of the toolkit is built
//! on: a reader/writer-cursored window over shared backing storage, with
//! pooled allocation, power-of-two growth, zero-copy slicing/duplication and
//! a composite form that presents a sequence of buffers as one.
//!
//! Lifecycle is driven by an explicit atomic reference count rather than by
//! `Drop`: `release()` at count zero returns the backing array to the global
//! pool and the storage node to the releasing thread's recycler. Dropping a
//! handle without releasing it is a pool miss, never a leak of memory; the
//! `Arc` inside keeps storage valid until the last handle goes away.

use std::cell::UnsafeCell;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::alloc::{self, ArrayPool};
use crate::composite::Composite;
use crate::error::{Error, Result};
use crate::refcount::RefCount;
use crate::DEFAULT_MAX_CAPACITY;

/// Shared backing storage plus the owner-level reference count.
///
/// One `BufCore` is shared by a buffer and every view derived from it.
/// Cursors live in the handles; only the array and its logical capacity live
/// here.
///
/// # Safety contract
///
/// The reference count is atomic and may be touched from any thread, but the
/// storage behind the `UnsafeCell` follows the channel discipline: a buffer
/// is mutated by at most one thread at a time. All raw access is confined to
/// the short accessor methods below.
pub(crate) struct BufCore {
    refs: RefCount,
    storage: UnsafeCell<Storage>,
}

struct Storage {
    /// Rented from the global array pool; `None` once deallocated.
    array: Option<Box<[u8]>>,
    /// Logical capacity, at most `array.len()`.
    capacity: usize,
}

// SAFETY: mutation of `storage` is confined to a single thread at a time by
// the per-channel threading discipline; the count gating deallocation is
// atomic.
unsafe impl Send for BufCore {}
unsafe impl Sync for BufCore {}

impl BufCore {
    pub(crate) fn new(array: Box<[u8]>, capacity: usize) -> Self {
        debug_assert!(capacity <= array.len());
        Self {
            refs: RefCount::new(),
            storage: UnsafeCell::new(Storage {
                array: Some(array),
                capacity,
            }),
        }
    }

    #[inline]
    pub(crate) fn refs(&self) -> &RefCount {
        &self.refs
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        // SAFETY: shared read under the single-writer contract
        unsafe { (*self.storage.get()).capacity }
    }

    /// Borrow the live backing array.
    ///
    /// Fails on a deallocated core, which a handle can only observe after a
    /// zero-count release.
    #[inline]
    fn try_array(&self) -> Result<&[u8]> {
        // SAFETY: shared read under the single-writer contract
        let storage = unsafe { &*self.storage.get() };
        match storage.array.as_deref() {
            Some(array) => Ok(&array[..storage.capacity]),
            None => Err(Error::IllegalReferenceCount(0)),
        }
    }

    /// Borrow the live backing array mutably.
    ///
    /// # Safety
    ///
    /// Caller must be the only thread mutating this buffer and must not hold
    /// the borrow across another storage access.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    unsafe fn try_array_mut(&self) -> Result<&mut [u8]> {
        let storage = &mut *self.storage.get();
        let capacity = storage.capacity;
        match storage.array.as_deref_mut() {
            Some(array) => Ok(&mut array[..capacity]),
            None => Err(Error::IllegalReferenceCount(0)),
        }
    }

    /// Grow logical capacity to `new_cap`, renting a larger array if the
    /// current one cannot hold it.
    ///
    /// # Safety
    ///
    /// Single-writer contract as for [`Self::try_array_mut`].
    unsafe fn grow_to(&self, new_cap: usize) -> Result<()> {
        let storage = &mut *self.storage.get();
        let array = storage
            .array
            .as_ref()
            .ok_or(Error::IllegalReferenceCount(0))?;
        if array.len() >= new_cap {
            storage.capacity = new_cap;
            return Ok(());
        }
        let mut fresh = ArrayPool::global().rent(new_cap);
        fresh[..storage.capacity].copy_from_slice(&array[..storage.capacity]);
        let old = storage.array.replace(fresh);
        if let Some(old) = old {
            ArrayPool::global().give(old);
        }
        storage.capacity = new_cap;
        Ok(())
    }

    /// Replace the backing array with one sized for `new_cap`, copying
    /// `min(old, new)` bytes and returning the old array to the pool.
    ///
    /// # Safety
    ///
    /// Single-writer contract as for [`Self::try_array_mut`].
    unsafe fn reallocate(&self, new_cap: usize) -> Result<()> {
        let storage = &mut *self.storage.get();
        let array = storage
            .array
            .as_ref()
            .ok_or(Error::IllegalReferenceCount(0))?;
        let mut fresh = ArrayPool::global().rent(new_cap);
        let keep = storage.capacity.min(new_cap);
        fresh[..keep].copy_from_slice(&array[..keep]);
        let old = storage.array.replace(fresh);
        if let Some(old) = old {
            ArrayPool::global().give(old);
        }
        storage.capacity = new_cap;
        Ok(())
    }

    /// Deallocation hook: return the array to the global pool.
    ///
    /// Runs exactly once, from the release that took the count to zero.
    ///
    /// # Safety
    ///
    /// Caller must have observed the count reach zero, so no legal accessor
    /// remains.
    pub(crate) unsafe fn deallocate(&self) {
        let storage = &mut *self.storage.get();
        if let Some(array) = storage.array.take() {
            ArrayPool::global().give(array);
        }
        storage.capacity = 0;
    }

    /// Reinstall storage into a recycled core and rearm its count to 1.
    ///
    /// # Safety
    ///
    /// Caller must hold the only handle to this core (the recycler checks
    /// `Arc::strong_count == 1`).
    pub(crate) unsafe fn install(&self, array: Box<[u8]>, capacity: usize) {
        debug_assert!(capacity <= array.len());
        let storage = &mut *self.storage.get();
        storage.array = Some(array);
        storage.capacity = capacity;
        self.refs.reset();
    }
}

impl Drop for BufCore {
    fn drop(&mut self) {
        // Backstop for handles dropped without release: the array still goes
        // back to the pool even though the count never reached zero.
        if let Some(array) = self.storage.get_mut().array.take() {
            ArrayPool::global().give(array);
        }
    }
}

/// Generates the fixed-width accessor families. Big-endian is the default
/// wire order; `_le` variants are explicit, mirroring the `bytes` crate.
macro_rules! int_accessors {
    ($($ty:ident: $read:ident $read_le:ident $write:ident $write_le:ident
         $get:ident $get_le:ident $set:ident $set_le:ident;)+) => {
        $(
            #[doc = concat!("Read a big-endian `", stringify!($ty), "`, advancing the reader index")]
            pub fn $read(&mut self) -> Result<$ty> {
                let mut b = [0u8; std::mem::size_of::<$ty>()];
                self.read_into(&mut b)?;
                Ok(<$ty>::from_be_bytes(b))
            }

            #[doc = concat!("Read a little-endian `", stringify!($ty), "`, advancing the reader index")]
            pub fn $read_le(&mut self) -> Result<$ty> {
                let mut b = [0u8; std::mem::size_of::<$ty>()];
                self.read_into(&mut b)?;
                Ok(<$ty>::from_le_bytes(b))
            }

            #[doc = concat!("Append a big-endian `", stringify!($ty), "`, advancing the writer index")]
            pub fn $write(&mut self, value: $ty) -> Result<()> {
                self.write_bytes(&value.to_be_bytes())
            }

            #[doc = concat!("Append a little-endian `", stringify!($ty), "`, advancing the writer index")]
            pub fn $write_le(&mut self, value: $ty) -> Result<()> {
                self.write_bytes(&value.to_le_bytes())
            }

            #[doc = concat!("Big-endian `", stringify!($ty), "` at an absolute index; cursors stay put")]
            pub fn $get(&self, index: usize) -> Result<$ty> {
                let mut b = [0u8; std::mem::size_of::<$ty>()];
                self.get_bytes(index, &mut b)?;
                Ok(<$ty>::from_be_bytes(b))
            }

            #[doc = concat!("Little-endian `", stringify!($ty), "` at an absolute index; cursors stay put")]
            pub fn $get_le(&self, index: usize) -> Result<$ty> {
                let mut b = [0u8; std::mem::size_of::<$ty>()];
                self.get_bytes(index, &mut b)?;
                Ok(<$ty>::from_le_bytes(b))
            }

            #[doc = concat!("Store a big-endian `", stringify!($ty), "` at an absolute index; cursors stay put")]
            pub fn $set(&mut self, index: usize, value: $ty) -> Result<()> {
                self.set_bytes(index, &value.to_be_bytes())
            }

            #[doc = concat!("Store a little-endian `", stringify!($ty), "` at an absolute index; cursors stay put")]
            pub fn $set_le(&mut self, index: usize, value: $ty) -> Result<()> {
                self.set_bytes(index, &value.to_le_bytes())
            }
        )+
    };
}

/// Which reference count governs a handle
#[derive(Clone)]
pub(crate) enum ViewRefs {
    /// The handle counts against the storage owner's count. Owners, plain
    /// slices and plain duplicates all share that one count.
    Shared,
    /// Retained view: an independent count that holds one reference on the
    /// owner's count for its whole lifetime.
    Owned(Arc<RefCount>),
}

pub(crate) enum Repr {
    Heap {
        core: Arc<BufCore>,
        refs: ViewRefs,
        /// Physical offset of index 0 within the core storage.
        offset: usize,
        /// `Some(len)` pins a sliced view to a fixed window; `None` tracks
        /// the live core capacity.
        window: Option<usize>,
    },
    Composite(Composite),
}

/// The indexed, cursored byte container
///
/// Invariant after every public operation:
/// `0 <= reader_index <= writer_index <= capacity <= max_capacity`.
/// Every operation on a zero-count buffer fails with
/// [`Error::IllegalReferenceCount`].
pub struct ByteBuf {
    pub(crate) repr: Repr,
    reader: usize,
    writer: usize,
    marked_reader: usize,
    marked_writer: usize,
    max_capacity: usize,
}

impl ByteBuf {
    /// Allocate a pooled buffer with `initial` capacity, growable up to
    /// `max_capacity`
    pub fn pooled(initial: usize, max_capacity: usize) -> Result<Self> {
        if initial > max_capacity {
            return Err(Error::CapacityExceeded {
                requested: initial,
                max: max_capacity,
            });
        }
        let core = alloc::acquire_core(initial);
        Ok(Self {
            repr: Repr::Heap {
                core,
                refs: ViewRefs::Shared,
                offset: 0,
                window: None,
            },
            reader: 0,
            writer: 0,
            marked_reader: 0,
            marked_writer: 0,
            max_capacity,
        })
    }

    /// An empty composite buffer; components are attached with
    /// [`Self::add_component`]
    pub fn composite() -> Self {
        Self {
            repr: Repr::Composite(Composite::new()),
            reader: 0,
            writer: 0,
            marked_reader: 0,
            marked_writer: 0,
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }

    pub(crate) fn from_composite(composite: Composite, len: usize) -> Self {
        Self {
            repr: Repr::Composite(composite),
            reader: 0,
            writer: len,
            marked_reader: 0,
            marked_writer: 0,
            max_capacity: len,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    fn governing_refs(&self) -> &RefCount {
        match &self.repr {
            Repr::Heap { core, refs, .. } => match refs {
                ViewRefs::Shared => core.refs(),
                ViewRefs::Owned(own) => own,
            },
            Repr::Composite(c) => c.refs(),
        }
    }

    /// Current reference count of this buffer (of the view itself for
    /// retained views)
    pub fn reference_count(&self) -> i32 {
        self.governing_refs().count()
    }

    #[inline]
    pub(crate) fn check_accessible(&self) -> Result<()> {
        let count = self.reference_count();
        if count <= 0 {
            return Err(Error::IllegalReferenceCount(count));
        }
        Ok(())
    }

    /// Increment the reference count by one
    pub fn retain(&self) -> Result<()> {
        self.governing_refs().retain()
    }

    /// Increment the reference count by `n`
    pub fn retain_n(&self, n: u32) -> Result<()> {
        self.governing_refs().retain_n(n)
    }

    /// Decrement the reference count by one; true iff the buffer was
    /// deallocated
    pub fn release(&self) -> Result<bool> {
        self.release_n(1)
    }

    /// Decrement the reference count by `n`; true iff the buffer was
    /// deallocated
    ///
    /// Reaching zero returns the backing array to the global pool. A
    /// retained view reaching zero also drops its single hold on the owning
    /// storage. A composite reaching zero releases every component exactly
    /// once.
    pub fn release_n(&self, n: u32) -> Result<bool> {
        match &self.repr {
            Repr::Heap { core, refs, .. } => match refs {
                ViewRefs::Shared => Self::release_core(core, n),
                ViewRefs::Owned(own) => {
                    if own.release_n(n)? {
                        Self::release_core(core, 1)?;
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                }
            },
            Repr::Composite(c) => c.release_n(n),
        }
    }

    fn release_core(core: &Arc<BufCore>, n: u32) -> Result<bool> {
        if core.refs().release_n(n)? {
            // SAFETY: the count just hit zero; no legal accessor remains.
            unsafe { core.deallocate() };
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Debugging hook; records nothing in release builds
    pub fn touch(&self, _hint: &str) -> &Self {
        self
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    /// Currently allocated capacity; may be below [`Self::max_capacity`]
    pub fn capacity(&self) -> usize {
        match &self.repr {
            Repr::Heap { core, window, .. } => match window {
                Some(len) => *len,
                None => core.capacity(),
            },
            Repr::Composite(c) => c.capacity(),
        }
    }

    /// Hard upper bound on growth
    #[inline]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    #[inline]
    pub fn reader_index(&self) -> usize {
        self.reader
    }

    #[inline]
    pub fn writer_index(&self) -> usize {
        self.writer
    }

    #[inline]
    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    #[inline]
    pub fn writable_bytes(&self) -> usize {
        self.capacity() - self.writer
    }

    #[inline]
    pub fn max_writable_bytes(&self) -> usize {
        self.max_capacity - self.writer
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.writer > self.reader
    }

    /// True when the readable region occupies one contiguous allocation
    pub fn is_contiguous(&self) -> bool {
        match &self.repr {
            Repr::Heap { .. } => true,
            Repr::Composite(c) => c.component_count() <= 1,
        }
    }

    /// Number of backing components (1 for array-backed buffers)
    pub fn component_count(&self) -> usize {
        match &self.repr {
            Repr::Heap { .. } => 1,
            Repr::Composite(c) => c.component_count(),
        }
    }

    // ------------------------------------------------------------------
    // Cursors and marks
    // ------------------------------------------------------------------

    pub fn set_reader_index(&mut self, index: usize) -> Result<()> {
        self.check_accessible()?;
        if index > self.writer {
            return Err(Error::index(format!(
                "reader_index {} > writer_index {}",
                index, self.writer
            )));
        }
        self.reader = index;
        Ok(())
    }

    pub fn set_writer_index(&mut self, index: usize) -> Result<()> {
        self.check_accessible()?;
        if index < self.reader || index > self.capacity() {
            return Err(Error::index(format!(
                "writer_index {} outside [{}, {}]",
                index,
                self.reader,
                self.capacity()
            )));
        }
        self.writer = index;
        Ok(())
    }

    pub fn set_index(&mut self, reader: usize, writer: usize) -> Result<()> {
        self.check_accessible()?;
        if reader > writer || writer > self.capacity() {
            return Err(Error::index(format!(
                "indices ({}, {}) violate 0 <= r <= w <= {}",
                reader,
                writer,
                self.capacity()
            )));
        }
        self.reader = reader;
        self.writer = writer;
        Ok(())
    }

    /// Reset both cursors to zero; content bytes are left untouched
    pub fn clear(&mut self) -> Result<()> {
        self.check_accessible()?;
        self.reader = 0;
        self.writer = 0;
        Ok(())
    }

    pub fn mark_reader_index(&mut self) {
        self.marked_reader = self.reader;
    }

    pub fn reset_reader_index(&mut self) -> Result<()> {
        let marked = self.marked_reader;
        self.set_reader_index(marked)
    }

    pub fn mark_writer_index(&mut self) {
        self.marked_writer = self.writer;
    }

    pub fn reset_writer_index(&mut self) -> Result<()> {
        let marked = self.marked_writer;
        self.set_writer_index(marked)
    }

    pub fn skip_bytes(&mut self, len: usize) -> Result<()> {
        self.check_accessible()?;
        if self.readable_bytes() < len {
            return Err(Error::index(format!(
                "cannot skip {} bytes, {} readable",
                len,
                self.readable_bytes()
            )));
        }
        self.reader += len;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Growth
    // ------------------------------------------------------------------

    /// Make room for at least `needed` more writable bytes, growing the
    /// backing storage to the next power of two (capped at `max_capacity`)
    pub fn ensure_writable(&mut self, needed: usize) -> Result<()> {
        self.check_accessible()?;
        if self.writable_bytes() >= needed {
            return Ok(());
        }
        let required = self
            .writer
            .checked_add(needed)
            .ok_or(Error::CapacityExceeded {
                requested: usize::MAX,
                max: self.max_capacity,
            })?;
        if required > self.max_capacity {
            return Err(Error::CapacityExceeded {
                requested: required,
                max: self.max_capacity,
            });
        }
        match &self.repr {
            Repr::Heap { core, window: None, .. } => {
                let new_cap = required
                    .checked_next_power_of_two()
                    .unwrap_or(self.max_capacity)
                    .min(self.max_capacity);
                // SAFETY: single-writer contract; bounds validated above.
                unsafe { core.grow_to(new_cap) }
            }
            // A sliced view has max_capacity == window length, so growth
            // requests land in the CapacityExceeded arm above.
            Repr::Heap { .. } => Err(Error::CapacityExceeded {
                requested: required,
                max: self.capacity(),
            }),
            // Composites grow by adding components, never in place.
            Repr::Composite(_) => Err(Error::CapacityExceeded {
                requested: required,
                max: self.capacity(),
            }),
        }
    }

    /// Resize to exactly `new_cap`, copying `min(old, new)` bytes into a
    /// freshly rented array and returning the old one to the pool
    ///
    /// Shrinking trims the cursors to fit.
    pub fn adjust_capacity(&mut self, new_cap: usize) -> Result<()> {
        self.check_accessible()?;
        if new_cap > self.max_capacity {
            return Err(Error::CapacityExceeded {
                requested: new_cap,
                max: self.max_capacity,
            });
        }
        match &self.repr {
            Repr::Heap { core, window: None, .. } => {
                // SAFETY: single-writer contract.
                unsafe { core.reallocate(new_cap)? };
                self.writer = self.writer.min(new_cap);
                self.reader = self.reader.min(self.writer);
                Ok(())
            }
            _ => Err(Error::index(
                "capacity adjustment on a sliced or composite view".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Absolute access
    // ------------------------------------------------------------------

    fn bounds(&self, index: usize, len: usize) -> Result<()> {
        let end = index.checked_add(len);
        match end {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(Error::index(format!(
                "window {}+{} exceeds capacity {}",
                index,
                len,
                self.capacity()
            ))),
        }
    }

    /// Copy `dst.len()` bytes starting at `index`; cursors stay put
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.check_accessible()?;
        match &self.repr {
            Repr::Heap { core, offset, .. } => {
                self.bounds(index, dst.len())?;
                let array = core.try_array()?;
                let at = offset + index;
                let end = at + dst.len();
                // a shrunken parent can leave a stale view window
                if end > array.len() {
                    return Err(Error::index(format!(
                        "window {}+{} exceeds backing storage {}",
                        at,
                        dst.len(),
                        array.len()
                    )));
                }
                dst.copy_from_slice(&array[at..end]);
                Ok(())
            }
            Repr::Composite(c) => {
                self.bounds(index, dst.len())?;
                c.get_bytes(index, dst)
            }
        }
    }

    /// Copy `src` into the buffer starting at `index`; cursors stay put
    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.check_accessible()?;
        self.bounds(index, src.len())?;
        match &mut self.repr {
            Repr::Heap { core, offset, .. } => {
                // SAFETY: single-writer contract; bounds validated above.
                let array = unsafe { core.try_array_mut()? };
                let at = *offset + index;
                let end = at + src.len();
                if end > array.len() {
                    return Err(Error::index(format!(
                        "window {}+{} exceeds backing storage {}",
                        at,
                        src.len(),
                        array.len()
                    )));
                }
                array[at..end].copy_from_slice(src);
                Ok(())
            }
            Repr::Composite(c) => c.set_bytes(index, src),
        }
    }

    /// Zero-copy view of the window `[index, index + len)`
    ///
    /// Fails if the window is out of range or spans a component boundary of
    /// a composite buffer.
    pub fn readable_span(&self, index: usize, len: usize) -> Result<&[u8]> {
        self.check_accessible()?;
        self.bounds(index, len)?;
        match &self.repr {
            Repr::Heap { core, offset, .. } => {
                let array = core.try_array()?;
                let at = offset + index;
                if at + len > array.len() {
                    return Err(Error::index(format!(
                        "window {}+{} exceeds backing storage {}",
                        at,
                        len,
                        array.len()
                    )));
                }
                Ok(&array[at..at + len])
            }
            Repr::Composite(c) => c.readable_span(index, len),
        }
    }

    /// Mutable view of the writable region `[writer_index, capacity)`
    pub(crate) fn writable_slice(&mut self) -> Result<&mut [u8]> {
        self.check_accessible()?;
        let writer = self.writer;
        let capacity = self.capacity();
        match &self.repr {
            Repr::Heap { core, offset, .. } => {
                // SAFETY: single-writer contract; the borrow is returned to
                // the caller who holds &mut self for its duration.
                let array = unsafe { core.try_array_mut()? };
                let at = offset + writer;
                let end = offset + capacity;
                if end > array.len() {
                    return Err(Error::index(format!(
                        "window {}..{} exceeds backing storage {}",
                        at,
                        end,
                        array.len()
                    )));
                }
                Ok(&mut array[at..end])
            }
            Repr::Composite(_) => Err(Error::InvalidData(
                "writable span of a composite buffer",
            )),
        }
    }

    // ------------------------------------------------------------------
    // Cursor I/O
    // ------------------------------------------------------------------

    /// Read into `dst`, advancing the reader index
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
        if self.readable_bytes() < dst.len() {
            self.check_accessible()?;
            return Err(Error::index(format!(
                "read of {} bytes, {} readable",
                dst.len(),
                self.readable_bytes()
            )));
        }
        let at = self.reader;
        self.get_bytes(at, dst)?;
        self.reader = at + dst.len();
        Ok(())
    }

    /// Read `len` bytes into a fresh vector, advancing the reader index
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_into(&mut out)?;
        Ok(out)
    }

    /// Append `src`, growing as needed and advancing the writer index
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        let at = self.writer;
        self.set_bytes(at, src)?;
        self.writer = at + src.len();
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_into(&mut b)?;
        Ok(b[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_u8(value as u8)
    }

    pub fn get_u8(&self, index: usize) -> Result<u8> {
        let mut b = [0u8; 1];
        self.get_bytes(index, &mut b)?;
        Ok(b[0])
    }

    pub fn get_i8(&self, index: usize) -> Result<i8> {
        Ok(self.get_u8(index)? as i8)
    }

    pub fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        self.set_bytes(index, &[value])
    }

    pub fn set_i8(&mut self, index: usize, value: i8) -> Result<()> {
        self.set_u8(index, value as u8)
    }

    int_accessors! {
        u16: read_u16 read_u16_le write_u16 write_u16_le get_u16 get_u16_le set_u16 set_u16_le;
        i16: read_i16 read_i16_le write_i16 write_i16_le get_i16 get_i16_le set_i16 set_i16_le;
        u32: read_u32 read_u32_le write_u32 write_u32_le get_u32 get_u32_le set_u32 set_u32_le;
        i32: read_i32 read_i32_le write_i32 write_i32_le get_i32 get_i32_le set_i32 set_i32_le;
        u64: read_u64 read_u64_le write_u64 write_u64_le get_u64 get_u64_le set_u64 set_u64_le;
        i64: read_i64 read_i64_le write_i64 write_i64_le get_i64 get_i64_le set_i64 set_i64_le;
        f32: read_f32 read_f32_le write_f32 write_f32_le get_f32 get_f32_le set_f32 set_f32_le;
        f64: read_f64 read_f64_le write_f64 write_f64_le get_f64 get_f64_le set_f64 set_f64_le;
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Non-retained view of `[index, index + len)` sharing this buffer's
    /// reference count; releasing the slice releases the parent once
    pub fn slice(&self, index: usize, len: usize) -> Result<ByteBuf> {
        self.check_accessible()?;
        self.bounds(index, len)?;
        match &self.repr {
            Repr::Heap { core, refs, offset, .. } => Ok(ByteBuf {
                repr: Repr::Heap {
                    core: Arc::clone(core),
                    refs: refs.clone(),
                    offset: offset + index,
                    window: Some(len),
                },
                reader: 0,
                writer: len,
                marked_reader: 0,
                marked_writer: 0,
                max_capacity: len,
            }),
            // Composite views always carry their own count; see DESIGN.md.
            Repr::Composite(c) => c.retained_view(index, len),
        }
    }

    /// View of `[index, index + len)` with its own reference count; retains
    /// the owning storage on construction
    pub fn retained_slice(&self, index: usize, len: usize) -> Result<ByteBuf> {
        self.check_accessible()?;
        self.bounds(index, len)?;
        match &self.repr {
            Repr::Heap { core, offset, .. } => {
                core.refs().retain()?;
                Ok(ByteBuf {
                    repr: Repr::Heap {
                        core: Arc::clone(core),
                        refs: ViewRefs::Owned(Arc::new(RefCount::new())),
                        offset: offset + index,
                        window: Some(len),
                    },
                    reader: 0,
                    writer: len,
                    marked_reader: 0,
                    marked_writer: 0,
                    max_capacity: len,
                })
            }
            Repr::Composite(c) => c.retained_view(index, len),
        }
    }

    /// Non-retained view over the whole storage with independent cursors
    pub fn duplicate(&self) -> Result<ByteBuf> {
        self.check_accessible()?;
        match &self.repr {
            Repr::Heap { core, refs, offset, window } => Ok(ByteBuf {
                repr: Repr::Heap {
                    core: Arc::clone(core),
                    refs: refs.clone(),
                    offset: *offset,
                    window: *window,
                },
                reader: self.reader,
                writer: self.writer,
                marked_reader: 0,
                marked_writer: 0,
                max_capacity: self.max_capacity,
            }),
            Repr::Composite(c) => {
                let mut dup = c.retained_view(0, c.capacity())?;
                dup.set_index(self.reader, self.writer)?;
                Ok(dup)
            }
        }
    }

    /// Duplicate with its own reference count; retains the owning storage
    pub fn retained_duplicate(&self) -> Result<ByteBuf> {
        self.check_accessible()?;
        match &self.repr {
            Repr::Heap { core, offset, window, .. } => {
                core.refs().retain()?;
                Ok(ByteBuf {
                    repr: Repr::Heap {
                        core: Arc::clone(core),
                        refs: ViewRefs::Owned(Arc::new(RefCount::new())),
                        offset: *offset,
                        window: *window,
                    },
                    reader: self.reader,
                    writer: self.writer,
                    marked_reader: 0,
                    marked_writer: 0,
                    max_capacity: self.max_capacity,
                })
            }
            Repr::Composite(c) => {
                let mut dup = c.retained_view(0, c.capacity())?;
                dup.set_index(self.reader, self.writer)?;
                Ok(dup)
            }
        }
    }

    /// Deep copy of `[index, index + len)` into a fresh pooled buffer
    pub fn copy(&self, index: usize, len: usize) -> Result<ByteBuf> {
        self.check_accessible()?;
        self.bounds(index, len)?;
        let mut out = ByteBuf::pooled(len, self.max_capacity.max(len))?;
        match self.readable_span(index, len) {
            Ok(span) => out.write_bytes(span)?,
            Err(_) => {
                let mut tmp = vec![0u8; len];
                self.get_bytes(index, &mut tmp)?;
                out.write_bytes(&tmp)?;
            }
        }
        Ok(out)
    }

    /// Materialize the readable region into one contiguous pooled buffer
    pub fn consolidate(&self) -> Result<ByteBuf> {
        self.copy(self.reader, self.readable_bytes())
    }

    // ------------------------------------------------------------------
    // Search and comparison
    // ------------------------------------------------------------------

    /// First occurrence of `needle` at or after the reader index
    ///
    /// Returns the absolute index of the match, or `None`.
    pub fn index_of(&self, needle: &[u8]) -> Result<Option<usize>> {
        self.check_accessible()?;
        if needle.is_empty() {
            return Ok(Some(self.reader));
        }
        if needle.len() > self.readable_bytes() {
            return Ok(None);
        }
        let reader = self.reader;
        self.with_readable(|hay| {
            hay.windows(needle.len())
                .position(|w| w == needle)
                .map(|p| p + reader)
        })
    }

    /// Byte-lexicographic comparison of the readable regions
    pub fn compare_to(&self, other: &ByteBuf) -> Result<Ordering> {
        self.with_readable(|a| other.with_readable(|b| a.cmp(b)))?
    }

    /// Byte equality of the readable regions
    pub fn equals(&self, other: &ByteBuf) -> Result<bool> {
        self.with_readable(|a| other.with_readable(|b| a == b))?
    }

    /// Run `f` over the contiguous readable region, copying a composite into
    /// scratch space only when it actually spans components
    pub(crate) fn with_readable<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.check_accessible()?;
        match self.readable_span(self.reader, self.readable_bytes()) {
            Ok(span) => Ok(f(span)),
            Err(Error::InvalidData(_)) => {
                let mut tmp = vec![0u8; self.readable_bytes()];
                self.get_bytes(self.reader, &mut tmp)?;
                Ok(f(&tmp))
            }
            Err(e) => Err(e),
        }
    }

    /// Largest contiguous readable chunk starting at the reader index;
    /// empty for a dead buffer
    pub(crate) fn first_readable_chunk(&self) -> &[u8] {
        if self.check_accessible().is_err() || !self.is_readable() {
            return &[];
        }
        match &self.repr {
            Repr::Heap { .. } => self
                .readable_span(self.reader, self.readable_bytes())
                .unwrap_or(&[]),
            Repr::Composite(c) => c.first_chunk(self.reader, self.writer),
        }
    }

    // ------------------------------------------------------------------
    // Composite assembly
    // ------------------------------------------------------------------

    /// Append a component, transferring the caller's reference into the
    /// composite; `advance_writer` bumps the writer index by the
    /// component's readable bytes
    pub fn add_component(&mut self, advance_writer: bool, buf: ByteBuf) -> Result<()> {
        self.check_accessible()?;
        buf.check_accessible()?;
        match &mut self.repr {
            Repr::Composite(c) => {
                let len = buf.readable_bytes();
                c.push(buf);
                if advance_writer {
                    self.writer += len;
                }
                Ok(())
            }
            Repr::Heap { .. } => Err(Error::InvalidData(
                "add_component on an array-backed buffer",
            )),
        }
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("capacity", &self.capacity())
            .field("refs", &self.reference_count())
            .finish()
    }
}

// PartialEq only: a zero-count buffer compares unequal even to itself, so
// the total-equivalence promise of Eq cannot be made.
impl PartialEq for ByteBuf {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

impl PartialOrd for ByteBuf {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare_to(other).ok()
    }
}

impl bytes::Buf for ByteBuf {
    fn remaining(&self) -> usize {
        self.readable_bytes()
    }

    fn chunk(&self) -> &[u8] {
        self.first_readable_chunk()
    }

    fn advance(&mut self, cnt: usize) {
        // Buf's contract is a panic on overrun.
        if self.skip_bytes(cnt).is_err() {
            panic!("advance past the readable region");
        }
    }
}

impl Drop for ByteBuf {
    fn drop(&mut self) {
        if let Repr::Heap { core, .. } = &self.repr {
            // The last handle of a fully released buffer recycles the
            // storage node on its own thread.
            if core.refs().count() == 0 && Arc::strong_count(core) == 1 {
                alloc::recycle_core(Arc::clone(core));
            }
        }
    }
}
