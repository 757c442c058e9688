//! Lock-free SPSC ring buffer over a power-of-two array of fixed-size elements.
//!
//! # Overview
//! - Capacity is a power of two, so a position in storage is `index & (capacity - 1)`.
//! - `in` and `out` are free-running `u32` counters. They are never reduced modulo the capacity;
//!   `in - out` with wrapping arithmetic is the number of stored elements and stays correct
//!   across counter overflow.
//! - Writes and reads copy in at most two contiguous segments: up to the physical end of storage,
//!   then the wrapped remainder from the start.
//! - Transfers are partial: `write`/`read` move as many whole elements as fit and return that
//!   count. A short count is not an error.
//!
//! # Memory ordering
//! The producer copies data in, then publishes `in` with `Release`. The consumer loads `in` with
//! `Acquire` before copying out, then publishes `out` with `Release` so the producer may reuse
//! the slots.
//!
//! # Ownership
//! Storage is either allocated by [`RingBuffer::new`] (feature `alloc`) and released on drop, or
//! borrowed from the caller through [`RingBuffer::init_over`].

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use zerocopy::{AsBytes, FromBytes};

use crate::error::KfifoError;
use crate::sync::{AtomicU32, Ordering};

#[cfg(feature = "alloc")]
use alloc::{boxed::Box, vec::Vec};

const MAX_CAPACITY: usize = 1 << 31;

/// Ring buffer of `capacity()` elements of `element_size()` bytes each.
pub struct RingBuffer<'a> {
    buf: NonNull<u8>,
    size: u32,
    esize: u32,
    in_: AtomicU32,
    out: AtomicU32,
    owned: bool,
    _storage: PhantomData<&'a mut [u8]>,
}

// SAFETY: the producer only writes slots outside `out..in` and the consumer only reads slots
// inside it; both sides are handed out at most once per `&mut` borrow through `split`, and every
// other `&self` method is a read of the atomics.
unsafe impl Send for RingBuffer<'_> {}
unsafe impl Sync for RingBuffer<'_> {}

#[cfg(feature = "alloc")]
impl RingBuffer<'static> {
    /// Allocate a ring buffer holding at least `capacity` elements.
    ///
    /// The capacity is rounded up to the next power of two (minimum 2).
    pub fn new(capacity: usize, element_size: usize) -> Result<Self, KfifoError> {
        if element_size == 0 {
            return Err(KfifoError::ZeroElementSize);
        }
        if element_size > u32::MAX as usize {
            return Err(KfifoError::CapacityOverflow);
        }
        let size = roundup_pow_of_two(capacity).ok_or(KfifoError::CapacityOverflow)?;
        let bytes = size
            .checked_mul(element_size)
            .ok_or(KfifoError::CapacityOverflow)?;

        let mut storage: Vec<u8> = Vec::new();
        if storage.try_reserve_exact(bytes).is_err() {
            log::debug!("kfifo: allocation of {} bytes failed", bytes);
            return Err(KfifoError::Alloc);
        }
        storage.resize(bytes, 0);
        let buf = NonNull::from(Box::leak(storage.into_boxed_slice())).cast::<u8>();

        Ok(Self::from_parts(buf, size as u32, element_size as u32, true))
    }

    /// Allocate a ring buffer sized for items of type `T`.
    pub fn for_items<T: AsBytes + FromBytes>(capacity: usize) -> Result<Self, KfifoError> {
        Self::new(capacity, core::mem::size_of::<T>())
    }
}

impl<'a> RingBuffer<'a> {
    /// Use caller-owned memory as storage.
    ///
    /// The capacity is the largest power of two not exceeding `buf.len() / element_size`.
    /// Trailing bytes beyond that are left untouched.
    pub fn init_over(buf: &'a mut [u8], element_size: usize) -> Result<Self, KfifoError> {
        if element_size == 0 {
            return Err(KfifoError::ZeroElementSize);
        }
        if element_size > u32::MAX as usize {
            return Err(KfifoError::CapacityOverflow);
        }
        let fit = buf.len() / element_size;
        if fit < 2 {
            return Err(KfifoError::BufferTooSmall);
        }
        let size = rounddown_pow_of_two(fit).min(MAX_CAPACITY);
        let ptr = NonNull::from(buf).cast::<u8>();

        Ok(Self::from_parts(ptr, size as u32, element_size as u32, false))
    }

    const fn from_parts(buf: NonNull<u8>, size: u32, esize: u32, owned: bool) -> Self {
        Self {
            buf,
            size,
            esize,
            in_: AtomicU32::new(0),
            out: AtomicU32::new(0),
            owned,
            _storage: PhantomData,
        }
    }

    /// Number of elements the buffer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size as usize
    }

    /// Size of one element in bytes.
    #[inline]
    pub fn element_size(&self) -> usize {
        self.esize as usize
    }

    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.used() as usize
    }

    /// Number of free element slots.
    #[inline]
    pub fn avail(&self) -> usize {
        (self.size - self.used()) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.used() == self.size
    }

    /// Write whole elements from `src`; returns the number of elements written.
    ///
    /// `src.len()` must be a multiple of the element size, otherwise nothing is written.
    #[inline]
    pub fn write(&mut self, src: &[u8]) -> usize {
        self.put(src)
    }

    /// Read whole elements into `dst`; returns the number of elements read.
    #[inline]
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        self.get(dst, true)
    }

    /// Like [`read`](Self::read) but leaves the elements in the buffer.
    #[inline]
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        self.get(dst, false)
    }

    /// Drop up to `count` elements without copying them; returns the number dropped.
    #[inline]
    pub fn skip(&mut self, count: usize) -> usize {
        self.discard(count)
    }

    /// Empty the buffer. Contents are not cleared.
    pub fn reset(&mut self) {
        self.in_.store(0, Ordering::Relaxed);
        self.out.store(0, Ordering::Relaxed);
    }

    /// Write typed items; the item size must equal the element size.
    pub fn write_items<T: AsBytes>(&mut self, items: &[T]) -> Result<usize, KfifoError> {
        self.check_item::<T>()?;
        Ok(self.put(items.as_bytes()))
    }

    /// Read typed items; the item size must equal the element size.
    pub fn read_items<T: AsBytes + FromBytes>(
        &mut self,
        items: &mut [T],
    ) -> Result<usize, KfifoError> {
        self.check_item::<T>()?;
        Ok(self.get(items.as_bytes_mut(), true))
    }

    pub fn peek_items<T: AsBytes + FromBytes>(&self, items: &mut [T]) -> Result<usize, KfifoError> {
        self.check_item::<T>()?;
        Ok(self.get(items.as_bytes_mut(), false))
    }

    /// Split into producer and consumer halves that may live in different contexts.
    #[inline]
    pub fn split(&mut self) -> (Producer<'_, 'a>, Consumer<'_, 'a>) {
        let ring: &RingBuffer<'a> = self;
        (Producer { ring }, Consumer { ring })
    }

    fn check_item<T>(&self) -> Result<(), KfifoError> {
        let found = core::mem::size_of::<T>();
        if found == self.esize as usize {
            Ok(())
        } else {
            Err(KfifoError::ElementSize {
                expected: self.esize as usize,
                found,
            })
        }
    }

    #[inline]
    fn used(&self) -> u32 {
        let out = self.out.load(Ordering::Acquire);
        let in_ = self.in_.load(Ordering::Acquire);
        in_.wrapping_sub(out)
    }

    #[inline]
    const fn mask(&self) -> u32 {
        self.size - 1
    }

    /// Whole elements in `bytes`, or `None` if the length is not element-aligned.
    #[inline]
    fn elements(&self, bytes: usize) -> Option<u32> {
        let esize = self.esize as usize;
        if bytes % esize != 0 {
            return None;
        }
        Some((bytes / esize).min(u32::MAX as usize) as u32)
    }

    // Producer side ------------------------------------------------------------------------

    /// Free slots as seen by the producer, paired with the producer's `in`.
    #[inline]
    pub(crate) fn producer_view(&self) -> (u32, u32) {
        let in_ = self.in_.load(Ordering::Relaxed);
        let out = self.out.load(Ordering::Acquire);
        (in_, self.size - in_.wrapping_sub(out))
    }

    #[inline]
    pub(crate) fn publish_in(&self, in_: u32) {
        self.in_.store(in_, Ordering::Release);
    }

    pub(crate) fn put(&self, src: &[u8]) -> usize {
        let Some(count) = self.elements(src.len()) else {
            return 0;
        };
        let (in_, unused) = self.producer_view();
        let len = count.min(unused);
        if len == 0 {
            return 0;
        }

        self.copy_in(&src[..len as usize * self.esize as usize], in_);
        self.publish_in(in_.wrapping_add(len));
        len as usize
    }

    /// Copy whole elements from `src` into storage starting at element index `at`.
    ///
    /// The caller must own the destination slots (producer side, inside the unused region).
    pub(crate) fn copy_in(&self, src: &[u8], at: u32) {
        let esize = self.esize as usize;
        let len = (src.len() / esize) as u32;
        let off = at & self.mask();
        let first = len.min(self.size - off) as usize * esize;
        let base = self.buf.as_ptr();

        // SAFETY: `off + first / esize <= size` and the wrapped remainder is at most
        // `len - first / esize <= size - 1` elements; both ranges lie inside storage and do not
        // overlap the caller's slice.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), base.add(off as usize * esize), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), base, src.len() - first);
        }
    }

    // Consumer side ------------------------------------------------------------------------

    /// Stored elements as seen by the consumer, paired with the consumer's `out`.
    #[inline]
    pub(crate) fn consumer_view(&self) -> (u32, u32) {
        let out = self.out.load(Ordering::Relaxed);
        let in_ = self.in_.load(Ordering::Acquire);
        (out, in_.wrapping_sub(out))
    }

    #[inline]
    pub(crate) fn publish_out(&self, out: u32) {
        self.out.store(out, Ordering::Release);
    }

    pub(crate) fn get(&self, dst: &mut [u8], consume: bool) -> usize {
        let Some(count) = self.elements(dst.len()) else {
            return 0;
        };
        let (out, used) = self.consumer_view();
        let len = count.min(used);
        if len == 0 {
            return 0;
        }

        self.copy_out(&mut dst[..len as usize * self.esize as usize], out);
        if consume {
            self.publish_out(out.wrapping_add(len));
        }
        len as usize
    }

    pub(crate) fn discard(&self, count: usize) -> usize {
        let (out, used) = self.consumer_view();
        let len = (count.min(u32::MAX as usize) as u32).min(used);
        self.publish_out(out.wrapping_add(len));
        len as usize
    }

    /// Copy whole elements starting at element index `at` into `dst`.
    ///
    /// The caller must only read slots inside the published region.
    pub(crate) fn copy_out(&self, dst: &mut [u8], at: u32) {
        let esize = self.esize as usize;
        let len = (dst.len() / esize) as u32;
        let off = at & self.mask();
        let first = len.min(self.size - off) as usize * esize;
        let base = self.buf.as_ptr();

        // SAFETY: same bounds as `copy_in`, with storage as the source.
        unsafe {
            ptr::copy_nonoverlapping(base.add(off as usize * esize), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }
}

impl Drop for RingBuffer<'_> {
    fn drop(&mut self) {
        #[cfg(feature = "alloc")]
        {
            if self.owned {
                let bytes = self.size as usize * self.esize as usize;
                // SAFETY: owned storage came from a `Box<[u8]>` of exactly `bytes` bytes in `new`.
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        self.buf.as_ptr(),
                        bytes,
                    )));
                }
            }
        }
        #[cfg(not(feature = "alloc"))]
        let _ = self.owned;
    }
}

impl core::fmt::Debug for RingBuffer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.size)
            .field("element_size", &self.esize)
            .field("in", &self.in_.load(Ordering::Relaxed))
            .field("out", &self.out.load(Ordering::Relaxed))
            .finish()
    }
}

/// Write half of a split [`RingBuffer`].
pub struct Producer<'r, 'a> {
    ring: &'r RingBuffer<'a>,
}

impl Producer<'_, '_> {
    #[inline]
    pub fn write(&mut self, src: &[u8]) -> usize {
        self.ring.put(src)
    }

    pub fn write_items<T: AsBytes>(&mut self, items: &[T]) -> Result<usize, KfifoError> {
        self.ring.check_item::<T>()?;
        Ok(self.ring.put(items.as_bytes()))
    }

    #[inline]
    pub fn avail(&self) -> usize {
        self.ring.avail()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// Read half of a split [`RingBuffer`].
pub struct Consumer<'r, 'a> {
    ring: &'r RingBuffer<'a>,
}

impl Consumer<'_, '_> {
    #[inline]
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        self.ring.get(dst, true)
    }

    #[inline]
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        self.ring.get(dst, false)
    }

    #[inline]
    pub fn skip(&mut self, count: usize) -> usize {
        self.ring.discard(count)
    }

    pub fn read_items<T: AsBytes + FromBytes>(
        &mut self,
        items: &mut [T],
    ) -> Result<usize, KfifoError> {
        self.ring.check_item::<T>()?;
        Ok(self.ring.get(items.as_bytes_mut(), true))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Smallest power of two `>= n`, at least 2, or `None` past `2^31`.
#[cfg(feature = "alloc")]
fn roundup_pow_of_two(n: usize) -> Option<usize> {
    let size = n.max(2).checked_next_power_of_two()?;
    (size <= MAX_CAPACITY).then_some(size)
}

/// Largest power of two `<= n`; `n` must be non-zero.
fn rounddown_pow_of_two(n: usize) -> usize {
    1 << (usize::BITS - 1 - n.leading_zeros())
}
