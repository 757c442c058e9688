//! Record mode: a byte ring buffer carrying length-prefixed, variable-length messages.
//!
//! Every record is stored as a little-endian length prefix of one or two bytes followed by the
//! payload. The producer copies prefix and payload before publishing `in` once, so the consumer
//! never observes a partial record.
//!
//! Only the oldest record is reachable: there is no random access.

use crate::error::KfifoError;
use crate::kfifo::RingBuffer;

/// Width of the length prefix written in front of every record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordPrefix {
    /// One byte; records up to 255 bytes.
    U8,
    /// Two bytes; records up to 65535 bytes.
    U16,
}

impl RecordPrefix {
    /// Prefix size in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            RecordPrefix::U8 => 1,
            RecordPrefix::U16 => 2,
        }
    }

    /// Largest payload the prefix can describe.
    #[inline]
    pub const fn max_len(self) -> usize {
        (1 << (8 * self.bytes())) - 1
    }
}

/// Byte ring buffer operated as a queue of framed records.
#[derive(Debug)]
pub struct RecordFifo<'a> {
    ring: RingBuffer<'a>,
    prefix: RecordPrefix,
}

#[cfg(feature = "alloc")]
impl RecordFifo<'static> {
    /// Allocate at least `capacity` bytes (rounded up to a power of two).
    pub fn new(capacity: usize, prefix: RecordPrefix) -> Result<Self, KfifoError> {
        Ok(Self {
            ring: RingBuffer::new(capacity, 1)?,
            prefix,
        })
    }
}

impl<'a> RecordFifo<'a> {
    pub fn init_over(buf: &'a mut [u8], prefix: RecordPrefix) -> Result<Self, KfifoError> {
        Ok(Self {
            ring: RingBuffer::init_over(buf, 1)?,
            prefix,
        })
    }

    #[inline]
    pub fn prefix(&self) -> RecordPrefix {
        self.prefix
    }

    /// Largest payload a single record may carry, bounded by both prefix width and capacity.
    pub fn max_record_len(&self) -> usize {
        self.prefix
            .max_len()
            .min(self.ring.capacity() - self.prefix.bytes())
    }

    /// Append one record. Returns the payload length, or 0 if the record is empty, too long for
    /// the prefix, or does not fit in the free space together with its prefix.
    #[inline]
    pub fn write_record(&mut self, payload: &[u8]) -> usize {
        put_record(&self.ring, self.prefix, payload)
    }

    /// Pop the oldest record into `dst`.
    ///
    /// Returns the number of bytes copied. If `dst` is shorter than the record the payload is
    /// truncated and the remainder of the record is discarded.
    #[inline]
    pub fn read_record(&mut self, dst: &mut [u8]) -> usize {
        get_record(&self.ring, self.prefix, dst, true)
    }

    /// Copy the oldest record into `dst` without consuming it.
    #[inline]
    pub fn peek_record(&self, dst: &mut [u8]) -> usize {
        get_record(&self.ring, self.prefix, dst, false)
    }

    /// Length of the oldest record, or 0 when empty.
    #[inline]
    pub fn peek_record_length(&self) -> usize {
        record_len(&self.ring, self.prefix)
    }

    /// Drop the oldest record; returns its payload length (0 when empty).
    #[inline]
    pub fn skip_record(&mut self) -> usize {
        drop_record(&self.ring, self.prefix)
    }

    /// Bytes in use, prefixes included.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn avail(&self) -> usize {
        self.ring.avail()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn reset(&mut self) {
        self.ring.reset();
    }

    pub fn split(&mut self) -> (RecordProducer<'_, 'a>, RecordConsumer<'_, 'a>) {
        let ring: &RingBuffer<'a> = &self.ring;
        let prefix = self.prefix;
        (
            RecordProducer { ring, prefix },
            RecordConsumer { ring, prefix },
        )
    }
}

/// Write half of a split [`RecordFifo`].
pub struct RecordProducer<'r, 'a> {
    ring: &'r RingBuffer<'a>,
    prefix: RecordPrefix,
}

impl RecordProducer<'_, '_> {
    #[inline]
    pub fn write_record(&mut self, payload: &[u8]) -> usize {
        put_record(self.ring, self.prefix, payload)
    }

    #[inline]
    pub fn avail(&self) -> usize {
        self.ring.avail()
    }
}

/// Read half of a split [`RecordFifo`].
pub struct RecordConsumer<'r, 'a> {
    ring: &'r RingBuffer<'a>,
    prefix: RecordPrefix,
}

impl RecordConsumer<'_, '_> {
    #[inline]
    pub fn read_record(&mut self, dst: &mut [u8]) -> usize {
        get_record(self.ring, self.prefix, dst, true)
    }

    #[inline]
    pub fn peek_record(&self, dst: &mut [u8]) -> usize {
        get_record(self.ring, self.prefix, dst, false)
    }

    #[inline]
    pub fn peek_record_length(&self) -> usize {
        record_len(self.ring, self.prefix)
    }

    #[inline]
    pub fn skip_record(&mut self) -> usize {
        drop_record(self.ring, self.prefix)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

fn put_record(ring: &RingBuffer<'_>, prefix: RecordPrefix, payload: &[u8]) -> usize {
    let len = payload.len();
    let hdr = prefix.bytes();
    if len == 0 || len > prefix.max_len() {
        return 0;
    }

    let (in_, unused) = ring.producer_view();
    if (len + hdr) as u64 > unused as u64 {
        return 0;
    }

    let header = (len as u16).to_le_bytes();
    ring.copy_in(&header[..hdr], in_);
    ring.copy_in(payload, in_.wrapping_add(hdr as u32));
    ring.publish_in(in_.wrapping_add((len + hdr) as u32));
    len
}

/// Decode the prefix at `out`; the caller has checked that a record is present.
fn header_at(ring: &RingBuffer<'_>, prefix: RecordPrefix, out: u32) -> usize {
    let mut header = [0u8; 2];
    ring.copy_out(&mut header[..prefix.bytes()], out);
    u16::from_le_bytes(header) as usize
}

fn record_len(ring: &RingBuffer<'_>, prefix: RecordPrefix) -> usize {
    let (out, used) = ring.consumer_view();
    if (used as usize) < prefix.bytes() {
        return 0;
    }
    header_at(ring, prefix, out)
}

fn get_record(ring: &RingBuffer<'_>, prefix: RecordPrefix, dst: &mut [u8], consume: bool) -> usize {
    let hdr = prefix.bytes();
    let (out, used) = ring.consumer_view();
    if (used as usize) < hdr {
        return 0;
    }

    let len = header_at(ring, prefix, out);
    let copied = len.min(dst.len());
    ring.copy_out(&mut dst[..copied], out.wrapping_add(hdr as u32));
    if consume {
        ring.publish_out(out.wrapping_add((hdr + len) as u32));
    }
    copied
}

fn drop_record(ring: &RingBuffer<'_>, prefix: RecordPrefix) -> usize {
    let hdr = prefix.bytes();
    let (out, used) = ring.consumer_view();
    if (used as usize) < hdr {
        return 0;
    }

    let len = header_at(ring, prefix, out);
    ring.publish_out(out.wrapping_add((hdr + len) as u32));
    len
}

#[cfg(test)]
mod tests {
    use super::{RecordFifo, RecordPrefix};
    use std::vec::Vec;

    #[test]
    fn prefix_limits() {
        assert_eq!(RecordPrefix::U8.max_len(), 255);
        assert_eq!(RecordPrefix::U16.max_len(), 65535);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn lengths_match_in_fifo_order() {
        let mut fifo = RecordFifo::new(64, RecordPrefix::U8).unwrap();
        let records: [&[u8]; 4] = [b"a", b"hello", b"xyz", b"0123456789"];

        for (i, record) in records.iter().enumerate() {
            assert_eq!(fifo.write_record(record), record.len());
            if i == 1 {
                assert_eq!(fifo.peek_record_length(), 1);
                let mut out = [0u8; 16];
                assert_eq!(fifo.read_record(&mut out), 1);
                assert_eq!(&out[..1], b"a");
            }
        }

        for record in &records[1..] {
            assert_eq!(fifo.peek_record_length(), record.len());
            let mut out = [0u8; 16];
            let n = fifo.read_record(&mut out);
            assert_eq!(&out[..n], *record);
        }
        assert!(fifo.is_empty());
        assert_eq!(fifo.peek_record_length(), 0);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn record_that_does_not_fit_is_rejected_whole() {
        let mut fifo = RecordFifo::new(8, RecordPrefix::U8).unwrap();
        assert_eq!(fifo.write_record(b"abcde"), 5);
        assert_eq!(fifo.avail(), 2);

        assert_eq!(fifo.write_record(b"xy"), 0);
        assert_eq!(fifo.avail(), 2);
        assert_eq!(fifo.write_record(b"x"), 1);
        assert_eq!(fifo.avail(), 0);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn oversized_and_empty_records_are_rejected() {
        let mut fifo = RecordFifo::new(1024, RecordPrefix::U8).unwrap();
        let big = [0u8; 256];
        assert_eq!(fifo.write_record(&big), 0);
        assert_eq!(fifo.write_record(&[]), 0);
        assert!(fifo.is_empty());
        assert_eq!(fifo.max_record_len(), 255);
    }

    #[test]
    fn two_byte_prefix_across_wraparound() {
        let mut storage = [0u8; 16];
        let mut fifo = RecordFifo::init_over(&mut storage, RecordPrefix::U16).unwrap();

        assert_eq!(fifo.write_record(&[1; 9]), 9);
        assert_eq!(fifo.skip_record(), 9);

        // in/out now sit at 11; the next prefix and payload both wrap.
        let payload: Vec<u8> = (0..12).collect();
        assert_eq!(fifo.write_record(&payload), 12);
        assert_eq!(fifo.peek_record_length(), 12);

        let mut out = [0u8; 12];
        assert_eq!(fifo.read_record(&mut out), 12);
        assert_eq!(&out[..], &payload[..]);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn short_destination_truncates_and_consumes() {
        let mut fifo = RecordFifo::new(32, RecordPrefix::U8).unwrap();
        fifo.write_record(b"abcdef");
        fifo.write_record(b"gh");

        let mut out = [0u8; 3];
        assert_eq!(fifo.read_record(&mut out), 3);
        assert_eq!(&out, b"abc");
        assert_eq!(fifo.peek_record_length(), 2);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn peek_record_leaves_it_queued() {
        let mut fifo = RecordFifo::new(32, RecordPrefix::U16).unwrap();
        fifo.write_record(b"ping");

        let mut out = [0u8; 8];
        assert_eq!(fifo.peek_record(&mut out), 4);
        assert_eq!(fifo.peek_record_length(), 4);
        assert_eq!(fifo.len(), 6);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn split_handles_exchange_records() {
        let mut fifo = RecordFifo::new(32, RecordPrefix::U8).unwrap();
        let (mut tx, mut rx) = fifo.split();

        assert_eq!(tx.write_record(b"one"), 3);
        assert_eq!(tx.write_record(b"three"), 5);

        let mut out = [0u8; 8];
        assert_eq!(rx.peek_record_length(), 3);
        assert_eq!(rx.skip_record(), 3);
        let n = rx.read_record(&mut out);
        assert_eq!(&out[..n], b"three");
        assert!(rx.is_empty());
    }
}
