//! Bit-packed event flags settable from any context.
//!
//! A bank of `WORDS * 32` flags stored in atomic words. The scheduler owns two banks: one polled
//! by the application, and one drained every pass into [`Hooks::on_flag`](crate::Hooks::on_flag).

use crate::error::IndexError;
use crate::sync::{AtomicU32, Ordering};

pub struct EventFlags<const WORDS: usize> {
    words: [AtomicU32; WORDS],
}

impl<const WORDS: usize> EventFlags<WORDS> {
    pub const fn new() -> Self {
        Self {
            words: [const { AtomicU32::new(0) }; WORDS],
        }
    }

    /// Number of flags in the bank.
    #[inline]
    pub const fn capacity(&self) -> u32 {
        (WORDS * 32) as u32
    }

    /// Raise flag `index`; returns the index.
    pub fn set(&self, index: u32) -> Result<u32, IndexError> {
        let (word, mask) = self.locate(index)?;
        word.fetch_or(mask, Ordering::AcqRel);
        Ok(index)
    }

    /// Lower flag `index`; returns the index.
    pub fn clear(&self, index: u32) -> Result<u32, IndexError> {
        let (word, mask) = self.locate(index)?;
        word.fetch_and(!mask, Ordering::AcqRel);
        Ok(index)
    }

    /// Out-of-range indices read as unset.
    pub fn get(&self, index: u32) -> bool {
        self.locate(index)
            .map(|(word, mask)| word.load(Ordering::Acquire) & mask != 0)
            .unwrap_or(false)
    }

    pub fn clear_all(&self) {
        for word in &self.words {
            word.store(0, Ordering::Release);
        }
    }

    /// Visit raised flags in ascending order, lowering each one before calling `f`.
    ///
    /// A flag raised again by `f` for an index at or below the one being handled waits for the
    /// next call; a higher index raised by `f` is picked up in this call.
    pub fn drain(&self, mut f: impl FnMut(u32)) -> usize {
        let mut fired = 0;
        for (w, word) in self.words.iter().enumerate() {
            let mut pending = word.load(Ordering::Acquire);
            while pending != 0 {
                let bit = pending.trailing_zeros();
                let mask = 1u32 << bit;
                let was = word.fetch_and(!mask, Ordering::AcqRel);
                if was & mask != 0 {
                    f(w as u32 * 32 + bit);
                    fired += 1;
                }
                pending = word.load(Ordering::Acquire) & !(mask | (mask - 1));
            }
        }
        fired
    }

    fn locate(&self, index: u32) -> Result<(&AtomicU32, u32), IndexError> {
        let word = self
            .words
            .get((index / 32) as usize)
            .ok_or(IndexError::OutOfRange {
                index,
                limit: self.capacity(),
            })?;
        Ok((word, 1 << (index % 32)))
    }
}

impl<const WORDS: usize> Default for EventFlags<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::EventFlags;
    use crate::error::IndexError;
    use std::vec::Vec;

    #[test]
    fn set_get_clear() {
        let flags = EventFlags::<1>::new();
        assert_eq!(flags.set(5), Ok(5));
        assert!(flags.get(5));
        assert!(!flags.get(4));
        assert_eq!(flags.clear(5), Ok(5));
        assert!(!flags.get(5));
    }

    #[test]
    fn out_of_range_is_rejected() {
        let flags = EventFlags::<1>::new();
        assert_eq!(
            flags.set(32),
            Err(IndexError::OutOfRange {
                index: 32,
                limit: 32
            })
        );
        assert!(!flags.get(32));
    }

    #[test]
    fn clear_all_lowers_every_word() {
        let flags = EventFlags::<2>::new();
        flags.set(0).unwrap();
        flags.set(63).unwrap();
        flags.clear_all();
        assert!(!flags.get(0));
        assert!(!flags.get(63));
    }

    #[test]
    fn drain_visits_ascending_and_clears() {
        let flags = EventFlags::<2>::new();
        for i in [40, 3, 31, 0, 63] {
            flags.set(i).unwrap();
        }

        let mut seen = Vec::new();
        assert_eq!(flags.drain(|i| seen.push(i)), 5);
        assert_eq!(seen, [0, 3, 31, 40, 63]);
        assert_eq!(flags.drain(|_| panic!("nothing left")), 0);
    }

    #[test]
    fn self_retrigger_waits_for_next_drain() {
        let flags = EventFlags::<1>::new();
        flags.set(2).unwrap();

        let mut seen = Vec::new();
        flags.drain(|i| {
            seen.push(i);
            flags.set(i).unwrap();
            if i == 2 {
                flags.set(7).unwrap();
            }
        });
        assert_eq!(seen, [2, 7]);
        assert!(flags.get(2));
        assert!(flags.get(7));
    }
}
