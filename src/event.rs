//! Interrupt-safe queue of deferred callbacks.
//!
//! Events are posted from any context and drained in FIFO order by the scheduler's main loop.
//! Every index update happens inside a critical section, and callbacks run outside of it.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::error::EventError;

/// Event callback: receives the application context and the argument given at post time.
pub type EventFn<C> = fn(&mut C, usize);

/// What to do when posting to a full queue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PostPolicy {
    /// Reject the new event.
    #[default]
    Discard,
    /// Evict the oldest queued event.
    Overwrite,
}

/// Successful post outcome.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Posted {
    Queued,
    /// Queued after evicting the oldest event.
    Overwrote,
}

struct Event<C> {
    func: EventFn<C>,
    arg: usize,
}

struct Ring<C, const N: usize> {
    slots: [Option<Event<C>>; N],
    in_: u32,
    out: u32,
}

impl<C, const N: usize> Ring<C, N> {
    const MASK: u32 = (N - 1) as u32;

    #[inline]
    fn len(&self) -> u32 {
        self.in_.wrapping_sub(self.out)
    }
}

/// Fixed-capacity FIFO of `(callback, argument)` pairs. `N` must be a power of two.
pub struct EventQueue<C, const N: usize> {
    ring: Mutex<RefCell<Ring<C, N>>>,
}

impl<C, const N: usize> EventQueue<C, N> {
    pub const fn new() -> Self {
        const {
            assert!(
                N > 0 && N & (N - 1) == 0,
                "event queue capacity must be a power of two"
            );
            assert!(N <= 1 << 31, "event queue capacity must fit in u32");
        };
        Self {
            ring: Mutex::new(RefCell::new(Ring {
                slots: [const { None }; N],
                in_: 0,
                out: 0,
            })),
        }
    }

    /// Queue `func(ctx, arg)` for the next drain.
    pub fn post(&self, func: EventFn<C>, arg: usize, policy: PostPolicy) -> Result<Posted, EventError> {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            let mut posted = Posted::Queued;

            if ring.len() == N as u32 {
                match policy {
                    PostPolicy::Overwrite => {
                        let oldest = (ring.out & Ring::<C, N>::MASK) as usize;
                        ring.slots[oldest] = None;
                        ring.out = ring.out.wrapping_add(1);
                        posted = Posted::Overwrote;
                    }
                    PostPolicy::Discard => {
                        log::trace!("event queue full, discarding new event");
                        return Err(EventError::Full);
                    }
                }
            }

            let index = (ring.in_ & Ring::<C, N>::MASK) as usize;
            ring.slots[index] = Some(Event { func, arg });
            ring.in_ = ring.in_.wrapping_add(1);
            Ok(posted)
        })
    }

    /// Interrupt-context variant of [`post`](Self::post).
    ///
    /// Critical sections nest, so this is the same operation; it exists to make call sites in
    /// interrupt handlers explicit.
    #[inline]
    pub fn post_from_isr(
        &self,
        func: EventFn<C>,
        arg: usize,
        policy: PostPolicy,
    ) -> Result<Posted, EventError> {
        self.post(func, arg, policy)
    }

    /// Post with argument 0 under [`PostPolicy::Discard`].
    #[inline]
    pub fn post_default(&self, func: EventFn<C>) -> Result<Posted, EventError> {
        self.post(func, 0, PostPolicy::Discard)
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).len() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free_slots(&self) -> usize {
        N - self.len()
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Drop every queued event without running it.
    pub fn clear(&self) {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            ring.slots.iter_mut().for_each(|slot| *slot = None);
            ring.out = ring.in_;
        });
    }

    /// Run queued events until the queue is empty; returns how many ran.
    ///
    /// Events posted by a callback during the drain run in the same call.
    pub fn dispatch(&self, ctx: &mut C) -> usize {
        let mut ran = 0;
        while let Some(event) = self.pop() {
            (event.func)(ctx, event.arg);
            ran += 1;
        }
        ran
    }

    fn pop(&self) -> Option<Event<C>> {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            if ring.len() == 0 {
                return None;
            }
            let index = (ring.out & Ring::<C, N>::MASK) as usize;
            ring.out = ring.out.wrapping_add(1);
            ring.slots[index].take()
        })
    }
}

impl<C, const N: usize> Default for EventQueue<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventQueue, PostPolicy, Posted};
    use crate::error::EventError;
    use std::vec::Vec;

    fn push(log: &mut Vec<usize>, arg: usize) {
        log.push(arg);
    }

    #[test]
    fn drains_in_fifo_order() {
        let queue = EventQueue::<Vec<usize>, 8>::new();
        for i in 0..5 {
            assert_eq!(queue.post(push, i, PostPolicy::Discard), Ok(Posted::Queued));
        }
        assert_eq!(queue.free_slots(), 3);

        let mut log = Vec::new();
        assert_eq!(queue.dispatch(&mut log), 5);
        assert_eq!(log, [0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn discard_rejects_when_full() {
        let queue = EventQueue::<Vec<usize>, 4>::new();
        for i in 0..4 {
            queue.post(push, i, PostPolicy::Discard).unwrap();
        }
        assert_eq!(queue.post(push, 99, PostPolicy::Discard), Err(EventError::Full));

        let mut log = Vec::new();
        queue.dispatch(&mut log);
        assert_eq!(log, [0, 1, 2, 3]);
    }

    #[test]
    fn overwrite_evicts_oldest() {
        let queue = EventQueue::<Vec<usize>, 4>::new();
        for i in 0..4 {
            queue.post(push, i, PostPolicy::Discard).unwrap();
        }
        assert_eq!(
            queue.post_from_isr(push, 99, PostPolicy::Overwrite),
            Ok(Posted::Overwrote)
        );
        assert_eq!(queue.len(), 4);

        let mut log = Vec::new();
        queue.dispatch(&mut log);
        assert_eq!(log, [1, 2, 3, 99]);
    }

    #[test]
    fn clear_drops_pending_events() {
        let queue = EventQueue::<Vec<usize>, 2>::new();
        queue.post_default(push).unwrap();
        queue.clear();

        let mut log = Vec::new();
        assert_eq!(queue.dispatch(&mut log), 0);
        assert_eq!(queue.free_slots(), 2);
    }
}
