//! Cooperative tick scheduler and kfifo-style ring buffers for no-std embedded targets.
//!
//! # Highlights
//! - [`RingBuffer`]: lock-free SPSC ring of fixed-size elements over a power-of-two capacity,
//!   with partial writes and reads, peek, skip and typed element access.
//! - [`RecordFifo`]: the same ring carrying variable-length messages behind a 1- or 2-byte
//!   length prefix.
//! - [`Scheduler`]: priority-ordered cooperative tasks driven by a timer tick, immediate tasks
//!   run from the tick itself, a deferred event queue, two event-flag banks and an error/warning
//!   reporting channel.
//! - No dynamic dispatch. Allocation is optional and only used to create owned ring storage.
//!
//! # Quick start
//! ```
//! use loopie::RingBuffer;
//!
//! let mut storage = [0u8; 16];
//! let mut fifo = RingBuffer::init_over(&mut storage, 1).unwrap();
//!
//! assert_eq!(fifo.write(b"hello"), 5);
//! let mut out = [0u8; 8];
//! assert_eq!(fifo.read(&mut out), 5);
//! assert_eq!(&out[..5], b"hello");
//! ```
//!
//! See [`scheduler`] for a scheduler walkthrough.
//!
//! # No-std
//! The crate is `#![no_std]`. The default `alloc` feature enables [`RingBuffer::new`] and
//! [`RecordFifo::new`]; without it, storage is always supplied by the caller. Tests require `std`.
//!
//! # Safety and concurrency
//! - A ring buffer is SPSC. Mutators take `&mut self`; [`RingBuffer::split`] hands out exactly
//!   one [`Producer`] and one [`Consumer`] that may live on different threads or contexts.
//! - The scheduler takes `&self` everywhere and is meant to be a `static`. Shared state is
//!   guarded by [`critical_section`] or held in atomics, so the integrator must provide a
//!   critical-section implementation for the target.
//! - On targets without native atomic read-modify-write, enable one of the `portable-atomic*`
//!   features.
//!
//! # Semantics
//! - Ring counters are free-running `u32` values; lengths are their wrapping difference.
//! - Task priorities run from [`PRIORITY_MIN`] (first) to [`PRIORITY_MAX`] (last). Every ready
//!   task runs once per pass.
//! - Delays and cycles are counted in ticks, one tick per [`Scheduler::update`] call.
//! - Warnings expire after [`Config::warning_ticks`] passes without a report.
#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod config;
pub mod diag;
pub mod error;
pub mod event;
pub mod flags;
pub mod kfifo;
pub mod record;
pub mod scheduler;
mod sync;
pub mod task;

pub use config::{
    Config, MAX_EVENT_FLAGS, MAX_EVENT_FLAGS_CB, MAX_EVENTS, MAX_TASK_RUN_FLAG, MAX_TASKS,
    NO_ERROR, NO_WARNING, PRIORITY_MAX, PRIORITY_MIN, WARNING_REPORT_TICKS,
};
pub use diag::Diagnostics;
pub use error::{EventError, IndexError, KfifoError, TaskError};
pub use event::{EventFn, EventQueue, PostPolicy, Posted};
pub use flags::EventFlags;
pub use kfifo::{Consumer, Producer, RingBuffer};
pub use record::{RecordConsumer, RecordFifo, RecordPrefix, RecordProducer};
pub use scheduler::{Hooks, Scheduler};
pub use task::{ImmediateFn, TaskFn, TaskId, TaskKind, TaskStatus};

#[cfg(test)]
extern crate std;
