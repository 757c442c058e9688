//! Error types returned by the ring buffers and the scheduler.
//!
//! Capacity exhaustion and invalid arguments are ordinary outcomes on a microcontroller, so every
//! one of them is a `Result` the caller is expected to check. Partial ring-buffer transfers are
//! not errors and are reported through the returned element count instead.

use thiserror::Error;

/// Ring-buffer construction and typed-access failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KfifoError {
    #[error("element size must be non-zero")]
    ZeroElementSize,
    #[error("requested capacity exceeds the representable range")]
    CapacityOverflow,
    #[error("buffer holds fewer than two elements")]
    BufferTooSmall,
    #[error("backing storage allocation failed")]
    Alloc,
    #[error("item size {found} does not match element size {expected}")]
    ElementSize { expected: usize, found: usize },
}

/// Task creation and lookup failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskError {
    #[error("priority {0} is outside the user range")]
    InvalidPriority(i8),
    #[error("task table is full")]
    Full,
    #[error("task handle does not refer to a live task")]
    NotFound,
}

/// Event posting failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventError {
    /// The queue was full and the post used [`PostPolicy::Discard`](crate::PostPolicy::Discard).
    #[error("event queue is full")]
    Full,
}

/// A flag or error-bit index outside the configured range.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IndexError {
    #[error("index {index} is out of range (limit {limit})")]
    OutOfRange { index: u32, limit: u32 },
}
