//! Atomic types used across the crate.
//!
//! With the `portable-atomic` feature the types come from the `portable-atomic` crate, which
//! provides `fetch_or`/`fetch_and` on cores without native compare-and-swap.

#[cfg(feature = "portable-atomic")]
pub(crate) use portable_atomic::{AtomicBool, AtomicU32, Ordering};

#[cfg(not(feature = "portable-atomic"))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
