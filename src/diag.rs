//! Application error mask and warning code, reported on change.
//!
//! Drivers raise faults from any context; the scheduler calls the two `report_*` methods once
//! per pass and forwards changes to the application's sink (LED, console, buzzer).
//!
//! - Errors are a 32-bit mask, one bit per fault. A changed mask is reported in full; whether a
//!   mask dropping back to [`NO_ERROR`] is reported is a policy of the caller.
//! - A warning is a single code. A new code is reported once and then expires silently after a
//!   fixed number of passes unless it is set again.

use crate::config::{NO_ERROR, NO_WARNING};
use crate::error::IndexError;
use crate::sync::{AtomicBool, AtomicU32, Ordering};

const ERROR_BITS: u32 = 32;

pub struct Diagnostics {
    errors: AtomicU32,
    reported_errors: AtomicU32,
    warning: AtomicU32,
    warning_asserted: AtomicBool,
    reported_warning: AtomicU32,
    warning_countdown: AtomicU32,
}

impl Diagnostics {
    pub const fn new() -> Self {
        Self {
            errors: AtomicU32::new(NO_ERROR),
            reported_errors: AtomicU32::new(NO_ERROR),
            warning: AtomicU32::new(NO_WARNING),
            warning_asserted: AtomicBool::new(false),
            reported_warning: AtomicU32::new(NO_WARNING),
            warning_countdown: AtomicU32::new(0),
        }
    }

    pub fn set_error(&self, bit: u8) -> Result<u8, IndexError> {
        let mask = Self::bit(bit)?;
        self.errors.fetch_or(mask, Ordering::AcqRel);
        Ok(bit)
    }

    pub fn clear_error(&self, bit: u8) -> Result<u8, IndexError> {
        let mask = Self::bit(bit)?;
        self.errors.fetch_and(!mask, Ordering::AcqRel);
        Ok(bit)
    }

    pub fn clear_all_errors(&self) {
        self.errors.store(NO_ERROR, Ordering::Release);
    }

    /// Out-of-range bits read as clear.
    pub fn get_error(&self, bit: u8) -> bool {
        Self::bit(bit)
            .map(|mask| self.errors.load(Ordering::Acquire) & mask != 0)
            .unwrap_or(false)
    }

    #[inline]
    pub fn error_mask(&self) -> u32 {
        self.errors.load(Ordering::Acquire)
    }

    /// Assert a warning code. Setting the current code again restarts its expiry.
    pub fn set_warning(&self, code: u32) -> u32 {
        critical_section::with(|_| {
            self.warning.store(code, Ordering::Release);
            self.warning_asserted.store(true, Ordering::Release);
        });
        code
    }

    #[inline]
    pub fn get_warning(&self) -> u32 {
        self.warning.load(Ordering::Acquire)
    }

    /// Report the error mask if it changed since the last call.
    ///
    /// With `report_on_clear == false` a transition to [`NO_ERROR`] is recorded but not reported.
    pub fn report_errors(&self, report_on_clear: bool, report: impl FnOnce(u32)) {
        let mask = self.errors.load(Ordering::Acquire);
        if mask == self.reported_errors.load(Ordering::Relaxed) {
            return;
        }
        self.reported_errors.store(mask, Ordering::Relaxed);
        if mask != NO_ERROR || report_on_clear {
            report(mask);
        }
    }

    /// Report a changed warning code and run its expiry countdown.
    ///
    /// A reported code stays set for `expiry` calls and then reverts to [`NO_WARNING`] without a
    /// report. The re-assert check and the expiry happen in one critical section, so a
    /// concurrent [`set_warning`](Self::set_warning) is never lost.
    pub fn report_warnings(&self, expiry: u32, report: impl FnOnce(u32)) {
        let code = self.warning.load(Ordering::Acquire);

        if code != self.reported_warning.load(Ordering::Relaxed) {
            self.warning_asserted.store(false, Ordering::Release);
            report(code);
            self.reported_warning.store(code, Ordering::Relaxed);
            let countdown = if code == NO_WARNING { 0 } else { expiry };
            self.warning_countdown.store(countdown, Ordering::Relaxed);
            return;
        }
        if code == NO_WARNING {
            return;
        }

        let expired = critical_section::with(|_| {
            if self.warning_asserted.swap(false, Ordering::AcqRel) {
                self.warning_countdown.store(expiry, Ordering::Relaxed);
                return false;
            }
            let left = self.warning_countdown.load(Ordering::Relaxed);
            if left > 1 {
                self.warning_countdown.store(left - 1, Ordering::Relaxed);
                return false;
            }
            self.warning_countdown.store(0, Ordering::Relaxed);
            // A different code set meanwhile survives and is reported next time.
            if self.warning.load(Ordering::Acquire) != code {
                return false;
            }
            self.warning.store(NO_WARNING, Ordering::Release);
            true
        });
        if expired {
            self.reported_warning.store(NO_WARNING, Ordering::Relaxed);
        }
    }

    fn bit(bit: u8) -> Result<u32, IndexError> {
        if u32::from(bit) >= ERROR_BITS {
            return Err(IndexError::OutOfRange {
                index: bit.into(),
                limit: ERROR_BITS,
            });
        }
        Ok(1 << bit)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
