//! Compile-time limits and the runtime scheduler policy.

/// Default task-table capacity of a [`Scheduler`](crate::Scheduler).
pub const MAX_TASKS: usize = 50;
/// Default event-queue depth. Must be a power of two.
pub const MAX_EVENTS: usize = 8;
/// Number of polled event flags.
pub const MAX_EVENT_FLAGS: u32 = 32;
/// Number of callback-driving event flags.
pub const MAX_EVENT_FLAGS_CB: u32 = 64;
/// Scheduler passes a warning stays asserted before it expires.
pub const WARNING_REPORT_TICKS: u32 = 6000;
/// Ceiling for a task's pending-invocation counter.
pub const MAX_TASK_RUN_FLAG: u8 = 127;
/// Highest user priority (numerically smallest).
pub const PRIORITY_MIN: i8 = 0;
/// Lowest user priority (numerically largest).
pub const PRIORITY_MAX: i8 = 127;
/// Error mask meaning "no error".
pub const NO_ERROR: u32 = 0;
/// Warning code meaning "no warning".
pub const NO_WARNING: u32 = 0;

pub(crate) const FLAG_WORDS: usize = (MAX_EVENT_FLAGS as usize).div_ceil(32);
pub(crate) const FLAG_CB_WORDS: usize = (MAX_EVENT_FLAGS_CB as usize).div_ceil(32);

/// Runtime policy knobs for a [`Scheduler`](crate::Scheduler).
///
/// ```
/// use loopie::Config;
///
/// const CONFIG: Config = Config::new().warning_ticks(100).report_on_clear(false);
/// assert_eq!(CONFIG.warning_ticks, 100);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Scheduler passes before an unchanged warning reverts to [`NO_WARNING`].
    pub warning_ticks: u32,
    /// Saturation ceiling for task run flags.
    pub max_run_flag: u8,
    /// Whether an error mask dropping back to [`NO_ERROR`] is reported.
    pub report_on_clear: bool,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            warning_ticks: WARNING_REPORT_TICKS,
            max_run_flag: MAX_TASK_RUN_FLAG,
            report_on_clear: true,
        }
    }

    pub const fn warning_ticks(mut self, ticks: u32) -> Self {
        assert!(ticks > 0, "warning expiry must be at least one pass");
        self.warning_ticks = ticks;
        self
    }

    pub const fn max_run_flag(mut self, ceiling: u8) -> Self {
        assert!(ceiling > 0, "run flag ceiling must be non-zero");
        self.max_run_flag = ceiling;
        self
    }

    pub const fn report_on_clear(mut self, enabled: bool) -> Self {
        self.report_on_clear = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
