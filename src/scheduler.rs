//! Cooperative tick scheduler with an event queue, event flags and fault reporting.
//!
//! # Overview
//! Two entry points drive the scheduler:
//! - [`Scheduler::update`] from a periodic timer interrupt, once per tick. It counts down task
//!   delays and raises run flags. Immediate tasks that became due run right there, in priority
//!   order, before `update` returns.
//! - [`Scheduler::run`] from the main loop. One pass runs, in order: queued events, raised
//!   callback flags, ready tasks (ascending priority value), error and warning reports, and the
//!   idle hook.
//!
//! Every ready cooperative task runs once per pass. Priority decides order, never exclusion.
//! Cooperative tasks run to completion; only immediate tasks, running from the tick interrupt,
//! cut in ahead of them.
//!
//! # Sharing
//! Every method takes `&self` and `new` is `const`, so a scheduler is normally a `static` shared
//! by the timer interrupt and the main loop. The task table and event queue are guarded by
//! critical sections; flags and fault state are atomics. Task bodies run outside any critical
//! section and may create, delete, suspend or resume tasks, including themselves. A task that
//! deletes itself is removed when its body returns. A task deleted from an interrupt while a
//! pass is walking the list ends that walk early; tasks left unvisited keep their run flags and
//! run on the next pass.
//!
//! ```
//! use loopie::{Hooks, Scheduler};
//!
//! struct Board {
//!     blinks: u32,
//! }
//!
//! impl Hooks for Board {}
//!
//! fn blink(board: &mut Board, _: usize) {
//!     board.blinks += 1;
//! }
//!
//! static SCHEDULER: Scheduler<Board, 4, 4> = Scheduler::new();
//!
//! let mut board = Board { blinks: 0 };
//! SCHEDULER.create_task(blink, 0, 1, 0, 10).unwrap();
//! SCHEDULER.start();
//!
//! for _ in 0..30 {
//!     SCHEDULER.update(); // normally from the timer interrupt
//!     SCHEDULER.run(&mut board);
//! }
//! assert_eq!(board.blinks, 3);
//! ```

use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::{self, Config, FLAG_CB_WORDS, FLAG_WORDS};
use crate::diag::Diagnostics;
use crate::error::{EventError, IndexError, TaskError};
use crate::event::{EventFn, EventQueue, PostPolicy, Posted};
use crate::flags::EventFlags;
use crate::sync::{AtomicBool, AtomicU32, Ordering};
use crate::task::{Body, ImmediateFn, Step, TaskFn, TaskId, TaskList, TaskStatus};

/// Environment capabilities supplied by the application context.
///
/// Every method has a no-op default, so a context only implements the hooks it uses.
pub trait Hooks {
    /// Free-running tick counter used to measure task intervals and pass duration.
    fn now(&self) -> u32 {
        0
    }

    /// Called at the end of every pass.
    fn idle(&mut self) {}

    /// Called once for each raised callback flag.
    fn on_flag(&mut self, _flag: u32) {}

    /// Called with the full error mask whenever it changes.
    fn report_errors(&mut self, _mask: u32) {}

    /// Called with a new warning code.
    fn report_warning(&mut self, _code: u32) {}
}

/// Tick-driven cooperative scheduler for application context `C`.
///
/// `TASKS` bounds the task table and `EVENTS` the event queue (a power of two).
pub struct Scheduler<
    C,
    const TASKS: usize = { config::MAX_TASKS },
    const EVENTS: usize = { config::MAX_EVENTS },
> {
    tasks: Mutex<RefCell<TaskList<C, TASKS>>>,
    events: EventQueue<C, EVENTS>,
    flags: EventFlags<FLAG_WORDS>,
    flags_cb: EventFlags<FLAG_CB_WORDS>,
    diagnostics: Diagnostics,
    config: Config,
    running: AtomicBool,
    lock: AtomicU32,
    ticks: AtomicU32,
    duration: AtomicU32,
}

impl<C: Hooks, const TASKS: usize, const EVENTS: usize> Scheduler<C, TASKS, EVENTS> {
    pub const fn new() -> Self {
        Self::with_config(Config::new())
    }

    pub const fn with_config(config: Config) -> Self {
        Self {
            tasks: Mutex::new(RefCell::new(TaskList::new())),
            events: EventQueue::new(),
            flags: EventFlags::new(),
            flags_cb: EventFlags::new(),
            diagnostics: Diagnostics::new(),
            config,
            running: AtomicBool::new(false),
            lock: AtomicU32::new(0),
            ticks: AtomicU32::new(0),
            duration: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // Lifecycle ------------------------------------------------------------------------------

    /// Start processing. Does nothing while no task is registered.
    pub fn start(&self) {
        critical_section::with(|cs| {
            if self.tasks.borrow_ref(cs).len() == 0 {
                log::warn!("scheduler: start ignored, no tasks registered");
                return;
            }
            self.lock.store(0, Ordering::Relaxed);
            self.running.store(true, Ordering::Release);
        });
    }

    /// Stop processing. `update` and `run` become no-ops; task state is kept.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Hold off `run`. Calls nest and must be paired with [`resume`](Self::resume).
    pub fn suspend(&self) {
        critical_section::with(|_| {
            let depth = self.lock.load(Ordering::Relaxed);
            self.lock.store(depth.saturating_add(1), Ordering::Relaxed);
        });
    }

    pub fn resume(&self) {
        critical_section::with(|_| {
            let depth = self.lock.load(Ordering::Relaxed);
            self.lock.store(depth.saturating_sub(1), Ordering::Relaxed);
        });
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.lock.load(Ordering::Relaxed) != 0
    }

    /// Ticks spent in the last complete `run` pass, measured with [`Hooks::now`].
    #[inline]
    pub fn duration(&self) -> u32 {
        self.duration.load(Ordering::Relaxed)
    }

    /// Ticks counted by [`update`](Self::update) while running.
    #[inline]
    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    // Tick and dispatch ----------------------------------------------------------------------

    /// Advance every task by one tick and run the immediate tasks that became due. Call from the
    /// timer interrupt.
    pub fn update(&self) {
        if !self.is_running() {
            return;
        }
        let ceiling = self.config.max_run_flag;
        let due = critical_section::with(|cs| self.tasks.borrow_ref_mut(cs).tick(ceiling));
        let now = self.ticks.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if due {
            self.run_immediate(now);
        }
    }

    fn run_immediate(&self, now: u32) {
        let mut cursor = critical_section::with(|cs| self.tasks.borrow_ref(cs).head());
        while let Some(id) = cursor {
            let step = critical_section::with(|cs| {
                self.tasks.borrow_ref_mut(cs).begin(id, now, Body::immediate)
            });
            cursor = match step {
                Step::Run(func, arg) => {
                    func(arg);
                    critical_section::with(|cs| self.tasks.borrow_ref_mut(cs).finish(id))
                }
                Step::Next(next) => next,
            };
        }
    }

    /// One main-loop pass.
    pub fn run(&self, ctx: &mut C) {
        let start = ctx.now();
        if !self.is_running() || self.is_suspended() {
            return;
        }

        self.run_events(ctx);
        self.process_flags_cb(ctx);
        self.run_tasks(ctx);
        self.report_errors(ctx);
        self.report_warnings(ctx);
        ctx.idle();

        self.duration
            .store(ctx.now().wrapping_sub(start), Ordering::Relaxed);
    }

    fn run_tasks(&self, ctx: &mut C) {
        let mut cursor = critical_section::with(|cs| self.tasks.borrow_ref(cs).head());
        while let Some(id) = cursor {
            let now = ctx.now();
            let step = critical_section::with(|cs| {
                self.tasks.borrow_ref_mut(cs).begin(id, now, Body::cooperative)
            });
            cursor = match step {
                Step::Run(func, arg) => {
                    func(ctx, arg);
                    critical_section::with(|cs| self.tasks.borrow_ref_mut(cs).finish(id))
                }
                Step::Next(next) => next,
            };
        }
    }

    // Tasks ----------------------------------------------------------------------------------

    /// Register a cooperative task, run from [`run`](Self::run).
    ///
    /// `priority` must lie in [`PRIORITY_MIN`](config::PRIORITY_MIN)..=
    /// [`PRIORITY_MAX`](config::PRIORITY_MAX); smaller runs first. The task first becomes ready
    /// after `delay` ticks and then every `cycle` ticks. A `cycle` of 0 makes it one-shot: it is
    /// removed after its single run.
    pub fn create_task(
        &self,
        func: TaskFn<C>,
        arg: usize,
        priority: i8,
        delay: u16,
        cycle: u16,
    ) -> Result<TaskId, TaskError> {
        self.insert(Body::Cooperative(func), arg, priority, delay, cycle)
    }

    /// Register an immediate task, run from [`update`](Self::update) on the tick it becomes due.
    ///
    /// Timing, priority and one-shot rules are those of [`create_task`](Self::create_task). Its
    /// interval is measured in [`ticks`](Self::ticks).
    pub fn create_immediate_task(
        &self,
        func: ImmediateFn,
        arg: usize,
        priority: i8,
        delay: u16,
        cycle: u16,
    ) -> Result<TaskId, TaskError> {
        self.insert(Body::Immediate(func), arg, priority, delay, cycle)
    }

    fn insert(
        &self,
        body: Body<C>,
        arg: usize,
        priority: i8,
        delay: u16,
        cycle: u16,
    ) -> Result<TaskId, TaskError> {
        critical_section::with(|cs| {
            self.tasks
                .borrow_ref_mut(cs)
                .insert(body, arg, priority, delay, cycle)
        })
        .inspect_err(|e| log::warn!("scheduler: task creation rejected: {}", e))
    }

    pub fn delete_task(&self, id: TaskId) -> Result<(), TaskError> {
        critical_section::with(|cs| self.tasks.borrow_ref_mut(cs).remove(id))
    }

    pub fn suspend_task(&self, id: TaskId) -> Result<(), TaskError> {
        critical_section::with(|cs| self.tasks.borrow_ref_mut(cs).set_suspended(id, true))
    }

    pub fn resume_task(&self, id: TaskId) -> Result<(), TaskError> {
        critical_section::with(|cs| self.tasks.borrow_ref_mut(cs).set_suspended(id, false))
    }

    pub fn task_count(&self) -> usize {
        critical_section::with(|cs| self.tasks.borrow_ref(cs).len())
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        critical_section::with(|cs| self.tasks.borrow_ref(cs).status(id))
    }

    /// Ticks between the two most recent runs of a task.
    pub fn task_interval(&self, id: TaskId) -> Option<u32> {
        self.task_status(id).map(|s| s.interval)
    }

    // Events ---------------------------------------------------------------------------------

    #[inline]
    pub fn events(&self) -> &EventQueue<C, EVENTS> {
        &self.events
    }

    #[inline]
    pub fn post_event(
        &self,
        func: EventFn<C>,
        arg: usize,
        policy: PostPolicy,
    ) -> Result<Posted, EventError> {
        let posted = self.events.post(func, arg, policy)?;
        if posted == Posted::Overwrote {
            log::debug!("scheduler: event queue full, oldest event overwritten");
        }
        Ok(posted)
    }

    #[inline]
    pub fn post_event_from_isr(
        &self,
        func: EventFn<C>,
        arg: usize,
        policy: PostPolicy,
    ) -> Result<Posted, EventError> {
        self.events.post_from_isr(func, arg, policy)
    }

    /// Post `func(ctx, 0)`, discarding it if the queue is full.
    #[inline]
    pub fn post_event_default(&self, func: EventFn<C>) -> Result<Posted, EventError> {
        self.post_event(func, 0, PostPolicy::Discard)
    }

    /// Run every queued event.
    pub fn run_events(&self, ctx: &mut C) -> usize {
        self.events.dispatch(ctx)
    }

    // Event flags ----------------------------------------------------------------------------

    #[inline]
    pub fn flags(&self) -> &EventFlags<FLAG_WORDS> {
        &self.flags
    }

    #[inline]
    pub fn callback_flags(&self) -> &EventFlags<FLAG_CB_WORDS> {
        &self.flags_cb
    }

    pub fn set_flag(&self, index: u32) -> Result<u32, IndexError> {
        self.flags.set(index)
    }

    pub fn clear_flag(&self, index: u32) -> Result<u32, IndexError> {
        self.flags.clear(index)
    }

    pub fn get_flag(&self, index: u32) -> bool {
        self.flags.get(index)
    }

    pub fn clear_all_flags(&self) {
        self.flags.clear_all();
    }

    pub fn set_flag_cb(&self, index: u32) -> Result<u32, IndexError> {
        self.flags_cb.set(index)
    }

    pub fn clear_flag_cb(&self, index: u32) -> Result<u32, IndexError> {
        self.flags_cb.clear(index)
    }

    pub fn get_flag_cb(&self, index: u32) -> bool {
        self.flags_cb.get(index)
    }

    pub fn clear_all_flags_cb(&self) {
        self.flags_cb.clear_all();
    }

    /// Deliver every raised callback flag to [`Hooks::on_flag`], lowest index first.
    pub fn process_flags_cb(&self, ctx: &mut C) -> usize {
        self.flags_cb.drain(|flag| ctx.on_flag(flag))
    }

    // Errors and warnings --------------------------------------------------------------------

    #[inline]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn set_error(&self, bit: u8) -> Result<u8, IndexError> {
        self.diagnostics.set_error(bit)
    }

    pub fn clear_error(&self, bit: u8) -> Result<u8, IndexError> {
        self.diagnostics.clear_error(bit)
    }

    pub fn clear_all_errors(&self) {
        self.diagnostics.clear_all_errors();
    }

    pub fn get_error(&self, bit: u8) -> bool {
        self.diagnostics.get_error(bit)
    }

    pub fn error_mask(&self) -> u32 {
        self.diagnostics.error_mask()
    }

    pub fn set_warning(&self, code: u32) -> u32 {
        self.diagnostics.set_warning(code)
    }

    pub fn get_warning(&self) -> u32 {
        self.diagnostics.get_warning()
    }

    pub fn report_errors(&self, ctx: &mut C) {
        self.diagnostics
            .report_errors(self.config.report_on_clear, |mask| ctx.report_errors(mask));
    }

    pub fn report_warnings(&self, ctx: &mut C) {
        self.diagnostics
            .report_warnings(self.config.warning_ticks, |code| ctx.report_warning(code));
    }
}

impl<C: Hooks, const TASKS: usize, const EVENTS: usize> Default for Scheduler<C, TASKS, EVENTS> {
    fn default() -> Self {
        Self::new()
    }
}
