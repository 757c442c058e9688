//! Fixed-capacity task arena threaded into a priority-ordered singly linked list.
//!
//! # Overview
//! - Tasks live in `N` preallocated slots; links between them are slot indices, never pointers.
//! - Insertion keeps the list sorted by ascending priority value. Equal priorities keep creation
//!   order.
//! - Handles carry a per-slot generation, so a handle to a deleted task stays invalid even after
//!   its slot is reused.
//!
//! # Tick semantics
//! On every tick a non-suspended task either burns one tick of `delay`, or (once `delay` is 0)
//! gains one pending run and, if periodic, reloads `delay = cycle - 1`. The `- 1` accounts for the
//! tick that raised the run flag, so a periodic task fires every `cycle` ticks.
//!
//! Cooperative and immediate tasks share one list and one set of tick rules; they differ only in
//! which walk runs them.
//!
//! # Walks
//! A walk visits the list through `begin`/`finish`, one critical section per step. The cursor is
//! a [`TaskId`], so a task deleted between two steps is detected by its generation and ends the
//! walk instead of following a dead link.

use crate::config::{PRIORITY_MAX, PRIORITY_MIN};
use crate::error::TaskError;

/// Cooperative task body: receives the application context and the argument given at creation.
pub type TaskFn<C> = fn(&mut C, usize);

/// Immediate task body: runs inside [`Scheduler::update`](crate::Scheduler::update), so it only
/// receives its argument.
pub type ImmediateFn = fn(usize);

/// Where a task body runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskKind {
    /// From the main loop, in [`Scheduler::run`](crate::Scheduler::run).
    Cooperative,
    /// From the tick, in [`Scheduler::update`](crate::Scheduler::update), as soon as it is due.
    Immediate,
}

/// Opaque handle to a task in a [`Scheduler`](crate::Scheduler).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId {
    index: u16,
    generation: u16,
}

/// Point-in-time view of a task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskStatus {
    pub kind: TaskKind,
    pub priority: i8,
    pub delay: u16,
    pub cycle: u16,
    pub run_flag: u8,
    pub suspended: bool,
    /// Ticks between the two most recent invocations.
    pub interval: u32,
}

pub(crate) enum Body<C> {
    Cooperative(TaskFn<C>),
    Immediate(ImmediateFn),
}

impl<C> Clone for Body<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Body<C> {}

impl<C> Body<C> {
    #[inline]
    pub(crate) fn kind(self) -> TaskKind {
        match self {
            Body::Cooperative(_) => TaskKind::Cooperative,
            Body::Immediate(_) => TaskKind::Immediate,
        }
    }

    #[inline]
    pub(crate) fn cooperative(self) -> Option<TaskFn<C>> {
        match self {
            Body::Cooperative(func) => Some(func),
            Body::Immediate(_) => None,
        }
    }

    #[inline]
    pub(crate) fn immediate(self) -> Option<ImmediateFn> {
        match self {
            Body::Immediate(func) => Some(func),
            Body::Cooperative(_) => None,
        }
    }
}

struct Task<C> {
    body: Body<C>,
    arg: usize,
    priority: i8,
    run_flag: u8,
    suspended: bool,
    delay: u16,
    cycle: u16,
    last_run: u32,
    interval: u32,
    next: Option<u16>,
    executing: bool,
    doomed: bool,
}

struct Slot<C> {
    task: Option<Task<C>>,
    generation: u16,
}

/// Outcome of looking at one list entry during a dispatch pass.
pub(crate) enum Step<F> {
    /// The task is ready; call it and then `finish` the same handle.
    Run(F, usize),
    /// Nothing to do here; continue at the given task.
    Next(Option<TaskId>),
}

pub(crate) struct TaskList<C, const N: usize> {
    slots: [Slot<C>; N],
    head: Option<u16>,
    count: usize,
}

impl<C, const N: usize> TaskList<C, N> {
    pub(crate) const fn new() -> Self {
        const { assert!(N <= u16::MAX as usize, "task capacity must fit in u16") };
        Self {
            slots: [const {
                Slot {
                    task: None,
                    generation: 0,
                }
            }; N],
            head: None,
            count: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<TaskId> {
        self.head.map(|index| self.id_at(index))
    }

    pub(crate) fn insert(
        &mut self,
        body: Body<C>,
        arg: usize,
        priority: i8,
        delay: u16,
        cycle: u16,
    ) -> Result<TaskId, TaskError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(TaskError::InvalidPriority(priority));
        }
        let index = self
            .slots
            .iter()
            .position(|slot| slot.task.is_none())
            .ok_or(TaskError::Full)? as u16;

        let mut prev: Option<u16> = None;
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let task = self.task(i);
            if task.priority > priority {
                break;
            }
            prev = Some(i);
            cursor = task.next;
        }

        let slot = &mut self.slots[index as usize];
        slot.task = Some(Task {
            body,
            arg,
            priority,
            run_flag: 0,
            suspended: false,
            delay,
            cycle,
            last_run: 0,
            interval: 0,
            next: cursor,
            executing: false,
            doomed: false,
        });
        let id = TaskId {
            index,
            generation: slot.generation,
        };

        match prev {
            Some(p) => self.task_mut(p).next = Some(index),
            None => self.head = Some(index),
        }
        self.count += 1;
        Ok(id)
    }

    /// Remove a task. A task that is currently executing is only marked, and leaves the list when
    /// its body returns.
    pub(crate) fn remove(&mut self, id: TaskId) -> Result<(), TaskError> {
        let task = self.lookup_mut(id).ok_or(TaskError::NotFound)?;
        if task.executing {
            task.doomed = true;
            log::debug!("task {}: deletion deferred until it returns", id.index);
            return Ok(());
        }
        self.unlink(id.index);
        log::debug!("task {}: deleted", id.index);
        Ok(())
    }

    pub(crate) fn set_suspended(&mut self, id: TaskId, suspended: bool) -> Result<(), TaskError> {
        let task = self.lookup_mut(id).ok_or(TaskError::NotFound)?;
        task.suspended = suspended;
        Ok(())
    }

    pub(crate) fn status(&self, id: TaskId) -> Option<TaskStatus> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.task.as_ref().filter(|t| !t.doomed).map(|t| TaskStatus {
            kind: t.body.kind(),
            priority: t.priority,
            delay: t.delay,
            cycle: t.cycle,
            run_flag: t.run_flag,
            suspended: t.suspended,
            interval: t.interval,
        })
    }

    /// One timer tick for every task. Returns whether an immediate task became due.
    pub(crate) fn tick(&mut self, max_run_flag: u8) -> bool {
        let mut immediate_due = false;
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let task = self.task_mut(i);
            cursor = task.next;
            if task.suspended || task.doomed {
                continue;
            }
            if task.delay > 0 {
                task.delay -= 1;
            } else {
                if task.run_flag < max_run_flag {
                    task.run_flag += 1;
                }
                if task.cycle != 0 {
                    task.delay = task.cycle - 1;
                }
                immediate_due |= matches!(task.body, Body::Immediate(_));
            }
        }
        immediate_due
    }

    /// Inspect the task `id`. A ready task whose body `select` accepts is marked executing and
    /// its interval recorded against `now`.
    ///
    /// A handle that went stale since it was handed out ends the walk with `Next(None)`; the
    /// tasks after it keep their run flags for the next walk.
    pub(crate) fn begin<F>(
        &mut self,
        id: TaskId,
        now: u32,
        select: impl FnOnce(Body<C>) -> Option<F>,
    ) -> Step<F> {
        let Some(task) = self.slot_task_mut(id) else {
            return Step::Next(None);
        };
        let ready = !task.suspended && !task.doomed && task.run_flag > 0;
        let Some(func) = ready.then(|| select(task.body)).flatten() else {
            let next = task.next;
            return Step::Next(next.map(|index| self.id_at(index)));
        };
        task.interval = now.wrapping_sub(task.last_run);
        task.last_run = now;
        task.executing = true;
        Step::Run(func, task.arg)
    }

    /// Settle a task after its body returned; returns the next task to visit.
    pub(crate) fn finish(&mut self, id: TaskId) -> Option<TaskId> {
        let task = self.slot_task_mut(id)?;
        task.executing = false;
        task.run_flag = task.run_flag.saturating_sub(1);
        let next = task.next;
        if task.cycle == 0 || task.doomed {
            self.unlink(id.index);
        }
        next.map(|index| self.id_at(index))
    }

    #[inline]
    fn id_at(&self, index: u16) -> TaskId {
        TaskId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// The task behind `id`, including one already marked for deletion.
    fn slot_task_mut(&mut self, id: TaskId) -> Option<&mut Task<C>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.task.as_mut()
    }

    fn lookup_mut(&mut self, id: TaskId) -> Option<&mut Task<C>> {
        self.slot_task_mut(id).filter(|t| !t.doomed)
    }

    fn unlink(&mut self, index: u16) {
        let next = self.task(index).next;
        if self.head == Some(index) {
            self.head = next;
        } else {
            let mut cursor = self.head;
            while let Some(i) = cursor {
                let task = self.task_mut(i);
                if task.next == Some(index) {
                    task.next = next;
                    break;
                }
                cursor = task.next;
            }
        }

        let slot = &mut self.slots[index as usize];
        slot.task = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.count -= 1;
    }

    // Linked indices always point at occupied slots.
    fn task(&self, index: u16) -> &Task<C> {
        match &self.slots[index as usize].task {
            Some(task) => task,
            None => unreachable!("task list links an empty slot"),
        }
    }

    fn task_mut(&mut self, index: u16) -> &mut Task<C> {
        match &mut self.slots[index as usize].task {
            Some(task) => task,
            None => unreachable!("task list links an empty slot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Body, Step, TaskKind, TaskList};
    use crate::error::TaskError;
    use std::vec::Vec;

    type Log = Vec<usize>;

    fn noop(_: &mut Log, _: usize) {}

    fn tick_noop(_: usize) {}

    const NOOP: Body<Log> = Body::Cooperative(noop);

    fn order<const N: usize>(list: &TaskList<Log, N>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = list.head();
        while let Some(id) = cursor {
            let task = list.task(id.index);
            out.push(task.arg);
            cursor = task.next.map(|i| list.id_at(i));
        }
        out
    }

    fn dispatch<const N: usize>(list: &mut TaskList<Log, N>, log: &mut Log) {
        let mut cursor = list.head();
        while let Some(id) = cursor {
            cursor = match list.begin(id, 0, Body::cooperative) {
                Step::Run(func, arg) => {
                    func(log, arg);
                    list.finish(id)
                }
                Step::Next(next) => next,
            };
        }
    }

    #[test]
    fn insertion_is_priority_ordered_and_stable() {
        let mut list = TaskList::<Log, 8>::new();
        list.insert(NOOP, 0, 10, 0, 1).unwrap();
        list.insert(NOOP, 1, 1, 0, 1).unwrap();
        list.insert(NOOP, 2, 5, 0, 1).unwrap();
        list.insert(NOOP, 3, 5, 0, 1).unwrap();
        list.insert(NOOP, 4, 0, 0, 1).unwrap();

        assert_eq!(order(&list), [4, 1, 2, 3, 0]);
    }

    #[test]
    fn rejects_out_of_range_priority_and_full_table() {
        let mut list = TaskList::<Log, 2>::new();
        assert_eq!(
            list.insert(NOOP, 0, -1, 0, 1).unwrap_err(),
            TaskError::InvalidPriority(-1)
        );
        list.insert(NOOP, 0, 1, 0, 1).unwrap();
        list.insert(NOOP, 1, 1, 0, 1).unwrap();
        assert_eq!(list.insert(NOOP, 2, 1, 0, 1).unwrap_err(), TaskError::Full);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn stale_handle_is_not_found_after_slot_reuse() {
        let mut list = TaskList::<Log, 1>::new();
        let first = list.insert(NOOP, 0, 1, 0, 1).unwrap();
        list.remove(first).unwrap();

        let second = list.insert(NOOP, 1, 1, 0, 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(list.remove(first).unwrap_err(), TaskError::NotFound);
        assert!(list.status(second).is_some());
    }

    #[test]
    fn removal_relinks_middle_of_list() {
        let mut list = TaskList::<Log, 4>::new();
        list.insert(NOOP, 0, 0, 0, 1).unwrap();
        let mid = list.insert(NOOP, 1, 1, 0, 1).unwrap();
        list.insert(NOOP, 2, 2, 0, 1).unwrap();

        list.remove(mid).unwrap();
        assert_eq!(order(&list), [0, 2]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn tick_reloads_cycle_minus_one() {
        let mut list = TaskList::<Log, 1>::new();
        let id = list.insert(NOOP, 0, 0, 1, 3).unwrap();

        list.tick(127);
        let status = list.status(id).unwrap();
        assert_eq!((status.delay, status.run_flag), (0, 0));

        list.tick(127);
        let status = list.status(id).unwrap();
        assert_eq!((status.delay, status.run_flag), (2, 1));
    }

    #[test]
    fn run_flag_saturates() {
        let mut list = TaskList::<Log, 1>::new();
        let id = list.insert(NOOP, 0, 0, 0, 1).unwrap();
        for _ in 0..10 {
            list.tick(3);
        }
        assert_eq!(list.status(id).unwrap().run_flag, 3);
    }

    #[test]
    fn suspended_task_is_frozen() {
        let mut list = TaskList::<Log, 1>::new();
        let id = list.insert(NOOP, 0, 0, 2, 1).unwrap();
        list.set_suspended(id, true).unwrap();
        for _ in 0..5 {
            list.tick(127);
        }
        let status = list.status(id).unwrap();
        assert_eq!((status.delay, status.run_flag, status.suspended), (2, 0, true));
    }

    #[test]
    fn executing_task_removal_is_deferred() {
        let mut list = TaskList::<Log, 2>::new();
        let id = list.insert(NOOP, 7, 0, 0, 1).unwrap();
        list.tick(127);

        let Step::Run(..) = list.begin(id, 0, Body::cooperative) else {
            panic!("task should be ready");
        };
        list.remove(id).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.status(id).is_none());

        assert_eq!(list.finish(id), None);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn one_shot_is_removed_after_running() {
        let mut list = TaskList::<Log, 2>::new();
        list.insert(NOOP, 0, 0, 0, 0).unwrap();
        list.insert(NOOP, 1, 1, 0, 4).unwrap();
        list.tick(127);

        let mut log = Vec::new();
        dispatch(&mut list, &mut log);
        assert_eq!(order(&list), [1]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn cursor_to_deleted_task_ends_the_walk() {
        let mut list = TaskList::<Log, 3>::new();
        let first = list.insert(NOOP, 0, 0, 5, 5).unwrap();
        let second = list.insert(NOOP, 1, 1, 0, 1).unwrap();
        list.tick(127);

        let Step::Next(Some(cursor)) = list.begin(first, 0, Body::cooperative) else {
            panic!("first task is not ready and links to the second");
        };
        assert_eq!(cursor, second);

        list.remove(second).unwrap();
        assert!(matches!(list.begin(cursor, 0, Body::cooperative), Step::Next(None)));
        assert_eq!(list.finish(cursor), None);

        // Same slot, new occupant.
        let third = list.insert(NOOP, 2, 1, 0, 1).unwrap();
        list.tick(127);
        assert!(matches!(list.begin(cursor, 0, Body::cooperative), Step::Next(None)));
        assert!(matches!(list.begin(third, 0, Body::cooperative), Step::Run(_, 2)));
    }

    #[test]
    fn kind_filter_skips_other_bodies() {
        let mut list = TaskList::<Log, 2>::new();
        let coop = list.insert(NOOP, 0, 0, 0, 1).unwrap();
        let fast = list.insert(Body::Immediate(tick_noop), 1, 1, 0, 1).unwrap();
        assert!(list.tick(127));
        assert_eq!(list.status(fast).unwrap().kind, TaskKind::Immediate);
        assert_eq!(list.status(coop).unwrap().kind, TaskKind::Cooperative);

        let Step::Next(Some(next)) = list.begin(coop, 0, Body::immediate) else {
            panic!("cooperative task must be skipped by an immediate walk");
        };
        assert_eq!(next, fast);
        assert!(matches!(list.begin(fast, 0, Body::immediate), Step::Run(_, 1)));
        assert_eq!(list.finish(fast), None);
        assert_eq!(list.status(coop).unwrap().run_flag, 1);
    }

    #[test]
    fn interval_uses_sampled_time() {
        let mut list = TaskList::<Log, 1>::new();
        let id = list.insert(NOOP, 0, 0, 0, 1).unwrap();
        for now in [10, 25] {
            list.tick(127);
            assert!(matches!(list.begin(id, now, Body::cooperative), Step::Run(..)));
            list.finish(id);
        }
        assert_eq!(list.status(id).unwrap().interval, 15);
    }
}
