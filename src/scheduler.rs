//! Task scheduling
//!
//! Every entry into a loop directive (initial run, mutation trap, element
//! completion) goes through a [`Scheduler`]. The scheduler decides whether a
//! task runs now or later; directives never call into themselves directly,
//! so a mutation fired from inside a running loop body cannot re-enter the
//! controller while it holds its own state.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

pub type Task = Box<dyn FnOnce()>;

pub trait Scheduler {
    fn schedule(&self, task: Task);
}

/// Runs tasks immediately, unless a task is already running, in which case
/// the new task is appended and run once the current one returns.
#[derive(Default)]
pub struct TrampolineScheduler {
    pending: RefCell<VecDeque<Task>>,
    running: Cell<bool>,
}

impl TrampolineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<dyn Scheduler> {
        Rc::new(Self::new())
    }
}

impl Scheduler for TrampolineScheduler {
    fn schedule(&self, task: Task) {
        self.pending.borrow_mut().push_back(task);
        if self.running.replace(true) {
            return;
        }
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
        }
        self.running.set(false);
    }
}

/// Defers every task until the host pumps the queue.
///
/// Models a host event loop: nothing happens until [`TaskQueue::run_pending`]
/// or [`TaskQueue::run_next`] is called.
#[derive(Default, Clone)]
pub struct TaskQueue {
    pending: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Run one task; returns false when the queue was empty
    pub fn run_next(&self) -> bool {
        let next = self.pending.borrow_mut().pop_front();
        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run until no task is left, including tasks scheduled along the way.
    /// Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }
}

impl Scheduler for TaskQueue {
    fn schedule(&self, task: Task) {
        self.pending.borrow_mut().push_back(task);
    }
}
