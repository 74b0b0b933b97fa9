//! # Pending Queue
//!
//! Ordered collection of tasks awaiting assignment. Normal arrivals go to the
//! back; reassigned tasks go to the front so they are the next task any worker
//! receives. The lock is held only for the list mutation, never across I/O.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::models::{Task, TaskDescriptor};

#[derive(Debug, Default)]
pub struct PendingQueue {
    tasks: Mutex<VecDeque<Task>>,
    next_sequence: AtomicU64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a descriptor as a new task at the tail of the queue
    pub fn enqueue(&self, descriptor: TaskDescriptor) -> Task {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let task = Task::new(sequence, descriptor);
        self.tasks.lock().push_back(task.clone());
        task
    }

    /// Pop the head of the queue and hand it to `claim` while the queue lock is
    /// still held, so the task is never observable outside both the queue and
    /// its new owner. A rejected claim leaves the task at the head.
    pub fn pop_front_and<F>(&self, claim: F) -> Option<Task>
    where
        F: FnOnce(&Task) -> bool,
    {
        let mut tasks = self.tasks.lock();
        let task = tasks.pop_front()?;
        if claim(&task) {
            Some(task)
        } else {
            tasks.push_front(task);
            None
        }
    }

    /// Take a task from its current owner via `release` and push it to the front,
    /// under the queue lock. Returns the requeued task, if `release` yielded one.
    pub fn push_front_from<F>(&self, release: F) -> Option<Task>
    where
        F: FnOnce() -> Option<Task>,
    {
        let mut tasks = self.tasks.lock();
        let task = release()?;
        tasks.push_front(task.clone());
        Some(task)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().iter().cloned().collect()
    }
}
