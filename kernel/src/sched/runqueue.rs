//! The runqueue itself (§3's `Runqueue`): an ordered sequence of RUNNABLE
//! tasks. Kept as its own small module so `schedule`'s rotate-and-pick
//! logic in `mod.rs` reads independently of the storage it's built on.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::process::task::{Pid, Task};

pub struct RunQueue {
    tasks: VecDeque<Arc<Task>>,
}

impl RunQueue {
    pub const fn new() -> Self {
        RunQueue {
            tasks: VecDeque::new(),
        }
    }

    pub fn push_back(&mut self, task: Arc<Task>) {
        self.tasks.push_back(task);
    }

    pub fn pop_front(&mut self) -> Option<Arc<Task>> {
        self.tasks.pop_front()
    }

    pub fn remove(&mut self, pid: Pid) {
        self.tasks.retain(|t| t.pid != pid);
    }

    /// The round-robin step: push `current` to the tail (it just gave up
    /// the CPU but is still RUNNABLE), then pop the new head. If the
    /// runqueue held nothing else, this returns `current` itself.
    pub fn rotate_with(&mut self, current: Arc<Task>) -> Option<Arc<Task>> {
        self.tasks.push_back(current);
        self.tasks.pop_front()
    }
}
