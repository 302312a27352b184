use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::task::{Task, TaskGroup};

/// The batch's persisted work list.
///
/// Pops are stack ordered: the most recently inserted entry comes out first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskQueue {
    root: TaskGroup,
}

/// Result of a pop: a single task only when exactly one was asked for.
#[derive(Clone, Debug, PartialEq)]
pub enum Popped {
    Nothing,
    One(Task),
    Many(Vec<Task>),
}

impl Popped {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Popped::Nothing)
    }

    pub fn into_vec(self) -> Vec<Task> {
        match self {
            Popped::Nothing => vec![],
            Popped::One(t) => vec![t],
            Popped::Many(ts) => ts,
        }
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &TaskGroup {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Task> {
        self.root.get(key)
    }

    /// Adds `tasks`: a group is merged by key, anything else is appended at
    /// the next integer index. Once the queue holds entries, further adds
    /// need `allow_dynamic`.
    pub fn add_tasks(&mut self, tasks: Task, allow_dynamic: bool) -> Result<(), QueueError> {
        if !self.root.is_empty() && !allow_dynamic {
            return Err(QueueError::DynamicTasksForbidden);
        }
        match tasks {
            Task::Group(group) => self.root.merge(group),
            scalar => {
                self.root.push(scalar);
            }
        }
        Ok(())
    }

    /// Removes up to `amount` tasks from the root, or from the group stored
    /// at `key`. A missing key, a scalar at `key`, or `amount == 0` pop nothing.
    pub fn pop_task(&mut self, key: Option<&str>, amount: usize) -> Popped {
        if amount == 0 {
            return Popped::Nothing;
        }
        let group = match key {
            None => &mut self.root,
            Some(k) => match self.root.get_mut(k) {
                Some(Task::Group(g)) => g,
                _ => return Popped::Nothing,
            },
        };

        let mut taken = Vec::with_capacity(amount.min(group.len()));
        while taken.len() < amount {
            match group.pop() {
                Some((_, task)) => taken.push(task),
                None => break,
            }
        }

        match taken.len() {
            0 => Popped::Nothing,
            1 if amount == 1 => Popped::One(taken.remove(0)),
            _ => Popped::Many(taken),
        }
    }

    pub fn remove_task(&mut self, key: &str) -> Option<Task> {
        self.root.remove(key)
    }

    pub fn has_remaining_work(&self) -> bool {
        self.root.has_remaining_work()
    }

    pub fn clear(&mut self) {
        self.root = TaskGroup::new();
    }
}

impl From<TaskGroup> for TaskQueue {
    fn from(root: TaskGroup) -> Self {
        Self { root }
    }
}
