use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of work: an opaque scalar or a nested group of tasks.
#[derive(Clone, Debug, PartialEq)]
pub enum Task {
    /// Any JSON value except an object or array.
    Scalar(Value),
    Group(TaskGroup),
}

impl Task {
    /// Group keyed `0..n` in iteration order.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Task>,
    {
        let mut group = TaskGroup::new();
        for item in items {
            group.push(item.into());
        }
        Task::Group(group)
    }

    pub fn as_group(&self) -> Option<&TaskGroup> {
        match self {
            Task::Group(g) => Some(g),
            Task::Scalar(_) => None,
        }
    }

    /// True when this task (or anything nested under it) still needs doing.
    pub fn is_work(&self) -> bool {
        match self {
            Task::Scalar(v) => !is_falsy(v),
            Task::Group(g) => g.has_remaining_work(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Task::Scalar(v) => v.clone(),
            Task::Group(g) => Value::Object(g.iter().map(|(k, t)| (k.to_string(), t.to_value())).collect()),
        }
    }
}

/// `null`, `false`, zero, `""` and `"0"` carry no work.
fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

impl From<Value> for Task {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut group = TaskGroup::new();
                for (k, v) in map {
                    group.insert(k, Task::from(v));
                }
                Task::Group(group)
            }
            Value::Array(items) => Task::list(items),
            scalar => Task::Scalar(scalar),
        }
    }
}

impl From<&str> for Task {
    fn from(s: &str) -> Self {
        Task::Scalar(Value::String(s.to_string()))
    }
}

impl From<String> for Task {
    fn from(s: String) -> Self {
        Task::Scalar(Value::String(s))
    }
}

impl From<i64> for Task {
    fn from(n: i64) -> Self {
        Task::Scalar(Value::from(n))
    }
}

impl From<TaskGroup> for Task {
    fn from(g: TaskGroup) -> Self {
        Task::Group(g)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Scalar(Value::String(s)) => f.write_str(s),
            other => write!(f, "{}", other.to_value()),
        }
    }
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Task::Scalar(v) => v.serialize(serializer),
            Task::Group(g) => g.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Task::from)
    }
}

/// Insertion-ordered map of task key to task.
///
/// Keys that look like non-negative integers behave like auto-assigned
/// indexes: bare appends take the next index after the highest one present.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskGroup {
    entries: Vec<(String, Task)>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Task> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, t)| t)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Task> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, t)| t)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Task)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Sets `key`; an existing entry is overwritten in place and returned.
    pub fn insert(&mut self, key: impl Into<String>, task: Task) -> Option<Task> {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, task)),
            None => {
                self.entries.push((key, task));
                None
            }
        }
    }

    /// Appends at the next integer index and returns the key used.
    pub fn push(&mut self, task: Task) -> String {
        let key = self.next_index().to_string();
        self.entries.push((key.clone(), task));
        key
    }

    pub fn next_index(&self) -> u64 {
        self.keys().filter_map(integer_key).max().map(|max| max + 1).unwrap_or(0)
    }

    pub fn remove(&mut self, key: &str) -> Option<Task> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Removes the most recently inserted entry.
    pub fn pop(&mut self) -> Option<(String, Task)> {
        self.entries.pop()
    }

    /// String keys overwrite, integer keys are appended after the current
    /// highest index.
    pub fn merge(&mut self, other: TaskGroup) {
        for (key, task) in other.entries {
            if integer_key(&key).is_some() {
                self.push(task);
            } else {
                self.insert(key, task);
            }
        }
    }

    /// True iff some non-falsy scalar exists at any depth.
    pub fn has_remaining_work(&self) -> bool {
        self.entries.iter().any(|(_, t)| t.is_work())
    }
}

fn integer_key(key: &str) -> Option<u64> {
    let n: u64 = key.parse().ok()?;
    (n.to_string() == key).then_some(n)
}

impl Serialize for TaskGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, t) in &self.entries {
            map.serialize_entry(k, t)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TaskGroup {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Task::deserialize(deserializer)? {
            Task::Group(g) => Ok(g),
            Task::Scalar(Value::Null) => Ok(TaskGroup::new()),
            Task::Scalar(v) => Err(de::Error::custom(format!("expected a task group, found {v}"))),
        }
    }
}
