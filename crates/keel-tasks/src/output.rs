//! Values a task learns while running, shared with its dependents

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};

use crate::task::TaskKey;

/// A cell filled in by the task that owns it
///
/// Clones share the same cell. Serializes as the current value, so an
/// unfilled output is null and is skipped when diffing.
pub struct Output<T> {
    inner: Arc<RwLock<Option<T>>>,
}

impl<T> Default for Output<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Output<T> {
    /// An unfilled output
    pub fn new() -> Self {
        Self::default()
    }

    /// An output already holding `value`
    pub fn with_value(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(value))),
        }
    }

    /// Fill the output
    pub fn set(&self, value: T) {
        *self.inner.write() = Some(value);
    }

    /// Current value
    pub fn get(&self) -> Option<T> {
        self.inner.read().clone()
    }

    /// True once filled
    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl<T: fmt::Debug> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.read() {
            Some(v) => write!(f, "Output({v:?})"),
            None => f.write_str("Output(<unset>)"),
        }
    }
}

impl<T: PartialEq> PartialEq for Output<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || *self.inner.read() == *other.inner.read()
    }
}

impl<T: Serialize> Serialize for Output<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.read().serialize(serializer)
    }
}

/// A dependency on another task plus one of its outputs
///
/// The referenced task is inferred as a dependency of the holder.
pub struct TaskRef<T> {
    key: TaskKey,
    output: Output<T>,
}

impl<T> Clone for TaskRef<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            output: self.output.clone(),
        }
    }
}

impl<T: Clone> TaskRef<T> {
    /// Reference to `output` of the task `key`
    pub fn new(key: TaskKey, output: &Output<T>) -> Self {
        Self {
            key,
            output: output.clone(),
        }
    }

    /// Reference resolved to a fixed value, with no owning task in the graph
    pub fn resolved(key: TaskKey, value: T) -> Self {
        Self {
            key,
            output: Output::with_value(value),
        }
    }

    /// The referenced task
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// The referenced value, once the owner has run
    pub fn get(&self) -> Option<T> {
        self.output.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for TaskRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskRef({}, {:?})", self.key, self.output)
    }
}

impl<T: PartialEq> PartialEq for TaskRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.output == other.output
    }
}

impl<T: Serialize> Serialize for TaskRef<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.output.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_cell() {
        let id: Output<String> = Output::new();
        let reference = TaskRef::new(TaskKey::new("LoadBalancer", "api"), &id);
        assert_eq!(reference.get(), None);
        id.set("lb-123".into());
        assert_eq!(reference.get().as_deref(), Some("lb-123"));
    }

    #[test]
    fn serializes_as_current_value() {
        let id: Output<String> = Output::new();
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::Value::Null);
        id.set("x".into());
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("x"));
    }
}
