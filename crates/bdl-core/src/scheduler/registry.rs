//! Live tasks by key, in registration order.

use std::collections::HashMap;
use std::sync::Arc;

use super::task::Task;

#[derive(Default)]
pub(crate) struct Registry {
    tasks: HashMap<String, Arc<Task>>,
    order: Vec<String>,
}

impl Registry {
    pub(crate) fn get(&self, key: &str) -> Option<Arc<Task>> {
        self.tasks.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, task: Arc<Task>) {
        let key = task.key().to_string();
        if self.tasks.insert(key.clone(), task).is_none() {
            self.order.push(key);
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Arc<Task>> {
        let task = self.tasks.remove(key)?;
        self.order.retain(|k| k != key);
        Some(task)
    }

    /// Every task, oldest registration first.
    pub(crate) fn tasks(&self) -> Vec<Arc<Task>> {
        self.order
            .iter()
            .filter_map(|k| self.tasks.get(k).cloned())
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.tasks.clear();
        self.order.clear();
    }
}
