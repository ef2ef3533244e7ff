//! At most one running task per key; duplicate requests share its result.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::core::types::Result;

pub struct InFlight<K, V> {
    tasks: Mutex<HashMap<K, Arc<OnceCell<Result<V>>>>>,
}

impl<K, V> Default for InFlight<K, V> {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start` for `key` unless a task for it is already running, in which case wait for that
    /// task and return a copy of its result. The entry is dropped once the task finishes, so a later
    /// request starts fresh work.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = Arc::clone(self.tasks.lock().entry(key.clone()).or_default());
        let result = cell.get_or_init(start).await.clone();

        let mut tasks = self.tasks.lock();
        if tasks.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            tasks.remove(&key);
        }
        result
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.tasks.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
