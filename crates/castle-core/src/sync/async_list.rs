use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

/// Ordered list shared between tasks.
///
/// Items leave in exactly the order they entered. Every method is
/// synchronous, so the internal `std::sync::Mutex` is never held across an
/// `.await` and the list can be used from inside any async critical section.
#[derive(Debug, Default)]
pub struct AsyncList<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> AsyncList<T> {
    /// Empty list.
    pub fn new() -> Self {
        Self { items: Mutex::new(VecDeque::new()) }
    }

    /// List pre-populated with `items`, front first.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self { items: Mutex::new(items.into()) }
    }

    fn items(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the back.
    pub fn push(&self, item: T) {
        self.items().push_back(item);
    }

    /// Append several items to the back, preserving their order.
    pub fn push_all(&self, items: impl IntoIterator<Item = T>) {
        self.items().extend(items);
    }

    /// Copy of the front item, left in place.
    pub fn front(&self) -> Option<T>
    where
        T: Clone,
    {
        self.items().front().cloned()
    }

    /// Remove the front item.
    pub fn pop_front(&self) -> Option<T> {
        self.items().pop_front()
    }

    /// Remove every item, front first.
    pub fn take_all(&self) -> Vec<T> {
        self.items().drain(..).collect()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Copy of the current contents, front first.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items().iter().cloned().collect()
    }
}
