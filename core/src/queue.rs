// Wake queue - FIFO shared between tasks, consumer parks until an item arrives

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug)]
pub(crate) struct WakeQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for WakeQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl<T> WakeQueue<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.notify.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Waits for the next item. Cancel-safe: nothing is taken unless returned.
    pub(crate) async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}
