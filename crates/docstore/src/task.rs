//! Cooperative cancellation for long running reads.
//!
//! A [`TaskContext`] is handed to block-wise streams and checked before each
//! block is fetched. The owning [`TaskHandle`] flips it to inactive.

use tokio::sync::watch;

/// Read side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct TaskContext {
    active: watch::Receiver<bool>,
}

/// Write side of a cancellation signal.
#[derive(Debug)]
pub struct TaskHandle {
    sender: watch::Sender<bool>,
}

impl TaskContext {
    /// Creates a linked handle/context pair in the active state.
    pub fn new() -> (TaskHandle, TaskContext) {
        let (sender, active) = watch::channel(true);
        (TaskHandle { sender }, TaskContext { active })
    }

    /// Creates a context which stays active forever.
    pub fn unbounded() -> TaskContext {
        // The last value stays observable after the sender is dropped.
        let (_, context) = Self::new();
        context
    }

    /// Returns true as long as the task has not been cancelled.
    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }
}

impl TaskHandle {
    /// Marks the task as inactive.
    pub fn cancel(&self) {
        self.sender.send_replace(false);
    }

    /// Returns true as long as [`cancel`](Self::cancel) was not called.
    pub fn is_active(&self) -> bool {
        *self.sender.borrow()
    }

    /// Returns another context observing this handle.
    pub fn context(&self) -> TaskContext {
        TaskContext {
            active: self.sender.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel() {
        let (handle, context) = TaskContext::new();
        let other = handle.context();
        assert!(context.is_active());
        assert!(other.is_active());

        handle.cancel();
        assert!(!context.is_active());
        assert!(!other.is_active());
        assert!(!handle.is_active());
    }

    #[test]
    fn test_unbounded() {
        let context = TaskContext::unbounded();
        assert!(context.is_active());
        assert!(context.clone().is_active());
    }
}
