//! Single-fire completion signal shared by a request's continuations.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Sending half of a completion, cloneable into every continuation of one request.
///
/// The first `fire` wins. Later fires, and fires after the waiter has given up,
/// are dropped silently.
pub(crate) struct Completion<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { slot: Arc::new(Mutex::new(Some(tx))) }, rx)
    }

    /// Deliver `value` to the waiter. Returns whether anyone received it.
    pub(crate) fn fire(&self, value: T) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        tx.send(value).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_fire_wins() {
        let (completion, rx) = Completion::channel();
        let other = completion.clone();

        assert!(completion.fire(1));
        assert!(!other.fire(2));
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[test]
    fn test_fire_after_waiter_dropped() {
        let (completion, rx) = Completion::<u8>::channel();
        drop(rx);
        assert!(!completion.fire(7));
        assert!(!completion.fire(8));
    }

    #[tokio::test]
    async fn test_dropped_completion_closes_channel() {
        let (completion, rx) = Completion::<u8>::channel();
        drop(completion);
        assert!(rx.await.is_err());
    }
}
