use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::warn;

use crate::context::stack::capture_stack;

/// How long a `wait()` may stay suspended before stall warnings start.
const STALL_WARNING_INTERVAL: Duration = Duration::from_secs(120);

#[derive(Debug)]
struct WaitState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// A single-slot condition with a held/released state and FIFO waiter release.
///
/// `wait()` suspends while the condition is held; `unlock()` releases every
/// queued waiter in the order they started waiting. Waits that stay suspended
/// past the stall threshold log a warning with the stack captured at the
/// `wait()` call site, repeating until the wait resolves.
#[derive(Debug)]
pub struct WaitCondition {
    state: Mutex<WaitState>,
}

impl WaitCondition {
    /// Creates a new condition in the released state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WaitState {
                held: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Sets the condition to held. Callers must not re-lock while waiters
    /// from a previous hold are still queued.
    pub fn lock(&self) {
        self.state.lock().unwrap().held = true;
    }

    /// Sets the condition to released and releases every queued waiter,
    /// oldest first. Idempotent.
    pub fn unlock(&self) {
        let waiters = {
            let mut state = self.state.lock().unwrap();
            state.held = false;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            // A waiter whose future was dropped is simply gone.
            let _ = waiter.send(());
        }
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().unwrap().held
    }

    /// Suspends until the condition is released. Resolves immediately if it
    /// is not held. Never fails; a dropped sender also resolves the waiter.
    pub async fn wait(&self) {
        let mut receiver = {
            let mut state = self.state.lock().unwrap();
            if !state.held {
                return;
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        let stack = capture_stack();
        let started = Instant::now();
        let mut stall_warning = tokio::time::interval_at(
            tokio::time::Instant::now() + STALL_WARNING_INTERVAL,
            STALL_WARNING_INTERVAL,
        );

        loop {
            tokio::select! {
                _ = &mut receiver => return,
                _ = stall_warning.tick() => {
                    warn!(
                        waited_secs = started.elapsed().as_secs(),
                        stack = %stack.join("\n"),
                        "wait() suspended past the stall threshold"
                    );
                }
            }
        }
    }
}

impl Default for WaitCondition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_resolves_immediately_when_released() {
        let condition = WaitCondition::new();
        assert!(!condition.is_held());

        // Not held, so this must not suspend.
        condition.wait().await;
    }

    #[tokio::test]
    async fn test_unlock_releases_waiters_in_fifo_order() {
        let condition = Arc::new(WaitCondition::new());
        condition.lock();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..3 {
            let condition = condition.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                condition.wait().await;
                order.lock().unwrap().push(id);
            }));
            // Let this waiter enqueue before spawning the next.
            tokio::task::yield_now().await;
        }

        condition.unlock();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unlock_is_idempotent() {
        let condition = WaitCondition::new();
        condition.lock();
        condition.unlock();
        condition.unlock();

        assert!(!condition.is_held());
        condition.wait().await;
    }

    #[tokio::test]
    async fn test_lock_after_release_holds_again() {
        let condition = WaitCondition::new();
        condition.lock();
        condition.unlock();
        condition.lock();

        assert!(condition.is_held());
    }
}
