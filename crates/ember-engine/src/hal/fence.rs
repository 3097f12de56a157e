use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

type ProgressDriver = Box<dyn Fn() + Send + Sync>;

/// CPU/GPU synchronization counter.
///
/// The GPU side advances the completed value with [`Fence::complete`]; the CPU
/// side observes it with [`Fence::completed_value`] or registers a
/// [`FenceEvent`] to be raised once a value is reached. The completed value
/// never decreases.
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

struct FenceInner {
    state: Mutex<FenceState>,
    driver: Option<ProgressDriver>,
}

struct FenceState {
    completed: u64,
    waiters: Vec<(u64, FenceEvent)>,
}

impl Fence {
    pub fn new(initial: u64) -> Self {
        Self::build(initial, None)
    }

    /// Creates a fence whose progress depends on the CPU pumping the backend.
    ///
    /// `driver` runs before the CPU blocks on an event and must make all
    /// submitted work complete (for wgpu: a blocking device poll).
    pub fn with_driver(initial: u64, driver: impl Fn() + Send + Sync + 'static) -> Self {
        Self::build(initial, Some(Box::new(driver)))
    }

    fn build(initial: u64, driver: Option<ProgressDriver>) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                state: Mutex::new(FenceState { completed: initial, waiters: Vec::new() }),
                driver,
            }),
        }
    }

    /// Last value the GPU reported as completed.
    pub fn completed_value(&self) -> u64 {
        self.inner.state.lock().completed
    }

    /// Raises `event` once the completed value reaches `value`.
    ///
    /// If the value is already reached the event is raised immediately.
    pub fn set_event_on_completion(&self, value: u64, event: &FenceEvent) {
        let mut state = self.inner.state.lock();
        if state.completed >= value {
            drop(state);
            event.set();
            return;
        }
        state.waiters.push((value, event.clone()));
    }

    /// GPU-side completion. Values at or below the current one are ignored.
    pub fn complete(&self, value: u64) {
        let ready: Vec<FenceEvent> = {
            let mut state = self.inner.state.lock();
            if value <= state.completed {
                return;
            }
            state.completed = value;

            let (ready, pending): (Vec<_>, Vec<_>) =
                state.waiters.drain(..).partition(|(v, _)| *v <= value);
            state.waiters = pending;
            ready.into_iter().map(|(_, e)| e).collect()
        };

        for event in ready {
            event.set();
        }
    }

    /// Pumps the backend so pending signals can land.
    pub fn drive(&self) {
        if let Some(driver) = &self.inner.driver {
            driver();
        }
    }

    /// Number of registered events still waiting for their value.
    pub fn pending_waiters(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Fence")
            .field("completed", &state.completed)
            .field("waiters", &state.waiters.len())
            .field("driven", &self.inner.driver.is_some())
            .finish()
    }
}

/// Auto-reset wait handle raised by a [`Fence`].
///
/// A successful wait consumes the raised state.
#[derive(Clone, Default)]
pub struct FenceEvent {
    inner: Arc<EventInner>,
}

#[derive(Default)]
struct EventInner {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl FenceEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut raised = self.inner.raised.lock();
        *raised = true;
        self.inner.cond.notify_all();
    }

    /// Blocks until the event is raised. No timeout.
    pub fn wait(&self) {
        let mut raised = self.inner.raised.lock();
        while !*raised {
            self.inner.cond.wait(&mut raised);
        }
        *raised = false;
    }

    /// Returns `false` if `timeout` elapsed before the event was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.inner.raised.lock();
        while !*raised {
            if self.inner.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *raised, false)
    }

    pub fn is_raised(&self) -> bool {
        *self.inner.raised.lock()
    }
}

impl fmt::Debug for FenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceEvent").field("raised", &self.is_raised()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn event_on_completed_value_is_raised_immediately() {
        let fence = Fence::new(3);
        let event = FenceEvent::new();
        fence.set_event_on_completion(2, &event);
        assert!(event.is_raised());
        assert_eq!(fence.pending_waiters(), 0);
    }

    #[test]
    fn completion_raises_only_reached_waiters() {
        let fence = Fence::new(0);
        let a = FenceEvent::new();
        let b = FenceEvent::new();
        fence.set_event_on_completion(1, &a);
        fence.set_event_on_completion(5, &b);

        fence.complete(2);
        assert!(a.is_raised());
        assert!(!b.is_raised());
        assert_eq!(fence.pending_waiters(), 1);
    }

    #[test]
    fn completed_value_never_goes_backwards() {
        let fence = Fence::new(0);
        fence.complete(7);
        fence.complete(4);
        assert_eq!(fence.completed_value(), 7);
    }

    #[test]
    fn wait_is_released_by_another_thread() {
        let fence = Fence::new(0);
        let event = FenceEvent::new();
        fence.set_event_on_completion(1, &event);

        let gpu = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            gpu.complete(1);
        });

        event.wait();
        assert_eq!(fence.completed_value(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn wait_consumes_the_raised_state() {
        let event = FenceEvent::new();
        event.set();
        event.wait();
        assert!(!event.is_raised());
        assert!(!event.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn driver_runs_on_drive() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let fence = Fence::with_driver(0, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        fence.drive();
        fence.drive();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
