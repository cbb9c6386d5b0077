//! Task result channel
//!
//! A `Promise`/`TaskFuture` pair connects a packaged task to its caller.
//! The promise side is fulfilled exactly once by the worker that runs
//! the task (or by the task's destructor); the future side blocks until
//! the result is available. A promise dropped unfulfilled, e.g. when the
//! manager shuts down with queued tasks, abandons the future.

use std::any::Any;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Panic payload carried out of a failed task
pub struct PanicPayload(Box<dyn Any + Send + 'static>);

impl PanicPayload {
    pub(crate) fn new(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self(payload)
    }

    /// Returns the panic message when it was a string
    pub fn message(&self) -> Option<&str> {
        if let Some(message) = self.0.downcast_ref::<&'static str>() {
            Some(message)
        } else {
            self.0.downcast_ref::<String>().map(String::as_str)
        }
    }

    /// Consumes the payload for `std::panic::resume_unwind`
    pub fn into_inner(self) -> Box<dyn Any + Send + 'static> {
        self.0
    }
}

impl core::fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.message() {
            Some(message) => write!(f, "PanicPayload({message:?})"),
            None => f.write_str("PanicPayload(..)"),
        }
    }
}

impl core::fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message().unwrap_or("opaque panic payload"))
    }
}

/// Failure of a task observed through its future
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task payload panicked; the payload is preserved
    #[error("the task panicked: {0}")]
    Panicked(PanicPayload),
    /// The task was dropped without running (manager shutdown)
    #[error("the task was abandoned before it could run")]
    Abandoned,
}

/// Result type observed through a future
pub type TaskResult<T> = Result<T, TaskError>;

enum State<T> {
    Pending,
    Ready(T),
    Panicked(PanicPayload),
    Abandoned,
}

struct Channel<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T> Channel<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending),
            condvar: Condvar::new(),
        })
    }

    fn resolve(&self, state: State<T>) {
        let mut guard = self.state.lock();
        // First resolution wins; a loop task destructor must not
        // overwrite a recorded panic.
        if matches!(*guard, State::Pending) {
            *guard = state;
        }
        drop(guard);
        self.condvar.notify_all();
    }
}

/// Producer side of the result channel
pub struct Promise<T> {
    channel: Option<Arc<Channel<T>>>,
}

impl<T> Promise<T> {
    /// Fulfills the promise with a value
    pub fn complete(mut self, value: T) {
        if let Some(channel) = self.channel.take() {
            channel.resolve(State::Ready(value));
        }
    }

    /// Fails the promise with a caught panic payload
    pub fn fail(mut self, payload: Box<dyn Any + Send + 'static>) {
        if let Some(channel) = self.channel.take() {
            channel.resolve(State::Panicked(PanicPayload::new(payload)));
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.resolve(State::Abandoned);
        }
    }
}

impl<T> core::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

/// Handle over the result of one enqueued task
///
/// Non-copyable and movable. `get` consumes the future; `wait` blocks
/// without consuming.
pub struct TaskFuture<T> {
    channel: Arc<Channel<T>>,
    id: i64,
}

impl<T> TaskFuture<T> {
    /// Creates a connected promise/future pair for the given task ID
    pub(crate) fn channel(id: i64) -> (Promise<T>, TaskFuture<T>) {
        let channel = Channel::new();
        let promise = Promise { channel: Some(Arc::clone(&channel)) };
        (promise, TaskFuture { channel, id })
    }

    /// Returns the ID of the owning task
    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Checks if the future still refers to a result channel
    #[inline]
    pub fn is_valid(&self) -> bool {
        // The channel is held until `get` consumes the future.
        true
    }

    /// Blocks until the result becomes available
    pub fn wait(&self) {
        let mut guard = self.channel.state.lock();
        while matches!(*guard, State::Pending) {
            self.channel.condvar.wait(&mut guard);
        }
    }

    /// Blocks until the result is available and returns it
    pub fn get(self) -> TaskResult<T> {
        self.wait();
        let mut guard = self.channel.state.lock();
        match core::mem::replace(&mut *guard, State::Abandoned) {
            State::Ready(value) => Ok(value),
            State::Panicked(payload) => Err(TaskError::Panicked(payload)),
            State::Abandoned => Err(TaskError::Abandoned),
            State::Pending => unreachable!("wait() returned while pending"),
        }
    }
}

impl<T> core::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskFuture").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_complete_and_get() {
        let (promise, future) = TaskFuture::channel(7);
        assert_eq!(future.id(), 7);
        assert!(future.is_valid());
        promise.complete(42u32);
        assert_eq!(future.get().unwrap(), 42);
    }

    #[test]
    fn test_wait_blocks_until_fulfilled() {
        let (promise, future) = TaskFuture::<u64>::channel(0);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.complete(11);
        });
        future.wait();
        assert_eq!(future.get().unwrap(), 11);
        producer.join().unwrap();
    }

    #[test]
    fn test_dropped_promise_abandons_future() {
        let (promise, future) = TaskFuture::<()>::channel(1);
        drop(promise);
        assert!(matches!(future.get(), Err(TaskError::Abandoned)));
    }

    #[test]
    fn test_panic_payload_message() {
        let (promise, future) = TaskFuture::<()>::channel(2);
        promise.fail(Box::new("boom"));
        match future.get() {
            Err(TaskError::Panicked(payload)) => assert_eq!(payload.message(), Some("boom")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
