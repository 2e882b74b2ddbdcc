//! The client's future type.
//!
//! A [`ResponseFuture`] completes exactly once: with the value or error of
//! the task driving it, or with [`Error::Cancelled`] if it was cancelled
//! first. Whichever happens first wins and the other is a no-op. It can be
//! awaited from async code or waited on from a plain thread.

use crate::{Error, Result};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

enum State<T> {
    Pending,
    Ready(Result<T>),
    Cancelled,
    Taken,
}

struct Slot<T> {
    state: State<T>,
    waker: Option<Waker>,
    abort: Option<AbortHandle>,
}

struct Completion<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

impl<T> Completion<T> {
    fn new(state: State<T>) -> Self {
        Self {
            slot: Mutex::new(Slot {
                state,
                waker: None,
                abort: None,
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves a pending slot to `state`. Returns `false` if already done.
    fn settle(&self, state: State<T>) -> bool {
        let mut slot = self.lock();
        if !matches!(slot.state, State::Pending) {
            return false;
        }
        let cancelled = matches!(state, State::Cancelled);
        slot.state = state;
        let abort = slot.abort.take();
        let waker = slot.waker.take();
        drop(slot);

        if cancelled {
            if let Some(abort) = abort {
                abort.abort();
            }
        }
        self.done.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self) -> bool;
}

impl<T: Send> Cancel for Completion<T> {
    fn cancel(&self) -> bool {
        self.settle(State::Cancelled)
    }
}

/// Completes the future with an error if the driving task ends without
/// producing a result, whether it panicked or was dropped by the runtime.
struct CompletionGuard<T> {
    completion: Option<Arc<Completion<T>>>,
}

impl<T> CompletionGuard<T> {
    fn complete(mut self, result: Result<T>) {
        if let Some(completion) = self.completion.take() {
            completion.settle(State::Ready(result));
        }
    }
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            let reason = if std::thread::panicking() {
                "task panicked"
            } else {
                "task dropped before completion"
            };
            if completion.settle(State::Ready(Err(Error::TaskFailed(reason.to_string())))) {
                tracing::warn!(reason, "Response future completed by guard");
            }
        }
    }
}

/// Result of an asynchronous client call.
///
/// # Examples
///
/// ```
/// use callgate::ResponseFuture;
///
/// # async fn example() -> Result<(), callgate::Error> {
/// let handle = tokio::runtime::Handle::current();
/// let future = ResponseFuture::spawn(&handle, async { Ok(42) });
/// assert_eq!(future.await?, 42);
/// # Ok(())
/// # }
/// ```
pub struct ResponseFuture<T> {
    completion: Arc<Completion<T>>,
}

impl<T: Send + 'static> ResponseFuture<T> {
    /// Drives `future` on `handle` and adapts its outcome.
    pub fn spawn<F>(handle: &Handle, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let completion = Arc::new(Completion::new(State::Pending));
        let guard = CompletionGuard {
            completion: Some(completion.clone()),
        };
        let task = handle.spawn(async move {
            let guard = guard;
            let result = future.await;
            guard.complete(result);
        });

        let mut slot = completion.lock();
        if matches!(slot.state, State::Pending) {
            slot.abort = Some(task.abort_handle());
        }
        drop(slot);

        Self { completion }
    }

    /// A handle that cancels this future from anywhere.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            target: self.completion.clone(),
        }
    }
}

impl<T> ResponseFuture<T> {
    /// An already completed future.
    pub fn ready(value: T) -> Self {
        Self {
            completion: Arc::new(Completion::new(State::Ready(Ok(value)))),
        }
    }

    /// An already failed future.
    pub fn failed(error: Error) -> Self {
        Self {
            completion: Arc::new(Completion::new(State::Ready(Err(error)))),
        }
    }

    /// Cancels the call. Returns `false` if it had already completed.
    ///
    /// The driving task is aborted; an in-flight transport attempt is
    /// dropped with it.
    pub fn cancel(&self) -> bool {
        self.completion.settle(State::Cancelled)
    }

    /// Returns `true` once the call completed, failed or was cancelled.
    pub fn is_done(&self) -> bool {
        !matches!(self.completion.lock().state, State::Pending)
    }

    /// Returns `true` if the call was cancelled before completing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.completion.lock().state, State::Cancelled)
    }

    /// Blocks the current thread until the call completes.
    ///
    /// Must not be called from a runtime worker thread.
    pub fn wait(&mut self) -> Result<T> {
        let slot = self.completion.lock();
        let mut slot = self
            .completion
            .done
            .wait_while(slot, |slot| matches!(slot.state, State::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        take(&mut slot)
    }

    /// Blocks for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WaitTimeout`] if the call is still running; it keeps
    /// running and can be waited on again.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<T> {
        let slot = self.completion.lock();
        let (mut slot, _) = self
            .completion
            .done
            .wait_timeout_while(slot, timeout, |slot| matches!(slot.state, State::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.state, State::Pending) {
            return Err(Error::WaitTimeout);
        }
        take(&mut slot)
    }
}

fn take<T>(slot: &mut Slot<T>) -> Result<T> {
    match std::mem::replace(&mut slot.state, State::Taken) {
        State::Ready(result) => result,
        State::Cancelled => {
            slot.state = State::Cancelled;
            Err(Error::Cancelled)
        }
        State::Taken => Err(Error::ResultTaken),
        State::Pending => {
            slot.state = State::Pending;
            Err(Error::WaitTimeout)
        }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.completion.lock();
        if matches!(slot.state, State::Pending) {
            match &slot.waker {
                Some(waker) if waker.will_wake(cx.waker()) => {}
                _ => slot.waker = Some(cx.waker().clone()),
            }
            return Poll::Pending;
        }
        Poll::Ready(take(&mut slot))
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.completion.lock().state {
            State::Pending => "pending",
            State::Ready(Ok(_)) => "ready",
            State::Ready(Err(_)) => "failed",
            State::Cancelled => "cancelled",
            State::Taken => "taken",
        };
        f.debug_struct("ResponseFuture").field("state", &state).finish()
    }
}

/// Cancels a [`ResponseFuture`] from another task or thread.
#[derive(Clone)]
pub struct Canceller {
    target: Arc<dyn Cancel>,
}

impl Canceller {
    /// Cancels the call. Returns `false` if it had already completed.
    pub fn cancel(&self) -> bool {
        self.target.cancel()
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller").finish_non_exhaustive()
    }
}
