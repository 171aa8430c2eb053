//! UI-thread marshaling
//!
//! Every UI toolkit has exactly one thread on which its state may be mutated.
//! Instrument callbacks arrive on arbitrary transport threads, so anything
//! that touches UI-bound state has to be redirected onto that thread first.
//! This module abstracts the redirect as a single capability,
//! [`ThreadMarshal`], with one implementation per threading model. The
//! implementation is picked when the application is composed and handed to
//! the session as an `Arc<dyn ThreadMarshal>`.
//!
//! # Contracts
//!
//! - [`ThreadMarshalExt::invoke_if_required`] is a *check*, not a dispatch:
//!   on the UI thread it returns `false` and leaves the callback to the
//!   caller. Off-thread it schedules the callback and returns `true`
//!   immediately (fire and forget).
//! - [`ThreadMarshalExt::route`] is the argument-carrying variant. It hands
//!   the arguments back when the caller may proceed inline, otherwise the
//!   callback receives them exactly once on the UI thread.
//! - [`ThreadMarshalExt::invoke_awaitable`] is for teardown paths that must
//!   not return before the UI thread has run the callback.
//!
//! # Implementations
//!
//! - [`ChannelMarshal`] / [`UiPump`] - queue drained by an event loop (egui frame, test thread)
//! - [`InlineMarshal`] - headless hosts where every thread counts as UI-affine

pub mod channel;
pub mod inline;

pub use channel::{channel, channel_with_waker, ChannelMarshal, UiPump, Waker};
pub use inline::InlineMarshal;

use crate::error::{Result, SessionError};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A unit of work scheduled onto the UI-affine thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run work on the UI-affine thread
///
/// Implementations must be `Send + Sync`; the session shares one instance
/// between transport callbacks and async operations.
pub trait ThreadMarshal: Send + Sync {
    /// Whether the calling thread is the UI-affine thread
    fn is_ui_thread(&self) -> bool;

    /// Schedule a job for asynchronous execution on the UI-affine thread
    ///
    /// Returns [`SessionError::UiContextClosed`] when the UI context has been
    /// torn down; the job is dropped without running in that case.
    fn dispatch(&self, job: Job) -> Result<()>;

    /// Whether the UI context has been torn down
    ///
    /// Once this returns `true` every off-thread dispatch fails and nothing
    /// redirected to the UI thread will run again.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Dispatch helpers available on every [`ThreadMarshal`], including trait objects
pub trait ThreadMarshalExt: ThreadMarshal {
    /// Redirect `f` to the UI thread if the caller is not already on it
    ///
    /// Returns `false` without invoking `f` when called on the UI thread.
    /// Returns `true` once `f` has been scheduled. A dispatch onto a closed UI
    /// context is dropped with a warning and still reports `true`, so the
    /// caller never falls back to running UI code off-thread.
    fn invoke_if_required<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.try_invoke_if_required(f) {
            Ok(redirected) => redirected,
            Err(e) => {
                tracing::warn!("Dropping UI callback: {}", e);
                true
            }
        }
    }

    /// Like [`invoke_if_required`](Self::invoke_if_required) but reports a torn-down UI context
    fn try_invoke_if_required<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_ui_thread() {
            return Ok(false);
        }
        self.dispatch(Box::new(f))?;
        Ok(true)
    }

    /// Argument-carrying redirect
    ///
    /// On the UI thread the arguments are handed back untouched so the caller
    /// can proceed directly. Off-thread `f(args)` is scheduled and `None` is
    /// returned.
    fn route<A, F>(&self, args: A, f: F) -> Option<A>
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        if self.is_ui_thread() {
            return Some(args);
        }
        if let Err(e) = self.dispatch(Box::new(move || f(args))) {
            tracing::warn!("Dropping redirected UI call: {}", e);
        }
        None
    }

    /// Run `f` on the UI thread and resolve once it has completed
    ///
    /// Runs inline when already on the UI thread.
    fn invoke_awaitable<R, F>(&self, f: F) -> UiCompletion<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_ui_thread() {
            return UiCompletion::ready(Ok(f()));
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // Receiver gone means the awaiting side lost interest
            let _ = tx.send(f());
        });
        match self.dispatch(job) {
            Ok(()) => UiCompletion::pending(rx),
            Err(e) => UiCompletion::ready(Err(e)),
        }
    }
}

impl<T: ThreadMarshal + ?Sized> ThreadMarshalExt for T {}

/// Future returned by [`ThreadMarshalExt::invoke_awaitable`]
#[must_use = "futures do nothing unless awaited"]
pub struct UiCompletion<R> {
    state: CompletionState<R>,
}

enum CompletionState<R> {
    Ready(Option<Result<R>>),
    Pending(oneshot::Receiver<R>),
}

impl<R> UiCompletion<R> {
    fn ready(result: Result<R>) -> Self {
        Self {
            state: CompletionState::Ready(Some(result)),
        }
    }

    fn pending(rx: oneshot::Receiver<R>) -> Self {
        Self {
            state: CompletionState::Pending(rx),
        }
    }
}

// No structural pinning: `R` is only ever moved out by value.
impl<R> Unpin for UiCompletion<R> {}

impl<R> Future for UiCompletion<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CompletionState::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or(Err(SessionError::CallbackDropped)),
            ),
            CompletionState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.map_err(|_| SessionError::CallbackDropped)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_invoke_if_required_on_ui_thread_does_not_run() {
        let (marshal, pump) = channel();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();

        assert!(!marshal.invoke_if_required(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(pump.pump(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invoke_if_required_off_thread_schedules() {
        let (marshal, pump) = channel();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();

        let redirected = std::thread::spawn(move || {
            marshal.invoke_if_required(move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            })
        })
        .join()
        .unwrap();

        assert!(redirected);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pump.pump(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_route_returns_args_on_ui_thread() {
        let marshal = InlineMarshal::new();
        let args = marshal.route((1, "two".to_string()), |_| panic!("must not run"));
        assert_eq!(args, Some((1, "two".to_string())));
    }

    #[test]
    fn test_route_applies_args_once_off_thread() {
        let (marshal, pump) = channel();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        std::thread::spawn(move || {
            let handed_back = marshal.route((7u32, vec![1.0, 2.0]), move |(n, values)| {
                seen_clone.lock().unwrap().push((n, values));
            });
            assert!(handed_back.is_none());
        })
        .join()
        .unwrap();

        pump.pump();
        assert_eq!(*seen.lock().unwrap(), vec![(7u32, vec![1.0, 2.0])]);
    }

    #[test]
    fn test_try_invoke_reports_closed_context() {
        let (marshal, pump) = channel();
        drop(pump);

        let result = std::thread::spawn(move || marshal.try_invoke_if_required(|| {}))
            .join()
            .unwrap();
        assert_eq!(result, Err(SessionError::UiContextClosed));
    }

    #[tokio::test]
    async fn test_invoke_awaitable_inline() {
        let marshal = InlineMarshal::new();
        let value = marshal.invoke_awaitable(|| 21 * 2).await;
        assert_eq!(value, Ok(42));
    }

    #[tokio::test]
    async fn test_invoke_awaitable_waits_for_ui_thread() {
        let (tx, rx) = std::sync::mpsc::channel();
        let ui = std::thread::spawn(move || {
            let (marshal, pump) = channel();
            tx.send(marshal).unwrap();
            pump.run();
        });
        let marshal = rx.recv().unwrap();

        let ui_thread = ui.thread().id();
        let ran_on = marshal
            .invoke_awaitable(|| std::thread::current().id())
            .await
            .unwrap();
        assert_eq!(ran_on, ui_thread);

        drop(marshal);
        ui.join().unwrap();
    }

    #[tokio::test]
    async fn test_invoke_awaitable_closed_context() {
        let (marshal, pump) = channel();
        drop(pump);
        let marshal = Arc::new(marshal);

        let m = marshal.clone();
        let result = tokio::task::spawn_blocking(move || m.invoke_awaitable(|| 1))
            .await
            .unwrap()
            .await;
        assert_eq!(result, Err(SessionError::UiContextClosed));
    }
}
