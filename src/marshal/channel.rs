//! Queue-backed marshal for event-loop UI toolkits
//!
//! [`channel`] must be called on the UI-affine thread: the calling thread is
//! recorded as the owner. Jobs dispatched from other threads travel through
//! an unbounded crossbeam channel and are run by [`UiPump::pump`], which the
//! owning event loop calls once per iteration (for egui: once per frame).
//!
//! An optional [`Waker`] is invoked after every enqueue so a sleeping event
//! loop can be nudged (`egui::Context::request_repaint`).

use super::{Job, ThreadMarshal};
use crate::error::{Result, SessionError};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Callback used to wake the UI event loop after a job is queued
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Create a marshal/pump pair owned by the calling thread
pub fn channel() -> (ChannelMarshal, UiPump) {
    build(None)
}

/// Create a marshal/pump pair that calls `waker` after each dispatch
pub fn channel_with_waker(waker: Waker) -> (ChannelMarshal, UiPump) {
    build(Some(waker))
}

fn build(waker: Option<Waker>) -> (ChannelMarshal, UiPump) {
    let ui_thread = std::thread::current().id();
    let (tx, rx) = unbounded();
    let closed = Arc::new(AtomicBool::new(false));
    (
        ChannelMarshal {
            ui_thread,
            sender: tx,
            waker,
            closed: closed.clone(),
        },
        UiPump {
            ui_thread,
            receiver: rx,
            closed,
        },
    )
}

/// Sending half: cloneable, shareable with any thread
#[derive(Clone)]
pub struct ChannelMarshal {
    ui_thread: ThreadId,
    sender: Sender<Job>,
    waker: Option<Waker>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for ChannelMarshal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMarshal")
            .field("ui_thread", &self.ui_thread)
            .field("queued", &self.sender.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ThreadMarshal for ChannelMarshal {
    fn is_ui_thread(&self) -> bool {
        std::thread::current().id() == self.ui_thread
    }

    fn dispatch(&self, job: Job) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|_| SessionError::UiContextClosed)?;
        if let Some(waker) = &self.waker {
            waker();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Receiving half: lives on the UI thread for the lifetime of the UI surface
///
/// Dropping the pump tears the UI context down. Jobs still queued are
/// dropped unrun and later dispatches fail with
/// [`SessionError::UiContextClosed`].
pub struct UiPump {
    ui_thread: ThreadId,
    receiver: Receiver<Job>,
    closed: Arc<AtomicBool>,
}

impl UiPump {
    /// Run every job queued so far, in FIFO order
    ///
    /// Returns the number of jobs run. Jobs queued by the jobs themselves
    /// are run in the same call. Refuses to run anything off the UI thread.
    pub fn pump(&self) -> usize {
        if !self.on_owner_thread() {
            tracing::warn!("UiPump::pump called off the UI thread; ignoring");
            return 0;
        }

        let mut count = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            count += 1;
        }
        count
    }

    /// Block pumping jobs until every [`ChannelMarshal`] clone is dropped
    pub fn run(&self) {
        if !self.on_owner_thread() {
            tracing::warn!("UiPump::run called off the UI thread; ignoring");
            return;
        }
        while let Ok(job) = self.receiver.recv() {
            job();
        }
        tracing::debug!("UI pump stopped: all marshals dropped");
    }

    /// Pump jobs for at most `duration`, returning the number run
    pub fn run_for(&self, duration: Duration) -> usize {
        if !self.on_owner_thread() {
            tracing::warn!("UiPump::run_for called off the UI thread; ignoring");
            return 0;
        }

        let deadline = Instant::now() + duration;
        let mut count = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(job) => {
                    job();
                    count += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return count;
                }
            }
        }
    }

    /// Number of jobs waiting to run
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    fn on_owner_thread(&self) -> bool {
        std::thread::current().id() == self.ui_thread
    }
}

impl Drop for UiPump {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
