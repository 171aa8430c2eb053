//! UI thread and listener helpers

use echem_session::marshal::{self, ChannelMarshal, ThreadMarshal};
use echem_session::session::{ConnectionState, MeasurementSession, SessionEvent};
use echem_session::Subscription;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// A dedicated thread playing the UI event loop
///
/// The pump is created on that thread, so it is the marshal's UI thread.
pub struct UiThread {
    marshal: ChannelMarshal,
    thread_id: ThreadId,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UiThread {
    pub fn spawn() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = thread::Builder::new()
            .name("test-ui".to_string())
            .spawn(move || {
                let (marshal, pump) = marshal::channel();
                tx.send((marshal, thread::current().id()))
                    .expect("test harness gone");
                while !flag.load(Ordering::SeqCst) {
                    pump.run_for(Duration::from_millis(5));
                }
                pump.pump();
            })
            .expect("failed to spawn UI thread");

        let (marshal, thread_id) = rx.recv().expect("UI thread did not start");
        Self {
            marshal,
            thread_id,
            stop,
            handle: Some(handle),
        }
    }

    pub fn marshal(&self) -> Arc<dyn ThreadMarshal> {
        Arc::new(self.marshal.clone())
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Records every session event together with the thread it arrived on
pub struct Recorder {
    events: Arc<Mutex<Vec<(SessionEvent, ThreadId)>>>,
    _subscription: Subscription,
}

impl Recorder {
    pub fn attach(session: &MeasurementSession) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = session.subscribe(move |event| {
            sink.lock()
                .unwrap()
                .push((event.clone(), thread::current().id()));
        });
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.events.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    /// Target states of all recorded transitions, in delivery order
    pub fn transitions(&self) -> Vec<ConnectionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|(e, _)| predicate(e)).count()
    }
}
