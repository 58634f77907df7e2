//! Ordered event delivery on a dedicated background thread.
//!
//! An [`EventDispatcher`] owns a single thread with its own FIFO queue. Events
//! handed to [`dispatch`](EventDispatcher::dispatch) are delivered to the sink
//! closure one at a time, in exactly the order they were enqueued. Enqueueing
//! never blocks, so producers (async I/O tasks, caller threads holding a state
//! lock) are decoupled from whatever the sink does.
//!
//! # Example
//!
//! ```
//! use device_link_core::dispatch::{DispatcherConfig, EventDispatcher};
//!
//! let dispatcher = EventDispatcher::spawn(DispatcherConfig::default(), |event: u32| {
//!     println!("got {event}");
//! })
//! .expect("spawn dispatcher");
//!
//! dispatcher.dispatch(1);
//! dispatcher.dispatch(2);
//!
//! // Both events are still delivered before the thread exits.
//! dispatcher.shutdown();
//! ```

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::logging::{PerfSpan, targets};

/// Configuration for the dispatcher thread.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name for the dispatcher thread.
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "device-link-dispatch".to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Items travelling through the dispatcher queue.
enum Envelope<E> {
    Event(E),
    Shutdown,
}

/// State shared between the handle and the dispatcher thread.
struct DispatcherState {
    running: AtomicBool,
    pending: AtomicUsize,
}

/// A dedicated thread that delivers events to a sink in FIFO order.
///
/// Dropping the dispatcher requests shutdown; events already queued are still
/// delivered before the thread exits. The thread is never joined, so it is
/// safe to drop the last handle from inside the sink itself.
pub struct EventDispatcher<E: Send + 'static> {
    sender: Sender<Envelope<E>>,
    state: Arc<DispatcherState>,
}

impl<E: Send + 'static> EventDispatcher<E> {
    /// Spawn the dispatcher thread.
    ///
    /// Fails only if the operating system refuses to create the thread.
    pub fn spawn<F>(config: DispatcherConfig, sink: F) -> io::Result<Self>
    where
        F: FnMut(E) + Send + 'static,
    {
        let (sender, receiver) = unbounded();
        let state = Arc::new(DispatcherState {
            running: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
        });

        let thread_state = state.clone();
        // Detached: the thread exits on its own once the queue drains.
        thread::Builder::new().name(config.name).spawn(move || {
            dispatch_loop(receiver, &thread_state, sink);
            thread_state.running.store(false, Ordering::Release);
        })?;

        Ok(Self { sender, state })
    }

    /// Queue an event for delivery.
    ///
    /// Returns `false` if the dispatcher has already shut down, in which case
    /// the event is dropped.
    pub fn dispatch(&self, event: E) -> bool {
        if !self.is_running() {
            return false;
        }

        self.state.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Envelope::Event(event)).is_err() {
            self.state.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!(target: targets::DISPATCH, "dispatcher gone, event dropped");
            return false;
        }
        true
    }

    /// Check if the dispatcher thread is still running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Number of events queued but not yet delivered.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Request shutdown after all queued events have been delivered.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Envelope::Shutdown);
    }
}

impl<E: Send + 'static> Drop for EventDispatcher<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<E: Send + 'static> std::fmt::Debug for EventDispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}

fn dispatch_loop<E, F>(receiver: Receiver<Envelope<E>>, state: &DispatcherState, mut sink: F)
where
    F: FnMut(E),
{
    while let Ok(envelope) = receiver.recv() {
        match envelope {
            Envelope::Event(event) => {
                let _span = PerfSpan::new("dispatch_event");
                // A panicking sink must not take the queue down with it.
                if panic::catch_unwind(AssertUnwindSafe(|| sink(event))).is_err() {
                    tracing::error!(target: targets::DISPATCH, "event sink panicked");
                }
                state.pending.fetch_sub(1, Ordering::AcqRel);
            }
            Envelope::Shutdown => break,
        }
    }
    tracing::trace!(target: targets::DISPATCH, "dispatcher thread exiting");
}
