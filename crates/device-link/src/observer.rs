//! Observer interface and notification delivery.
//!
//! A link reports to at most one [`ConnectionObserver`]. The link only keeps a
//! weak reference: whoever owns the observer decides how long it lives, and
//! notifications for an observer that is gone are silently dropped.
//!
//! Notifications are delivered on the link's dispatcher thread, in the order
//! the link produced them. Each callback gets a [`ConnectionHandle`], a weak
//! back-reference that can query or drive the link without keeping it alive.

use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::LinkError;
use crate::state::{ConnectionId, ConnectionState};
use device_link_core::logging::targets;

/// Receives lifecycle and data notifications from a device link.
///
/// Every method has a no-op default, so implementors only override what they
/// care about. Callbacks may arrive after the observer stopped caring about
/// the link; check relevance through the handle if that matters.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl ConnectionObserver for Printer {
///     fn on_data_received(&self, connection: &ConnectionHandle, data: &[u8]) {
///         println!("{} sent {} bytes", connection.id(), data.len());
///     }
/// }
/// ```
pub trait ConnectionObserver: Send + Sync + 'static {
    /// The link moved to `state`.
    fn on_state_changed(&self, connection: &ConnectionHandle, state: ConnectionState) {
        let _ = (connection, state);
    }

    /// The device sent `data`. Each call carries exactly one transport read.
    fn on_data_received(&self, connection: &ConnectionHandle, data: &[u8]) {
        let _ = (connection, data);
    }

    /// A connect attempt failed before the link was established.
    fn on_connect_failed(&self, connection: &ConnectionHandle, error: &LinkError) {
        let _ = (connection, error);
    }
}

/// Operations a handle can forward to its link, independent of the transport
/// type.
pub(crate) trait LinkControl: Send + Sync {
    fn state(&self) -> ConnectionState;
    fn connect(self: Arc<Self>);
    fn disconnect(&self);
    fn write_owned(self: Arc<Self>, data: Vec<u8>) -> BoxFuture<'static, bool>;
}

/// A non-owning reference to a device link.
///
/// Handles stay valid after the link is dropped: identity is still available,
/// [`state`](Self::state) reports `Disconnected` and writes fail.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    port: u32,
    link: Weak<dyn LinkControl>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: ConnectionId, port: u32, link: Weak<dyn LinkControl>) -> Self {
        Self { id, port, link }
    }

    /// Get the unique link ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the device port.
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Check if the link still exists.
    pub fn is_alive(&self) -> bool {
        self.link.strong_count() > 0
    }

    /// Current state of the link, `Disconnected` if it no longer exists.
    pub fn state(&self) -> ConnectionState {
        self.link
            .upgrade()
            .map_or(ConnectionState::Disconnected, |link| link.state())
    }

    /// Start connecting, see [`DeviceConnection::connect`](crate::DeviceConnection::connect).
    pub fn connect(&self) {
        if let Some(link) = self.link.upgrade() {
            link.connect();
        }
    }

    /// Disconnect, see [`DeviceConnection::disconnect`](crate::DeviceConnection::disconnect).
    pub fn disconnect(&self) {
        if let Some(link) = self.link.upgrade() {
            link.disconnect();
        }
    }

    /// Write to the device, see [`DeviceConnection::write`](crate::DeviceConnection::write).
    pub async fn write(&self, data: &[u8]) -> bool {
        match self.link.upgrade() {
            Some(link) => link.write_owned(data.to_vec()).await,
            None => false,
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("state", &self.state())
            .finish()
    }
}

/// What happened on a link.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    StateChanged(ConnectionState),
    DataReceived(Vec<u8>),
    ConnectFailed(LinkError),
}

/// A link event addressed to the observer, as queued on the dispatcher.
pub(crate) struct Notification {
    pub(crate) handle: ConnectionHandle,
    pub(crate) event: LinkEvent,
}

/// The swappable, non-owning observer registration.
pub(crate) type ObserverSlot = Arc<Mutex<Option<Weak<dyn ConnectionObserver>>>>;

/// Build the dispatcher sink that forwards notifications to whatever observer
/// is registered at delivery time.
pub(crate) fn observer_sink(slot: ObserverSlot) -> impl FnMut(Notification) + Send + 'static {
    move |Notification { handle, event }| {
        // Release the slot before calling out; observers may re-register.
        let observer = slot.lock().as_ref().and_then(Weak::upgrade);
        let Some(observer) = observer else {
            tracing::trace!(target: targets::DISPATCH, link = %handle.id(), ?event, "no observer, notification dropped");
            return;
        };

        match event {
            LinkEvent::StateChanged(state) => observer.on_state_changed(&handle, state),
            LinkEvent::DataReceived(data) => observer.on_data_received(&handle, &data),
            LinkEvent::ConnectFailed(error) => observer.on_connect_failed(&handle, &error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        calls: Mutex<Vec<String>>,
    }

    impl ConnectionObserver for Counter {
        fn on_state_changed(&self, _connection: &ConnectionHandle, state: ConnectionState) {
            self.calls.lock().push(format!("state:{state}"));
        }
    }

    fn dead_handle() -> ConnectionHandle {
        let link: Weak<dyn LinkControl> = Weak::<NoLink>::new();
        ConnectionHandle::new(ConnectionId::new(), 4242, link)
    }

    struct NoLink;

    impl LinkControl for NoLink {
        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
        fn connect(self: Arc<Self>) {}
        fn disconnect(&self) {}
        fn write_owned(self: Arc<Self>, _data: Vec<u8>) -> BoxFuture<'static, bool> {
            Box::pin(async { true })
        }
    }

    #[test]
    fn test_dead_handle_reports_disconnected() {
        let handle = dead_handle();
        assert_eq!(handle.port(), 4242);
        assert!(!handle.is_alive());
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        handle.disconnect();
        handle.connect();
    }

    #[tokio::test]
    async fn test_dead_handle_write_fails() {
        assert!(!dead_handle().write(b"ping").await);
    }

    #[test]
    fn test_default_callbacks_are_noops() {
        let slot: ObserverSlot = Arc::new(Mutex::new(None));
        let observer = Arc::new(Counter {
            calls: Mutex::new(Vec::new()),
        });
        let weak: Weak<dyn ConnectionObserver> = Arc::downgrade(&observer) as Weak<dyn ConnectionObserver>;
        *slot.lock() = Some(weak);

        let mut sink = observer_sink(slot);
        let handle = dead_handle();
        sink(Notification {
            handle: handle.clone(),
            event: LinkEvent::DataReceived(vec![1, 2, 3]),
        });
        sink(Notification {
            handle: handle.clone(),
            event: LinkEvent::ConnectFailed(LinkError::device_not_available("refused")),
        });
        sink(Notification {
            handle,
            event: LinkEvent::StateChanged(ConnectionState::Connecting),
        });

        assert_eq!(*observer.calls.lock(), vec!["state:Connecting".to_string()]);
    }

    #[test]
    fn test_sink_drops_events_for_dead_observer() {
        let slot: ObserverSlot = Arc::new(Mutex::new(None));
        let observer = Arc::new(Counter {
            calls: Mutex::new(Vec::new()),
        });
        let weak: Weak<dyn ConnectionObserver> = Arc::downgrade(&observer) as Weak<dyn ConnectionObserver>;
        *slot.lock() = Some(weak);
        drop(observer);

        let mut sink = observer_sink(slot);
        sink(Notification {
            handle: dead_handle(),
            event: LinkEvent::StateChanged(ConnectionState::Connected),
        });
    }
}
