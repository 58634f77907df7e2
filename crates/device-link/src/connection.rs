//! Device link with explicit state tracking and observer notifications.

use std::io;
use std::sync::{Arc, Weak};

use device_link_core::dispatch::{DispatcherConfig, EventDispatcher};
use device_link_core::logging::{span_names, targets};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::Instrument;

use crate::config::LinkConfig;
use crate::error::{ConstructionError, LinkError, Result};
use crate::observer::{
    ConnectionHandle, ConnectionObserver, LinkControl, LinkEvent, Notification, ObserverSlot,
    observer_sink,
};
use crate::pump;
use crate::state::{ConnectionId, ConnectionState};
use crate::transport::{TcpTransport, Transport};

/// Write side of an open stream. Writers queue on the async mutex, so at most
/// one write is in flight.
type SharedWriter<S> = Arc<tokio::sync::Mutex<WriteHalf<S>>>;

/// Mutable link state. Every field changes only under the link's lock.
struct LinkInner<S> {
    state: ConnectionState,
    /// Bumped whenever the current stream or connect attempt is abandoned.
    /// Results tagged with an older generation are discarded.
    generation: u64,
    /// The connect-then-pump task of the current attempt.
    task: Option<AbortHandle>,
    writer: Option<SharedWriter<S>>,
    /// Dropped on teardown. Writes of the current stream wait on a receiver
    /// and give up the write half as soon as the sender goes away.
    cancel: Option<watch::Sender<()>>,
    /// Runtime of the last successful spawn, used when `connect()` is called
    /// from a thread without one (such as an observer callback).
    runtime: Option<tokio::runtime::Handle>,
}

/// The shared state machine behind a [`DeviceConnection`].
pub(crate) struct Link<T: Transport> {
    id: ConnectionId,
    port: u32,
    config: LinkConfig,
    transport: Arc<T>,
    inner: Mutex<LinkInner<T::Stream>>,
    observer: ObserverSlot,
    dispatcher: EventDispatcher<Notification>,
    handle: ConnectionHandle,
}

impl<T: Transport> Link<T> {
    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn emit(&self, event: LinkEvent) {
        let notification = Notification {
            handle: self.handle.clone(),
            event,
        };
        if !self.dispatcher.dispatch(notification) {
            tracing::trace!(target: targets::CONNECTION, link = %self.id, "dispatcher stopped, notification dropped");
        }
    }

    /// Move to `next` and queue the matching notification. The caller holds
    /// the lock, so the notification is queued in transition order.
    fn set_state(&self, inner: &mut LinkInner<T::Stream>, next: ConnectionState) {
        debug_assert!(
            inner.state.can_transition_to(next),
            "illegal transition {} -> {}",
            inner.state,
            next
        );
        tracing::debug!(target: targets::CONNECTION, link = %self.id, from = %inner.state, to = %next, "state changed");
        inner.state = next;
        self.emit(LinkEvent::StateChanged(next));
    }

    /// Release the stream and stop the current task. Anything still running
    /// for the old generation becomes stale.
    fn teardown(&self, inner: &mut LinkInner<T::Stream>) {
        inner.generation = inner.generation.wrapping_add(1);
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        // Dropping the last reference to the write half closes the stream
        // together with the pump's read half.
        inner.writer = None;
        inner.cancel = None;
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.inner.lock();
        inner.generation == generation && inner.state == ConnectionState::Connected
    }

    fn start_connect(self: &Arc<Self>) {
        let (generation, runtime) = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                tracing::trace!(target: targets::CONNECTION, link = %self.id, state = %inner.state, "connect ignored");
                return;
            }

            inner.generation = inner.generation.wrapping_add(1);
            let generation = inner.generation;
            self.set_state(&mut inner, ConnectionState::Connecting);

            let runtime = tokio::runtime::Handle::try_current()
                .or_else(|e| inner.runtime.clone().ok_or(e));
            match runtime {
                Ok(runtime) => (generation, runtime),
                Err(e) => {
                    let error = LinkError::device_not_available(format!("no async runtime: {e}"));
                    self.fail_connect(&mut inner, error);
                    return;
                }
            }
        };

        // Spawn without the lock held: a runtime that has shut down drops the
        // task on the spot, and the guard then fails the attempt.
        let attempt = Attempt {
            link: self.clone(),
            generation,
        };
        let task = runtime.spawn(attempt.run());

        let mut inner = self.inner.lock();
        inner.runtime = Some(runtime);
        if inner.generation == generation && inner.state != ConnectionState::Disconnected {
            inner.task = Some(task.abort_handle());
        } else {
            task.abort();
        }
    }

    /// Connecting -> Disconnected with a connect-failure notification ahead of
    /// the state change.
    fn fail_connect(&self, inner: &mut LinkInner<T::Stream>, error: LinkError) {
        tracing::warn!(target: targets::CONNECTION, link = %self.id, port = self.port, %error, "connect failed");
        self.teardown(inner);
        inner.state = ConnectionState::Disconnected;
        self.emit(LinkEvent::ConnectFailed(error));
        self.emit(LinkEvent::StateChanged(ConnectionState::Disconnected));
    }

    async fn open_stream(&self) -> std::result::Result<T::Stream, LinkError> {
        let opening = self.transport.open(self.port);
        let opened = match self.config.connect_timeout {
            Some(limit) => match timeout(limit, opening).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(LinkError::device_not_available(format!(
                        "connect timed out after {limit:?}"
                    )));
                }
            },
            None => opening.await,
        };
        opened.map_err(|e| LinkError::device_not_available(e.to_string()))
    }

    /// Body of the per-attempt task: open the stream, then pump it.
    async fn run(self: Arc<Self>, generation: u64) {
        let span = tracing::debug_span!(target: targets::CONNECTION, span_names::CONNECT, link = %self.id, port = self.port);
        let opened = self.open_stream().instrument(span).await;

        let reader = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                tracing::trace!(target: targets::CONNECTION, link = %self.id, "stale connect result discarded");
                return;
            }

            match opened {
                Ok(stream) => {
                    let (reader, writer) = tokio::io::split(stream);
                    inner.writer = Some(Arc::new(tokio::sync::Mutex::new(writer)));
                    inner.cancel = Some(watch::channel(()).0);
                    self.set_state(&mut inner, ConnectionState::Connected);
                    reader
                }
                Err(error) => {
                    self.fail_connect(&mut inner, error);
                    return;
                }
            }
        };

        pump::run(&self, reader, generation).await;
    }

    /// Queue inbound bytes for the observer. Returns `false` once the stream
    /// the bytes came from is no longer current.
    pub(crate) fn deliver_data(&self, generation: u64, data: Vec<u8>) -> bool {
        let inner = self.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connected {
            return false;
        }
        tracing::trace!(target: targets::PUMP, link = %self.id, len = data.len(), "data received");
        self.emit(LinkEvent::DataReceived(data));
        true
    }

    /// Connected -> Disconnected after a read/write failure on the stream
    /// identified by `generation`.
    pub(crate) fn fail_stream(&self, generation: u64, error: LinkError) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connected {
            return;
        }
        self.drop_stream(&mut inner, error);
    }

    fn drop_stream(&self, inner: &mut LinkInner<T::Stream>, error: LinkError) {
        tracing::warn!(target: targets::CONNECTION, link = %self.id, %error, "stream error, disconnecting");
        self.teardown(inner);
        self.set_state(inner, ConnectionState::Disconnected);
    }

    /// The task of `generation` went away without settling its attempt,
    /// e.g. because its runtime shut down.
    fn abandon(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        match inner.state {
            ConnectionState::Connecting => {
                let error = LinkError::device_not_available("connect task stopped before completing");
                self.fail_connect(&mut inner, error);
            }
            ConnectionState::Connected => {
                self.drop_stream(&mut inner, LinkError::data_stream("stream task stopped"));
            }
            ConnectionState::Disconnected => {}
        }
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Disconnected {
            return;
        }
        tracing::debug!(target: targets::CONNECTION, link = %self.id, state = %inner.state, "disconnecting");
        self.teardown(&mut inner);
        self.set_state(&mut inner, ConnectionState::Disconnected);
    }

    async fn write(&self, data: &[u8]) -> bool {
        let (writer, mut cancelled, generation) = {
            let inner = self.inner.lock();
            match (&inner.writer, &inner.cancel, inner.state) {
                (Some(writer), Some(cancel), ConnectionState::Connected) => {
                    (writer.clone(), cancel.subscribe(), inner.generation)
                }
                _ => return false,
            }
        };

        if data.is_empty() {
            return true;
        }

        let writing = async {
            let mut writer = writer.lock().await;
            // The stream may have been torn down while this write was queued.
            if !self.is_current(generation) {
                return None;
            }
            let written = match self.config.write_timeout {
                Some(limit) => match timeout(limit, write_all_flush(&mut *writer, data)).await {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("write timed out after {limit:?}"),
                    )),
                },
                None => write_all_flush(&mut *writer, data).await,
            };
            Some(written)
        };

        let span = tracing::trace_span!(target: targets::CONNECTION, span_names::WRITE, link = %self.id, len = data.len());
        let written = tokio::select! {
            written = writing.instrument(span) => written,
            // Only resolves once teardown drops the sender.
            _ = cancelled.changed() => {
                tracing::debug!(target: targets::CONNECTION, link = %self.id, "write abandoned by disconnect");
                None
            }
        };
        drop(writer);

        match written {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                self.fail_stream(generation, LinkError::data_stream(e.to_string()));
                false
            }
            None => false,
        }
    }
}

/// Owns one connect attempt's task. However the task ends, dropping the
/// attempt settles a generation that is still current.
struct Attempt<T: Transport> {
    link: Arc<Link<T>>,
    generation: u64,
}

impl<T: Transport> Attempt<T> {
    async fn run(self) {
        self.link.clone().run(self.generation).await;
    }
}

impl<T: Transport> Drop for Attempt<T> {
    fn drop(&mut self) {
        self.link.abandon(self.generation);
    }
}

async fn write_all_flush<S: tokio::io::AsyncWrite>(
    writer: &mut WriteHalf<S>,
    data: &[u8],
) -> io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}

impl<T: Transport> LinkControl for Link<T> {
    fn state(&self) -> ConnectionState {
        Link::state(self)
    }

    fn connect(self: Arc<Self>) {
        self.start_connect();
    }

    fn disconnect(&self) {
        self.stop();
    }

    fn write_owned(self: Arc<Self>, data: Vec<u8>) -> BoxFuture<'static, bool> {
        async move { self.write(&data).await }.boxed()
    }
}

/// Highest port number a link accepts.
pub const MAX_PORT: u32 = u16::MAX as u32;

/// Check that `port` names a usable endpoint.
fn validate_port(port: u32) -> Result<u32> {
    if port == 0 || port > MAX_PORT {
        return Err(ConstructionError::InvalidPort(port));
    }
    Ok(port)
}

/// A point-to-point byte stream to a device port.
///
/// The link moves between three states:
///
/// ```text
/// Disconnected --connect()--> Connecting --opened--> Connected
///      ^                          |                      |
///      +---- failed / disconnect -+-- disconnect/error --+
/// ```
///
/// `connect()` and `disconnect()` return immediately; outcomes arrive at the
/// registered [`ConnectionObserver`] on a dedicated notification thread, in the
/// order they happened. Inbound bytes are read by a background task and
/// delivered one read at a time. Writes are accepted only while connected.
///
/// Dropping the connection disconnects it first.
///
/// # Example
///
/// ```ignore
/// let link = DeviceConnection::new(2345)?;
/// link.set_observer(&observer);
/// link.connect();
///
/// // later, once connected
/// if !link.write(b"ping").await {
///     println!("not connected");
/// }
/// ```
pub struct DeviceConnection<T: Transport = TcpTransport> {
    link: Arc<Link<T>>,
}

impl DeviceConnection<TcpTransport> {
    /// Create a link to `port` over TCP with default settings.
    pub fn new(port: u32) -> Result<Self> {
        Self::with_config(port, LinkConfig::default())
    }

    /// Create a link to `port` over TCP with the given settings.
    pub fn with_config(port: u32, config: LinkConfig) -> Result<Self> {
        let transport = TcpTransport::new(&config);
        Self::with_transport(port, config, transport)
    }
}

impl<T: Transport> DeviceConnection<T> {
    /// Create a link to `port` over a custom transport.
    ///
    /// The transport brings its own addressing, so `config.host` and
    /// `config.no_delay` play no part; the remaining settings still apply.
    /// Fails if the port is invalid or the notification thread cannot start.
    pub fn with_transport(port: u32, config: LinkConfig, transport: T) -> Result<Self> {
        let port = validate_port(port)?;
        let id = ConnectionId::new();

        let observer: ObserverSlot = Arc::new(Mutex::new(None));
        let dispatcher = EventDispatcher::spawn(
            DispatcherConfig::with_name(config.dispatcher_name.clone()),
            observer_sink(observer.clone()),
        )
        .map_err(ConstructionError::Dispatcher)?;

        let link = Arc::new_cyclic(|weak: &Weak<Link<T>>| {
            let control: Weak<dyn LinkControl> = weak.clone();
            Link {
                id,
                port,
                config,
                transport: Arc::new(transport),
                inner: Mutex::new(LinkInner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    task: None,
                    writer: None,
                    cancel: None,
                    runtime: None,
                }),
                observer,
                dispatcher,
                handle: ConnectionHandle::new(id, port, control),
            }
        });

        tracing::debug!(target: targets::CONNECTION, link = %id, port, "link created");
        Ok(Self { link })
    }

    /// Get the device port.
    pub fn port(&self) -> u32 {
        self.link.port
    }

    /// Get the unique link ID.
    pub fn id(&self) -> ConnectionId {
        self.link.id
    }

    /// Get the link settings.
    pub fn config(&self) -> &LinkConfig {
        &self.link.config
    }

    /// Get the transport this link opens streams with.
    pub fn transport(&self) -> &T {
        &self.link.transport
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Check if the link is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Get a non-owning handle to this link.
    pub fn handle(&self) -> ConnectionHandle {
        self.link.handle.clone()
    }

    /// Register the observer, replacing any previous one.
    ///
    /// Only a weak reference is kept.
    pub fn set_observer<O: ConnectionObserver>(&self, observer: &Arc<O>) {
        let weak: Weak<dyn ConnectionObserver> = Arc::downgrade(observer) as Weak<dyn ConnectionObserver>;
        *self.link.observer.lock() = Some(weak);
    }

    /// Unregister the observer. Later notifications are dropped.
    pub fn clear_observer(&self) {
        *self.link.observer.lock() = None;
    }

    /// Start connecting to the device.
    ///
    /// If the link is already connected or connecting, this is a no-op.
    /// Must be called from within a tokio runtime; otherwise the attempt fails
    /// immediately with [`ErrorKind::DeviceNotAvailable`](crate::ErrorKind::DeviceNotAvailable).
    #[tracing::instrument(skip_all, target = "device_link::connection", level = "debug", fields(link = %self.link.id))]
    pub fn connect(&self) {
        self.link.start_connect();
    }

    /// Disconnect from the device.
    ///
    /// Cancels a pending connect attempt. No-op when already disconnected.
    #[tracing::instrument(skip_all, target = "device_link::connection", level = "debug", fields(link = %self.link.id))]
    pub fn disconnect(&self) {
        self.link.stop();
    }

    /// Send `data` to the device.
    ///
    /// Returns `true` once every byte has been written and flushed. Returns
    /// `false` right away when not connected. A failed write also disconnects
    /// the link. An empty payload succeeds without touching the stream.
    pub async fn write(&self, data: &[u8]) -> bool {
        self.link.write(data).await
    }
}

impl<T: Transport> Drop for DeviceConnection<T> {
    fn drop(&mut self) {
        self.link.stop();
    }
}

impl<T: Transport> std::fmt::Debug for DeviceConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("id", &self.link.id)
            .field("port", &self.link.port)
            .field("state", &self.state())
            .field("pending_events", &self.link.dispatcher.pending())
            .finish()
    }
}
