//! Configuration for device links.

use std::time::Duration;

/// Settings shared by a link and its transport.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Host the device port is reachable on (usually a local forwarder).
    ///
    /// Read only by [`TcpTransport`](crate::TcpTransport); a custom transport
    /// passed to `DeviceConnection::with_transport` ignores it.
    pub host: String,
    /// Enable TCP_NODELAY (disable Nagle's algorithm). Read only by
    /// [`TcpTransport`](crate::TcpTransport).
    pub no_delay: bool,
    /// Size of the buffer each read fills. One read surfaces as one
    /// data-arrival notification of at most this many bytes.
    pub read_buffer_size: usize,
    /// Connection timeout. `None` waits for the transport indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Write timeout. `None` means no timeout.
    pub write_timeout: Option<Duration>,
    /// Name of the thread that delivers observer notifications.
    pub dispatcher_name: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            no_delay: true,
            read_buffer_size: 8192,
            connect_timeout: Some(Duration::from_secs(30)),
            write_timeout: None,
            dispatcher_name: "device-link-dispatch".to_string(),
        }
    }
}

impl LinkConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host to connect to.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set the read buffer size. Zero is bumped to one byte.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Disable connection timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect_timeout = None;
        self
    }

    /// Set the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the name of the notification thread.
    pub fn dispatcher_name(mut self, name: impl Into<String>) -> Self {
        self.dispatcher_name = name.into();
        self
    }

    /// Get the address string (host:port) for a device port.
    pub fn address(&self, port: u32) -> String {
        format!("{}:{}", self.host, port)
    }
}
