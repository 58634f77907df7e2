//! Point-to-point byte links to devices.
//!
//! A [`DeviceConnection`] is a stream to a numbered port on a device, with
//! explicit connection state and observer notifications:
//!
//! - **State machine**: `Disconnected`, `Connecting`, `Connected`, with every
//!   change reported exactly once
//! - **Inbound data**: a background task reads the stream and reports each read
//!   as one notification
//! - **Writes**: accepted only while connected; a failed write drops the link
//! - **Transports**: plain TCP out of the box, or any [`Transport`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use device_link::{ConnectionHandle, ConnectionObserver, ConnectionState, DeviceConnection};
//!
//! struct Logger;
//!
//! impl ConnectionObserver for Logger {
//!     fn on_state_changed(&self, connection: &ConnectionHandle, state: ConnectionState) {
//!         println!("{} is now {}", connection.id(), state);
//!     }
//!
//!     fn on_data_received(&self, _connection: &ConnectionHandle, data: &[u8]) {
//!         println!("received {} bytes", data.len());
//!     }
//! }
//!
//! let observer = Arc::new(Logger);
//! let link = DeviceConnection::new(2345)?;
//! link.set_observer(&observer);
//! link.connect();
//!
//! // once connected
//! link.write(b"hello").await;
//! ```
//!
//! # Errors
//!
//! Construction fails with [`ConstructionError`] for an invalid port. After
//! that, failures are only reported through the observer: a failed connect
//! arrives as [`ConnectionObserver::on_connect_failed`] with
//! [`ErrorKind::DeviceNotAvailable`], while a broken stream shows up as a
//! change to [`ConnectionState::Disconnected`].

mod config;
mod connection;
mod error;
mod observer;
mod pump;
mod state;
mod transport;

pub use config::LinkConfig;
pub use connection::{DeviceConnection, MAX_PORT};
pub use error::{ConstructionError, ErrorKind, LinkError, Result};
pub use observer::{ConnectionHandle, ConnectionObserver};
pub use state::{ConnectionId, ConnectionState};
pub use transport::{TcpTransport, Transport};
