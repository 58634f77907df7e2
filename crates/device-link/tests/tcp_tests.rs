//! Tests for links over the TCP transport.

use std::sync::Arc;
use std::time::Duration;

use device_link::{
    ConnectionHandle, ConnectionObserver, ConnectionState, ConstructionError, DeviceConnection,
    ErrorKind, LinkConfig, LinkError,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Default)]
struct Events {
    states: Mutex<Vec<ConnectionState>>,
    received: Mutex<Vec<u8>>,
    failures: Mutex<Vec<ErrorKind>>,
}

impl ConnectionObserver for Events {
    fn on_state_changed(&self, _connection: &ConnectionHandle, state: ConnectionState) {
        self.states.lock().push(state);
    }

    fn on_data_received(&self, _connection: &ConnectionHandle, data: &[u8]) {
        self.received.lock().extend_from_slice(data);
    }

    fn on_connect_failed(&self, _connection: &ConnectionHandle, error: &LinkError) {
        self.failures.lock().push(error.kind());
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_port_zero_is_rejected() {
    let result = DeviceConnection::new(0);
    assert!(matches!(result, Err(ConstructionError::InvalidPort(0))));
}

#[test]
fn test_port_above_range_is_rejected() {
    let result = DeviceConnection::new(65_536);
    assert!(matches!(result, Err(ConstructionError::InvalidPort(65_536))));
}

#[test]
fn test_config_reaches_transport() {
    let config = LinkConfig::new().host("localhost").no_delay(false);
    let link = DeviceConnection::with_config(2345, config).unwrap();
    assert_eq!(link.transport().host(), "localhost");
    assert_eq!(link.config().address(link.port()), "localhost:2345");
}

#[tokio::test]
async fn test_tcp_round_trip() {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = u32::from(listener.local_addr().unwrap().port());

    let link = DeviceConnection::new(port).unwrap();
    let events = Arc::new(Events::default());
    link.set_observer(&events);

    link.connect();
    let (mut device, _) = listener.accept().await.unwrap();

    for _ in 0..100 {
        if link.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(link.is_connected());

    // Device to host
    device.write_all(b"Hello, host!").await.unwrap();
    for _ in 0..100 {
        if events.received.lock().len() >= 12 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(&*events.received.lock(), b"Hello, host!");

    // Host to device
    assert!(link.write(b"Hello, device!").await);
    let mut buf = [0u8; 14];
    device.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"Hello, device!");

    // Device hangs up
    drop(device);
    for _ in 0..100 {
        if events.states.lock().last() == Some(&ConnectionState::Disconnected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(
        *events.states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
    assert!(events.failures.lock().is_empty());
    assert!(!link.write(b"gone").await);
}

#[tokio::test]
async fn test_no_listener_fails_to_connect() {
    init_tracing();

    // Reserve a port, then free it so nothing is listening there.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        u32::from(listener.local_addr().unwrap().port())
    };

    let link = DeviceConnection::new(port).unwrap();
    let events = Arc::new(Events::default());
    link.set_observer(&events);
    link.connect();

    for _ in 0..200 {
        if events.states.lock().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(
        *events.states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Disconnected]
    );
    assert_eq!(*events.failures.lock(), vec![ErrorKind::DeviceNotAvailable]);
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_closes_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = u32::from(listener.local_addr().unwrap().port());

    let link = DeviceConnection::new(port).unwrap();
    link.connect();
    let (mut device, _) = listener.accept().await.unwrap();

    for _ in 0..100 {
        if link.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(link.is_connected());

    link.disconnect();
    assert_eq!(link.state(), ConnectionState::Disconnected);

    let mut buf = [0u8; 4];
    let n = tokio::time::timeout(Duration::from_secs(2), device.read(&mut buf))
        .await
        .expect("socket closed promptly")
        .unwrap_or(0);
    assert_eq!(n, 0);
}
