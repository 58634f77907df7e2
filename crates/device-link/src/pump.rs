//! Inbound read loop for a connected link.

use device_link_core::logging::{span_names, targets};
use tokio::io::{AsyncReadExt, ReadHalf};
use tracing::Instrument;

use crate::connection::Link;
use crate::error::LinkError;
use crate::transport::Transport;

/// Read from `reader` until the stream ends, fails or stops being current.
///
/// Every successful read becomes exactly one data notification; bytes are
/// never merged or split across reads. End-of-stream and read errors both
/// take the link down.
pub(crate) async fn run<T: Transport>(link: &Link<T>, mut reader: ReadHalf<T::Stream>, generation: u64) {
    let span = tracing::debug_span!(target: targets::PUMP, span_names::PUMP, link = %link.id(), generation);

    async move {
        // A zero-length buffer would read as end-of-stream.
        let mut buffer = vec![0u8; link.config().read_buffer_size.max(1)];
        tracing::trace!(target: targets::PUMP, "pump started");

        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => {
                    link.fail_stream(generation, LinkError::data_stream("stream closed by device"));
                    break;
                }
                Ok(n) => {
                    if !link.deliver_data(generation, buffer[..n].to_vec()) {
                        break;
                    }
                }
                Err(e) => {
                    link.fail_stream(generation, LinkError::data_stream(e.to_string()));
                    break;
                }
            }
        }

        tracing::trace!(target: targets::PUMP, "pump stopped");
    }
    .instrument(span)
    .await
}
