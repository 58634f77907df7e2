//! Logging facilities for device-link.
//!
//! device-link uses the `tracing` crate for instrumentation. Every event is
//! emitted with one of the explicit targets below so that applications can
//! filter a single subsystem:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("device_link::pump=trace,device_link::connection=debug")
//!     .init();
//! ```

/// Span names used throughout device-link for tracing.
///
/// These constants can be used to filter traces for specific operations.
pub mod span_names {
    /// A connect attempt, from `connect()` until the transport resolves.
    pub const CONNECT: &str = "device_link::connect";
    /// The inbound read loop of a connected link.
    pub const PUMP: &str = "device_link::pump";
    /// A single outbound write.
    pub const WRITE: &str = "device_link::write";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Event dispatcher thread.
    pub const DISPATCH: &str = "device_link_core::dispatch";
    /// Connection state machine.
    pub const CONNECTION: &str = "device_link::connection";
    /// Inbound data pump.
    pub const PUMP: &str = "device_link::pump";
    /// Transport open/close.
    pub const TRANSPORT: &str = "device_link::transport";
}

/// A guard that measures an operation for profiling.
///
/// The span stays entered until the guard is dropped.
///
/// # Example
///
/// ```
/// use device_link_core::logging::PerfSpan;
///
/// {
///     let _span = PerfSpan::new("open_transport");
///     // timed work
/// }
/// ```
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "device_link::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_are_namespaced() {
        for target in [
            targets::DISPATCH,
            targets::CONNECTION,
            targets::PUMP,
            targets::TRANSPORT,
        ] {
            assert!(target.starts_with("device_link"));
        }
    }

    #[test]
    fn test_perf_span() {
        // Just ensure it doesn't panic without a subscriber
        let _span = PerfSpan::new("test_operation");
    }
}
