//! Core plumbing for device-link.
//!
//! This crate holds the pieces of device-link that know nothing about bytes or
//! transports:
//!
//! - [`dispatch`]: a dedicated thread that delivers events to a sink in the
//!   order they were produced
//! - [`logging`]: `tracing` target and span names shared by every crate in the
//!   workspace
//!
//! # Example
//!
//! ```
//! use device_link_core::{DispatcherConfig, EventDispatcher};
//!
//! let dispatcher = EventDispatcher::spawn(DispatcherConfig::with_name("demo"), |msg: String| {
//!     println!("{msg}");
//! })
//! .expect("spawn dispatcher");
//!
//! dispatcher.dispatch("hello".to_string());
//! ```

pub mod dispatch;
pub mod logging;

pub use dispatch::{DispatcherConfig, EventDispatcher};
pub use logging::PerfSpan;
