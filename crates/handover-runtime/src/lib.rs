//! `handover-runtime` – The dispatch loop
//!
//! Owns the [`SwitcherState`][handover_core::SwitcherState] and drives it at
//! a fixed cadence.
//!
//! # Modules
//!
//! - [`dispatch_loop`] – [`DispatchLoop`][dispatch_loop::DispatchLoop]:
//!   single-threaded cooperative loop.  Each cycle drains every pending
//!   source update and switch request from the event bus without blocking,
//!   then runs exactly one tick and publishes the blended output.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod dispatch_loop;
pub mod telemetry;

pub use dispatch_loop::{DispatchLoop, DispatchLoopConfig};
pub use telemetry::{TracerProviderGuard, init_tracing};
