//! `handover-core` – Offset-Tracking Mode Switcher
//!
//! Blends two independent position feeds into one continuous output stream
//! and lets the active feed change at runtime without a jump in the output.
//!
//! # Modules
//!
//! - [`switcher`] – [`SwitcherState`][switcher::SwitcherState]: the source
//!   cache, mode state and offset ledger, plus the per-tick output
//!   compositor.  Pure and synchronous; all I/O lives in
//!   `handover-middleware` and `handover-runtime`.

pub mod switcher;

pub use switcher::{SwitchOutcome, SwitcherState, TickReport};
