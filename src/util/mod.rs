//! Utility types shared by the server and the buyer binaries.
//!
//! - [`money_amount`] - Human-readable price parsing and wei conversion
//! - [`sig_down`] - Graceful shutdown signal handling
//! - [`telemetry`] - Tracing subscriber and optional OpenTelemetry setup
//! - [`timestamp`] - Unix timestamps for listings and settlements

pub mod money_amount;
pub mod sig_down;
pub mod telemetry;
pub mod timestamp;

pub use money_amount::*;
pub use sig_down::*;
pub use telemetry::*;
pub use timestamp::*;
