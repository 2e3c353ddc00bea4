//! Request gate for provider-side routes.
//!
//! See [`PaymentGate`].

pub mod error;
pub mod gate;

pub use error::GateError;
pub use gate::{PaymentGate, PaymentGateService};
