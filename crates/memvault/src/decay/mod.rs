//! Importance decay
//!
//! Records that go unused lose importance on a fixed schedule. The curve lives
//! in [`policy`] as pure functions; [`scheduler`] applies it through the
//! coordinator so every change lands in the audit trail with actor
//! `scheduler`.

pub mod policy;
pub mod scheduler;

pub use policy::{DecayOutcome, DecayPolicy, decayed_importance};
pub use scheduler::{DecayHandle, DecayReport, DecayScheduler};
