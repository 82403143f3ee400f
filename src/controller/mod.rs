//! Upgrade controller
//!
//! The upgrade core (`sync`, `orchestrator`, `tier`) only talks to the
//! cluster through the [`platform::Platform`] trait.

pub mod builder;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod inspector;
pub mod observer;
pub mod orchestrator;
pub mod platform;
pub mod reconcile;
pub mod sync;
pub mod tier;
pub mod watchdog;

pub use reconcile::{reconcile, Context, ReconcileError};
