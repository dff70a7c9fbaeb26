//! recovery-ops — operational tooling for the recovery-support app:
//! notification dispatch, event classification, TODO generation,
//! inbox monitoring and smoke tests.

pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod monitor;
pub mod notify;
pub mod smoke;
pub mod todos;
