//! Client-side controllers for the Sokoni marketplace: contact disclosure,
//! conversation sync and reports, written against the [`Gateway`] port.
//!
//! [`Gateway`]: gateway::Gateway

pub mod context;
pub mod disclosure;
pub mod error;
pub mod gateway;
pub mod masking;
pub mod reports;
pub mod sync;

#[cfg(test)]
mod testing;
