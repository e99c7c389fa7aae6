#![forbid(unsafe_code)]

pub mod agents;
pub mod bus;
pub mod config;
pub mod events;
pub mod performance;
pub mod runtime;
pub mod store;
pub mod telemetry;
