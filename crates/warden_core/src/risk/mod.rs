//! Risk circuit breakers and the durable safety state behind them
//! (CONTRACT.md §3).

pub mod gate;
pub mod state;
