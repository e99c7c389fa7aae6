#![forbid(unsafe_code)]

pub mod cycle;
pub mod lifecycle;
pub mod risk;
pub mod screen;
pub mod snapshot;
