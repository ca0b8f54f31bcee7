//! Hardware-independent core library for the breeze wind station
//!
//! This crate contains the power duty-cycling logic of a battery and solar
//! powered wind station: the sleep-aware clock, the deep-sleep state machine,
//! serial frame capture for WS80/WS85 sensors, pulse integration for the
//! Davis 6410, the wind history ring and the planner that decides how long
//! to sleep next. [`scheduler::Scheduler`] ties them into the main loop.
//!
//! It is `#![no_std]` without `alloc`, so it compiles for the station MCU and
//! for desktop hosts (the simulator and tests). Hardware is reached only
//! through the traits in [`hal`].

#![no_std]

pub mod acquisition;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod error;
pub mod hal;
pub mod planner;
pub mod power;
pub mod pulse;
pub mod scheduler;
pub mod sleep;
pub mod storage;

#[cfg(test)]
mod testing;

pub use clock::{Millis, VirtualClock};
pub use config::StationConfig;
pub use error::Error;
pub use scheduler::{PollOutcome, Scheduler};
