//! Stochastic time tracker for the terminal. Samples what you're doing at
//! random-feeling moments, keeps every answer in a plain-text log you can
//! read and grep, and mirrors tagged time to a goal-tracking service.
//!

pub mod cli;
pub mod fs;
pub mod log;
pub mod model;
pub mod remote;
pub mod settings;
pub mod utils;
