//! apiprobe CLI
//!
//! Loads scenario and probe definitions, runs them through the harness and
//! reports the results.

pub mod commands;
pub mod output;
