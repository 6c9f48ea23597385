//! `pipewatch` — a log-driven watchdog that raises alerts when a monitored
//! agent's node sequence stalls, derails, or gets reset by a human.

pub mod config;
pub mod engine;
pub mod event;
pub mod node_parser;
pub mod sink;
pub mod state_machine;
pub mod tailer;
