//! MARTIN: automated trading assistant for hourly Up-or-Down prediction markets on
//! crypto underliers. The binary in `main.rs` is a thin wiring layer over this library;
//! integration tests exercise the lifecycle through these same public modules.

pub mod cap;
pub mod chat;
pub mod config;
pub mod domain;
pub mod errors;
pub mod exchange;
pub mod execution;
pub mod logging;
pub mod orchestrator;
pub mod snapshot;
pub mod state_machine;
pub mod stats;
pub mod storage;
pub mod ta;
pub mod time_mode;
pub mod vault;
