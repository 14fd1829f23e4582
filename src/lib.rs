//! Pharmacy agent: a WebSocket service that routes each caller, by phone,
//! to an informational agent for a known pharmacy or a registration agent
//! for an unknown one.
//!
//! Record lookups go through a TTL cache with single-flight fetches and
//! retry of transient upstream failures.

pub mod agent;
pub mod app;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod phone;
pub mod records;

pub use app::App;
pub use config::Config;
pub use error::{Error, Result};
