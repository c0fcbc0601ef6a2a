//! fleetlink - real-time telemetry and command distribution core
//!
//! - [`hub`]: channel fan-out to live subscribers
//! - [`bridge`]: broker session, command publishing, inbound dispatch
//! - [`sessions`]: per-device recording sessions gating persistence
//! - [`telemetry`]: ingest, buffering and batched persistence
//! - [`jobs`]: sequential background jobs with streamed progress

pub mod app;
pub mod arguments;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod errors;
pub mod hub;
pub mod jobs;
pub mod logger;
pub mod services;
pub mod sessions;
pub mod storage;
pub mod telemetry;
#[cfg(feature = "web")]
pub mod webserver;

#[cfg(test)]
mod tests;
