//! Daemon, socket protocol, and auto-start client.
//!
//! A long-lived single-process server bound to a per-workspace Unix
//! socket amortizes startup cost and serializes writes across concurrent
//! short-lived command invocations. Clients discover the socket, probe
//! health, and either dispatch over the wire or fall back to direct mode.

pub mod autostart;
pub mod client;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod server;
pub mod socket_path;
pub mod wire;

pub use client::DaemonClient;
pub use error::{DaemonError, Result};
pub use server::Daemon;
