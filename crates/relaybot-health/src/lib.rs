//! relaybot-health - liveness endpoint for relaybot
//!
//! Serves a minimal HTTP surface next to the chat gateway connection so that
//! hosting platforms can tell the process is running.

pub mod server;

pub use server::HealthServer;
