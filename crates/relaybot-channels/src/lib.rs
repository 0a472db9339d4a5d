//! Chat platform adapters for relaybot
//!
//! Each adapter connects to its platform's gateway, feeds inbound messages to a
//! [`relaybot_core::MessageRouter`] and implements [`relaybot_core::ChatGateway`]
//! for replies.

pub mod discord;

pub use discord::{DiscordGateway, DiscordSender};
