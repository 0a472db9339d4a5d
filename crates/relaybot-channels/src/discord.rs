//! Discord gateway adapter using Serenity

use anyhow::{Result, anyhow};
use relaybot_core::delivery::ChatGateway;
use relaybot_core::router::MessageRouter;
use relaybot_core::types::{DeliveryMode, InboundMessage, OutboundResponse};
use serenity::{
    async_trait, gateway::GatewayError, http::Http, model::gateway::Ready, model::prelude::*,
    prelude::*,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Discord's maximum message length in characters
const DISCORD_MAX_LENGTH: usize = 2000;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Type key for the router that handles every inbound message
struct RouterKey;

impl TypeMapKey for RouterKey {
    type Value = Arc<MessageRouter>;
}

/// Type key for the bot's own user id, recorded on ready
struct BotUserId;

impl TypeMapKey for BotUserId {
    type Value = UserId;
}

/// Event handler for Discord messages
struct DiscordHandler;

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn message(&self, ctx: Context, msg: Message) {
        let data = ctx.data.read().await;
        let router = match data.get::<RouterKey>() {
            Some(router) => router.clone(),
            None => {
                error!("Router not initialized in TypeMap");
                return;
            }
        };
        let bot_id = data.get::<BotUserId>().copied();
        drop(data); // Release the lock before the completion call

        let inbound = InboundMessage {
            id: msg.id.to_string(),
            author_id: msg.author.id.to_string(),
            author_name: match msg.author.discriminator {
                Some(d) => format!("{}#{:04}", msg.author.name, d),
                None => msg.author.name.clone(),
            },
            channel_id: msg.channel_id.to_string(),
            content: msg.content.clone(),
            is_from_self: bot_id == Some(msg.author.id),
        };

        router.handle(inbound).await;
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is now running!", ready.user.name);
        ctx.data.write().await.insert::<BotUserId>(ready.user.id);
    }
}

/// Discord gateway connection
pub struct DiscordGateway {
    token: String,
    http: Arc<RwLock<Option<Arc<Http>>>>,
}

impl std::fmt::Debug for DiscordGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordGateway")
            .field("token", &"***")
            .finish()
    }
}

impl DiscordGateway {
    /// Create a new Discord gateway for the given bot token
    pub fn new(token: String) -> Self {
        Self {
            token,
            http: Arc::new(RwLock::new(None)),
        }
    }

    /// Intents the bot needs: guild and direct messages, with message content
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
    }

    /// Send handle for the router. Usable once [`DiscordGateway::start`] has built the client.
    pub fn sender(&self) -> Arc<DiscordSender> {
        Arc::new(DiscordSender {
            http: self.http.clone(),
        })
    }

    /// Connect in a background task, reconnecting with backoff until cancelled
    /// or a fatal gateway error occurs
    pub fn start(&self, router: Arc<MessageRouter>, cancel: CancellationToken) -> JoinHandle<()> {
        info!("Starting Discord gateway");

        let token = self.token.clone();
        let http_arc = self.http.clone();

        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            let mut retry_count = 0;

            loop {
                retry_count += 1;
                info!("Discord client starting (attempt #{})", retry_count);

                let mut client = match Client::builder(&token, Self::intents())
                    .event_handler(DiscordHandler)
                    .await
                {
                    Ok(c) => c,
                    Err(e) => {
                        if is_fatal_gateway_error(&e) {
                            log_fatal(&e);
                            break;
                        }
                        error!("Failed to create Discord client: {}", e);
                        if !wait_or_cancel(&cancel, &mut backoff).await {
                            break;
                        }
                        continue;
                    }
                };

                client.data.write().await.insert::<RouterKey>(router.clone());
                *http_arc.write().await = Some(client.http.clone());

                let shard_manager = client.shard_manager.clone();
                tokio::select! {
                    result = client.start() => match result {
                        Ok(()) => {
                            info!("Discord client stopped cleanly");
                            break;
                        }
                        Err(e) => {
                            if is_fatal_gateway_error(&e) {
                                log_fatal(&e);
                                break;
                            }
                            error!("Discord client error: {}", e);
                            if !wait_or_cancel(&cancel, &mut backoff).await {
                                break;
                            }
                        }
                    },
                    _ = cancel.cancelled() => {
                        info!("Shutting down Discord shards");
                        shard_manager.shutdown_all().await;
                        break;
                    }
                }
            }

            info!("Discord gateway task exiting");
        })
    }
}

/// Sends responses through the Discord REST API
pub struct DiscordSender {
    http: Arc<RwLock<Option<Arc<Http>>>>,
}

#[async_trait]
impl ChatGateway for DiscordSender {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, response: OutboundResponse) -> Result<()> {
        let http = self
            .http
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("Discord gateway not started yet"))?;

        let channel_id = match response.delivery {
            DeliveryMode::Public => ChannelId::new(parse_id(&response.channel_id)?),
            DeliveryMode::Private => {
                let user_id = UserId::new(parse_id(&response.author_id)?);
                let dm = user_id
                    .create_dm_channel(&http)
                    .await
                    .map_err(|e| anyhow!("Failed to open DM channel with {}: {}", user_id, e))?;
                dm.id
            }
        };

        let chunks = split_message(&response.content);
        if chunks.len() > 1 {
            debug!(
                "Message split into {} chunks due to Discord's character limit",
                chunks.len()
            );
        }

        for (i, chunk) in chunks.iter().enumerate() {
            channel_id
                .say(&http, chunk)
                .await
                .map_err(|e| anyhow!("Failed to send Discord message chunk {}: {}", i + 1, e))?;

            // Small delay between chunks to keep them in order
            if i + 1 < chunks.len() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        debug!(
            "Discord {} message sent to channel {} ({} chunk(s))",
            response.delivery,
            channel_id,
            chunks.len()
        );
        Ok(())
    }
}

fn parse_id(raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| anyhow!("Invalid Discord id '{}'", raw))
}

/// Sleep for the current backoff, doubling it for next time.
/// Returns false if cancelled while waiting.
async fn wait_or_cancel(cancel: &CancellationToken, backoff: &mut Duration) -> bool {
    warn!("Retrying in {:?}...", backoff);
    let proceed = tokio::select! {
        _ = tokio::time::sleep(*backoff) => true,
        _ = cancel.cancelled() => false,
    };
    *backoff = (*backoff * 2).min(MAX_BACKOFF);
    proceed
}

fn log_fatal(err: &serenity::Error) {
    error!("Discord fatal error (will not retry): {}", err);
    error!(
        "Check your DISCORD_TOKEN and that the message content intent is enabled at https://discord.com/developers/applications"
    );
}

/// Check if a serenity error represents a fatal gateway condition that should not be retried
fn is_fatal_gateway_error(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Gateway(gateway_err) => matches!(
            gateway_err,
            GatewayError::InvalidAuthentication
                | GatewayError::NoAuthentication
                | GatewayError::InvalidShardData
                | GatewayError::DisallowedGatewayIntents
                | GatewayError::InvalidGatewayIntents
        ),
        _ => false,
    }
}

/// Split a message into chunks of at most 2000 characters.
/// Breaks at newlines where possible, then at spaces, and only splits a
/// single word when it alone exceeds the limit.
fn split_message(content: &str) -> Vec<String> {
    if content.chars().count() <= DISCORD_MAX_LENGTH {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = Chunk::default();

    for line in content.lines() {
        if line.chars().count() > DISCORD_MAX_LENGTH {
            current.flush_into(&mut chunks);
            for word in line.split_whitespace() {
                if word.chars().count() > DISCORD_MAX_LENGTH {
                    current.flush_into(&mut chunks);
                    let chars: Vec<char> = word.chars().collect();
                    chunks.extend(
                        chars
                            .chunks(DISCORD_MAX_LENGTH)
                            .map(|piece| piece.iter().collect::<String>()),
                    );
                    continue;
                }
                current.append(word, ' ', &mut chunks);
            }
            current.flush_into(&mut chunks);
            continue;
        }

        current.append(line, '\n', &mut chunks);
    }

    current.flush_into(&mut chunks);
    chunks
}

/// Chunk under construction, tracking its length in characters
#[derive(Default)]
struct Chunk {
    text: String,
    chars: usize,
}

impl Chunk {
    /// Append `piece` with `separator`, starting a new chunk if it would overflow
    fn append(&mut self, piece: &str, separator: char, chunks: &mut Vec<String>) {
        let piece_len = piece.chars().count();
        if !self.text.is_empty() && self.chars + 1 + piece_len > DISCORD_MAX_LENGTH {
            self.flush_into(chunks);
        }
        if !self.text.is_empty() {
            self.text.push(separator);
            self.chars += 1;
        }
        self.text.push_str(piece);
        self.chars += piece_len;
    }

    fn flush_into(&mut self, chunks: &mut Vec<String>) {
        if !self.text.is_empty() {
            chunks.push(std::mem::take(&mut self.text));
            self.chars = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_len(s: &str) -> usize {
        s.chars().count()
    }

    #[test]
    fn test_gateway_debug_hides_token() {
        let gateway = DiscordGateway::new("super-secret-token".to_string());
        assert!(!format!("{:?}", gateway).contains("super-secret-token"));
    }

    #[test]
    fn test_intents_include_message_content() {
        let intents = DiscordGateway::intents();
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(intents.contains(GatewayIntents::GUILD_MESSAGES));
        assert!(intents.contains(GatewayIntents::DIRECT_MESSAGES));
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let gateway = DiscordGateway::new("token".to_string());
        let sender = gateway.sender();
        let result = sender
            .send(OutboundResponse {
                content: "hi".to_string(),
                delivery: DeliveryMode::Public,
                channel_id: "123".to_string(),
                author_id: "456".to_string(),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(sender.name(), "discord");
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("123456789").unwrap(), 123456789);
        assert!(parse_id("0").is_err());
        assert!(parse_id("not-a-number").is_err());
        assert!(parse_id("").is_err());
    }

    #[test]
    fn test_fatal_gateway_errors() {
        assert!(is_fatal_gateway_error(&serenity::Error::Gateway(
            GatewayError::InvalidAuthentication
        )));
        assert!(is_fatal_gateway_error(&serenity::Error::Gateway(
            GatewayError::DisallowedGatewayIntents
        )));
        assert!(!is_fatal_gateway_error(&serenity::Error::Other("socket closed")));
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let cancel = CancellationToken::new();
        let mut backoff = Duration::from_millis(1);
        assert!(wait_or_cancel(&cancel, &mut backoff).await);
        assert_eq!(backoff, Duration::from_millis(2));

        let mut backoff = Duration::from_secs(45);
        cancel.cancel();
        assert!(!wait_or_cancel(&cancel, &mut backoff).await);
        assert_eq!(backoff, MAX_BACKOFF);
    }

    #[test]
    fn test_split_message_short() {
        let chunks = split_message("Hello, world!");
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_split_message_at_limit() {
        let msg = "a".repeat(DISCORD_MAX_LENGTH);
        let chunks = split_message(&msg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(char_len(&chunks[0]), DISCORD_MAX_LENGTH);
    }

    #[test]
    fn test_split_message_on_lines() {
        let line = "a".repeat(100);
        let msg = format!("{}\n", line).repeat(25); // 2525 chars
        let chunks = split_message(&msg);

        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(char_len(chunk) <= DISCORD_MAX_LENGTH);
        }
        assert_eq!(chunks.concat().replace('\n', ""), "a".repeat(2500));
    }

    #[test]
    fn test_split_message_very_long_line() {
        let long_line = (0..600).map(|_| "word").collect::<Vec<_>>().join(" ");
        let chunks = split_message(&long_line);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(char_len(chunk) <= DISCORD_MAX_LENGTH);
        }
    }

    #[test]
    fn test_split_message_overlong_word() {
        let msg = format!("intro\n{}", "x".repeat(DISCORD_MAX_LENGTH + 10));
        let chunks = split_message(&msg);
        assert_eq!(chunks, vec![
            "intro".to_string(),
            "x".repeat(DISCORD_MAX_LENGTH),
            "x".repeat(10),
        ]);
    }

    #[test]
    fn test_split_message_counts_characters_not_bytes() {
        // 1500 chars but 3750 bytes
        let msg = "é€".repeat(750);
        assert_eq!(split_message(&msg).len(), 1);
    }
}
