//! Twitch chat transport: IRC over websocket.
//!
//! One long-lived task owns the connection and reconnects on failure;
//! outbound lines flow through an unbounded channel so `say` and the join
//! helpers never block on the socket.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::chat::{ChatLine, ChatSink};
use crate::config;
use crate::error::Result;
use crate::store::UserStore;

const TWITCH_WS_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

pub struct TwitchBot {
    username: String,
    out_tx: mpsc::UnboundedSender<String>,
    joined: Mutex<HashSet<String>>,
    /// Channels where the bot holds a moderator/broadcaster badge, tracked
    /// from USERSTATE tags.
    mod_channels: Mutex<HashSet<String>>,
    store: Arc<UserStore>,
}

impl TwitchBot {
    fn new(
        username: String,
        initial_channels: Vec<String>,
        out_tx: mpsc::UnboundedSender<String>,
        store: Arc<UserStore>,
    ) -> Self {
        Self {
            username: username.to_lowercase(),
            out_tx,
            joined: Mutex::new(initial_channels.into_iter().collect()),
            mod_channels: Mutex::new(HashSet::new()),
            store,
        }
    }

    /// Connect and run in the background. Inbound chat lines are delivered
    /// on `line_tx`; the returned handle is the outbound side.
    pub fn spawn(
        cfg: config::Twitch,
        initial_channels: Vec<String>,
        line_tx: mpsc::Sender<ChatLine>,
        store: Arc<UserStore>,
    ) -> Arc<TwitchBot> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let bot = Arc::new(TwitchBot::new(
            cfg.username.clone(),
            initial_channels,
            out_tx,
            store,
        ));
        let task_bot = Arc::clone(&bot);
        tokio::spawn(async move {
            task_bot.run(cfg, out_rx, line_tx).await;
        });
        bot
    }

    async fn run(
        &self,
        cfg: config::Twitch,
        mut out_rx: mpsc::UnboundedReceiver<String>,
        line_tx: mpsc::Sender<ChatLine>,
    ) {
        loop {
            info!("connecting to twitch chat");
            match connect_async(TWITCH_WS_URL).await {
                Ok((ws_stream, _)) => {
                    info!("connected to twitch chat");
                    let (mut write, mut read) = ws_stream.split();

                    let mut login = vec![
                        "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
                        format!("PASS oauth:{}", cfg.oauth_token),
                        format!("NICK {}", self.username),
                    ];
                    for channel in self.joined.lock().expect("joined lock").iter() {
                        login.push(format!("JOIN #{channel}"));
                    }
                    let mut failed = false;
                    for line in login {
                        if let Err(e) = write.send(tungstenite::Message::Text(line)).await {
                            warn!(error = %e, "twitch login failed");
                            failed = true;
                            break;
                        }
                    }

                    while !failed {
                        tokio::select! {
                            outbound = out_rx.recv() => {
                                let Some(line) = outbound else { return };
                                if let Err(e) = write.send(tungstenite::Message::Text(line)).await {
                                    warn!(error = %e, "twitch send failed");
                                    break;
                                }
                            }
                            inbound = read.next() => {
                                match inbound {
                                    Some(Ok(tungstenite::Message::Text(text))) => {
                                        for raw in text.lines() {
                                            self.handle_line(raw, &line_tx).await;
                                        }
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        warn!(error = %e, "twitch read failed");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to connect to twitch chat");
                }
            }

            info!("reconnecting to twitch chat in {:?}", RECONNECT_DELAY);
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn handle_line(&self, raw: &str, line_tx: &mpsc::Sender<ChatLine>) {
        match parse_irc_line(raw) {
            Some(IrcEvent::Ping(payload)) => {
                let _ = self.out_tx.send(format!("PONG {payload}"));
            }
            Some(IrcEvent::Privmsg(line)) => {
                // Ignore our own echoed messages.
                if line.username == self.username {
                    return;
                }
                debug!(channel = %line.channel, user = %line.username, "chat line");
                let _ = line_tx.send(line).await;
            }
            Some(IrcEvent::Userstate { channel, is_mod }) => {
                let mut mods = self.mod_channels.lock().expect("mod lock");
                if is_mod {
                    mods.insert(channel);
                } else {
                    mods.remove(&channel);
                }
            }
            None => {}
        }
    }

    /// Whether the bot currently holds elevated privilege in a channel.
    pub fn is_mod(&self, channel: &str) -> bool {
        self.mod_channels
            .lock()
            .expect("mod lock")
            .contains(channel)
    }

    pub fn is_in_channel(&self, channel: &str) -> bool {
        self.joined
            .lock()
            .expect("joined lock")
            .contains(&channel.to_lowercase())
    }

    /// Join a channel, greet it, and record it in the channel registry.
    /// No-op when already joined.
    pub async fn join_channel(&self, channel: &str) -> Result<()> {
        let channel = channel.to_lowercase();
        {
            let mut joined = self.joined.lock().expect("joined lock");
            if !joined.insert(channel.clone()) {
                return Ok(());
            }
        }
        info!(%channel, "joining channel");
        let _ = self.out_tx.send(format!("JOIN #{channel}"));
        let mut greeting = "Hey there! I am the Manifold Markets chat bot.".to_string();
        if !self.is_mod(&channel) {
            greeting.push_str(" Please /mod me so I can do my job.");
        }
        self.say(&channel, &greeting).await;
        self.store.register_channel(&channel).await
    }

    /// Part from a channel and drop it from the registry. No-op when not
    /// joined.
    pub async fn leave_channel(&self, channel: &str) -> Result<()> {
        let channel = channel.to_lowercase();
        {
            let mut joined = self.joined.lock().expect("joined lock");
            if !joined.remove(&channel) {
                return Ok(());
            }
        }
        info!(%channel, "leaving channel");
        self.say(&channel, "Goodbye cruel world.").await;
        let _ = self.out_tx.send(format!("PART #{channel}"));
        self.store.unregister_channel(&channel).await
    }
}

#[async_trait]
impl ChatSink for TwitchBot {
    async fn say(&self, channel: &str, message: &str) {
        let _ = self.out_tx.send(format!("PRIVMSG #{channel} :{message}"));
    }
}

enum IrcEvent {
    Ping(String),
    Privmsg(ChatLine),
    Userstate { channel: String, is_mod: bool },
}

/// Parse one raw IRC line. Lines we don't care about return `None`.
fn parse_irc_line(raw: &str) -> Option<IrcEvent> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    if raw.is_empty() {
        return None;
    }
    if let Some(payload) = raw.strip_prefix("PING ") {
        return Some(IrcEvent::Ping(payload.to_string()));
    }

    let (tags, rest) = match raw.strip_prefix('@') {
        Some(tagged) => {
            let (tags, rest) = tagged.split_once(' ')?;
            (parse_tags(tags), rest)
        }
        None => (HashMap::new(), raw),
    };

    let (prefix, rest) = match rest.strip_prefix(':') {
        Some(prefixed) => {
            let (prefix, rest) = prefixed.split_once(' ')?;
            (Some(prefix), rest)
        }
        None => (None, rest),
    };

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?;
    let params = parts.next().unwrap_or("");

    match command {
        "PRIVMSG" => {
            let (target, text) = params.split_once(" :")?;
            let channel = target.trim().trim_start_matches('#').to_lowercase();
            let username = prefix?.split('!').next()?.to_lowercase();
            let badges = badge_names(tags.get("badges").copied().unwrap_or(""));
            let display_name = tags
                .get("display-name")
                .filter(|d| !d.is_empty())
                .map(|d| d.to_string())
                .unwrap_or_else(|| username.clone());
            Some(IrcEvent::Privmsg(ChatLine {
                channel,
                username,
                display_name,
                badges,
                text: text.to_string(),
            }))
        }
        "USERSTATE" => {
            let channel = params.trim().trim_start_matches('#').to_lowercase();
            let badges = badge_names(tags.get("badges").copied().unwrap_or(""));
            let is_mod = badges
                .iter()
                .any(|b| b == "moderator" || b == "broadcaster");
            Some(IrcEvent::Userstate { channel, is_mod })
        }
        _ => None,
    }
}

fn parse_tags(raw: &str) -> HashMap<&str, &str> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

/// "moderator/1,subscriber/12" -> ["moderator", "subscriber"]
fn badge_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|b| !b.is_empty())
        .map(|b| b.split('/').next().unwrap_or(b).to_string())
        .collect()
}
