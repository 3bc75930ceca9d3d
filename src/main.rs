use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod chat;
mod config;
mod coordinator;
mod error;
mod hub;
mod packets;
mod server;
mod state;
mod store;
#[cfg(test)]
mod testutil;

use api::{ManifoldClient, MarketApi};
use chat::commands::Dispatcher;
use chat::twitch::TwitchBot;
use chat::ChatSink;
use config::Config;
use coordinator::Coordinator;
use hub::BroadcastHub;
use server::Server;
use store::UserStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load("config.toml")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    let store = Arc::new(UserStore::load(&config.general.store_path).await?);
    let api: Arc<dyn MarketApi> = Arc::new(ManifoldClient::new(&config.manifold.api_base));
    let hub = Arc::new(BroadcastHub::new());
    let coordinator = Coordinator::new(Arc::clone(&api), hub);

    let (line_tx, mut line_rx) = mpsc::channel(100);
    let channels = store.registered_channels().await;
    info!(channels = channels.len(), "rejoining registered channels");
    let bot = TwitchBot::spawn(config.twitch.clone(), channels, line_tx, Arc::clone(&store));
    coordinator
        .set_chat(Arc::clone(&bot) as Arc<dyn ChatSink>)
        .await;

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&coordinator),
        Arc::clone(&api),
        Arc::clone(&store),
        Arc::clone(&bot) as Arc<dyn ChatSink>,
        config.manifold.signup_url.clone(),
    ));
    tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            dispatcher.dispatch(&line).await;
        }
    });

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening for dock and overlay connections");

    Server::new(coordinator, store, api, bot).run(listener).await?;
    Ok(())
}
