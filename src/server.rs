//! WebSocket endpoint for Dock and Overlay clients.
//!
//! Clients connect with `?type=dock|overlay&controlToken=...`. The role is
//! validated during the HTTP upgrade; the token is resolved afterwards so
//! the store lookup can stay async. A socket with an unknown token gets a
//! close frame, a dock with a stale API key likewise. Accepted sockets are
//! joined to the room of the token owner's channel and replayed current
//! state by the coordinator.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::api::MarketApi;
use crate::chat::twitch::TwitchBot;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::hub::{ClientHandle, ClientRole, ConnId};
use crate::packets::{DockRequest, Packet};
use crate::state::Outcome;
use crate::store::{LinkedUser, UserStore};

pub struct Server {
    coordinator: Arc<Coordinator>,
    store: Arc<UserStore>,
    api: Arc<dyn MarketApi>,
    bot: Arc<TwitchBot>,
}

impl Server {
    pub fn new(
        coordinator: Arc<Coordinator>,
        store: Arc<UserStore>,
        api: Arc<dyn MarketApi>,
        bot: Arc<TwitchBot>,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            store,
            api,
            bot,
        })
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_socket(stream, addr).await {
                    debug!(%addr, error = %e, "socket closed with error");
                }
            });
        }
    }

    async fn handle_socket(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut role = None;
        let mut token = None;
        let callback = |req: &Request, resp: Response| {
            let params = parse_query(req.uri().query().unwrap_or(""));
            match params.get("type").map(|t| ClientRole::parse(t)) {
                Some(Some(r)) => role = Some(r),
                _ => return Err(reject("unknown client type")),
            }
            token = params.get("controlToken").cloned();
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| Error::Api(e.to_string()))?;
        let Some(role) = role else {
            return Ok(());
        };

        let user = self
            .store
            .user_for_control_token(token.as_deref().unwrap_or(""))
            .await;
        let Some(user) = user else {
            close_with(&mut ws, "no account associated with this control token").await;
            return Ok(());
        };
        if role == ClientRole::Dock && !self.api.verify_api_key(&user.api_key).await? {
            close_with(&mut ws, "invalid api key").await;
            return Ok(());
        }

        let channel = user.twitch_login.clone();
        info!(%addr, ?role, %channel, "client connected");

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let conn_id = self.coordinator.hub().next_conn_id();
        self.coordinator
            .join(&channel, ClientHandle::new(conn_id, role, tx.clone()))
            .await;
        if role == ClientRole::Dock && !self.bot.is_in_channel(&channel) {
            if let Err(e) = self.bot.join_channel(&channel).await {
                warn!(%channel, error = %e, "joining chat channel failed");
            }
        }

        let (mut write, mut read) = ws.split();
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if write.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) if role == ClientRole::Dock => {
                        let Some(request) = parse_dock_request(&channel, &text) else {
                            continue;
                        };
                        if let Err(e) = execute_dock_request(
                            &self.coordinator,
                            &self.api,
                            &channel,
                            &user,
                            conn_id,
                            &tx,
                            request,
                        )
                        .await
                        {
                            warn!(%channel, error = %e, "dock request failed");
                        }
                    }
                    // Overlays are display-only.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%addr, error = %e, "read error");
                        break;
                    }
                },
            }
        }

        self.coordinator.hub().leave(conn_id);
        info!(
            %addr,
            ?role,
            %channel,
            remaining = self.coordinator.hub().room_size(&channel),
            "client disconnected"
        );
        Ok(())
    }
}

fn parse_dock_request(channel: &str, text: &str) -> Option<DockRequest> {
    match serde_json::from_str(text) {
        Ok(request) => Some(request),
        Err(e) => {
            debug!(%channel, error = %e, "unparseable dock request");
            None
        }
    }
}

/// Market creation and resolution run with the connected owner's API key;
/// selection changes suppress the echo back to the issuing dock.
async fn execute_dock_request(
    coordinator: &Arc<Coordinator>,
    api: &Arc<dyn MarketApi>,
    channel: &str,
    user: &LinkedUser,
    conn_id: ConnId,
    tx: &mpsc::UnboundedSender<String>,
    request: DockRequest,
) -> Result<()> {
    debug!(%channel, ?request, "dock request");
    match request {
        DockRequest::SelectMarketId(id) => {
            coordinator
                .select_market(channel, Some(&id), Some(conn_id))
                .await?;
        }
        DockRequest::UnfeatureMarket => {
            coordinator.select_market(channel, None, Some(conn_id)).await?;
        }
        DockRequest::Resolve { outcome } => {
            let market = coordinator
                .get_market(channel)
                .await
                .ok_or(Error::NoActiveMarket)?;
            let outcome = Outcome::from_token(&outcome)
                .filter(|o| *o != Outcome::Prob)
                .ok_or(Error::InvalidOutcome(outcome))?;
            api.resolve_binary_market(&user.api_key, &market.id, outcome)
                .await?;
        }
        DockRequest::CreateMarket { question, group_id } => {
            let market = api
                .create_binary_market(&user.api_key, &question, 50.0, group_id.as_deref())
                .await?;
            coordinator
                .select_market(channel, Some(&market.id), None)
                .await?;
            let ack = serde_json::to_string(&Packet::MarketCreated { id: market.id })?;
            let _ = tx.send(ack);
        }
    }
    Ok(())
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn reject(reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_string()));
    *resp.status_mut() = StatusCode::BAD_REQUEST;
    resp
}

async fn close_with<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>, reason: &str)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Policy,
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, "close frame not delivered");
    }
}
