//! Shared test doubles: an in-memory market backend and a capturing chat
//! sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::api::{Bet, FullMarket, LiteMarket, LiteUser, MarketApi};
use crate::chat::ChatSink;
use crate::error::{Error, Result};
use crate::packets::Packet;
use crate::state::{Outcome, Side};

pub fn make_market(id: &str, resolved: bool) -> LiteMarket {
    LiteMarket {
        id: id.into(),
        question: format!("Question {id}"),
        url: format!("https://manifold.markets/ex/{id}"),
        probability: Some(0.5),
        created_time: 1_700_000_000_000,
        is_resolved: resolved,
        resolution: resolved.then_some(Outcome::Yes),
    }
}

pub fn make_bet(id: &str, user: &str, created_time: i64) -> Bet {
    Bet {
        id: id.into(),
        user_id: user.into(),
        user_name: Some(user.into()),
        user_username: Some(user.into()),
        amount: 10.0,
        shares: 15.0,
        outcome: Side::Yes,
        created_time,
    }
}

pub fn drain_packets(rx: &mut UnboundedReceiver<String>) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        packets.push(serde_json::from_str(&frame).expect("valid packet frame"));
    }
    packets
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedBet {
    pub api_key: String,
    pub market_id: String,
    pub amount: u64,
    pub side: Side,
}

/// In-memory `MarketApi` with mutation recording.
#[derive(Default)]
pub struct MockApi {
    markets: Mutex<HashMap<String, LiteMarket>>,
    slugs: Mutex<HashMap<String, String>>,
    bets: Mutex<HashMap<String, Vec<Bet>>>,
    balances: Mutex<HashMap<String, f64>>,
    pub placed_bets: Mutex<Vec<PlacedBet>>,
    pub resolutions: Mutex<Vec<(String, Outcome)>>,
    pub sells: Mutex<Vec<(String, Side)>>,
    pub reject_bets_insufficient: AtomicBool,
    pub reject_create_insufficient: AtomicBool,
    created_counter: AtomicU64,
}

impl MockApi {
    pub fn add_market(&self, market: LiteMarket) {
        self.markets.lock().unwrap().insert(market.id.clone(), market);
    }

    pub fn add_slug(&self, slug: &str, market_id: &str) {
        self.slugs
            .lock()
            .unwrap()
            .insert(slug.into(), market_id.into());
    }

    pub fn set_bets(&self, market_id: &str, bets: Vec<Bet>) {
        self.bets.lock().unwrap().insert(market_id.into(), bets);
    }

    pub fn set_balance(&self, username: &str, balance: f64) {
        self.balances.lock().unwrap().insert(username.into(), balance);
    }

    /// Flip a market to resolved, as the backend would after a resolve call.
    pub fn resolve_market(&self, market_id: &str, outcome: Outcome) {
        if let Some(market) = self.markets.lock().unwrap().get_mut(market_id) {
            market.is_resolved = true;
            market.resolution = Some(outcome);
        }
    }
}

#[async_trait]
impl MarketApi for MockApi {
    async fn market_by_id(&self, id: &str) -> Result<LiteMarket> {
        self.markets
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.into()))
    }

    async fn market_by_slug(&self, slug: &str) -> Result<LiteMarket> {
        let id = self
            .slugs
            .lock()
            .unwrap()
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::NotFound(slug.into()))?;
        self.market_by_id(&id).await
    }

    async fn full_market(&self, id: &str) -> Result<FullMarket> {
        let market = self.market_by_id(id).await?;
        let bets = self.market_bets(id, None).await?;
        Ok(FullMarket { market, bets })
    }

    async fn market_bets(&self, market_id: &str, _limit: Option<usize>) -> Result<Vec<Bet>> {
        Ok(self
            .bets
            .lock()
            .unwrap()
            .get(market_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn user_bets(&self, market_id: &str, username: &str) -> Result<Vec<Bet>> {
        let bets = self.market_bets(market_id, None).await?;
        Ok(bets
            .into_iter()
            .filter(|b| b.user_username.as_deref() == Some(username))
            .collect())
    }

    async fn user_by_username(&self, username: &str) -> Result<LiteUser> {
        let balance = self
            .balances
            .lock()
            .unwrap()
            .get(username)
            .copied()
            .ok_or_else(|| Error::NotFound(username.into()))?;
        Ok(LiteUser {
            id: format!("id-{username}"),
            username: username.into(),
            balance,
        })
    }

    async fn create_binary_market(
        &self,
        _api_key: &str,
        question: &str,
        _initial_prob: f64,
        _group_id: Option<&str>,
    ) -> Result<LiteMarket> {
        if self.reject_create_insufficient.load(Ordering::SeqCst) {
            return Err(Error::InsufficientBalance);
        }
        let n = self.created_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut market = make_market(&format!("created-{n}"), false);
        market.question = question.into();
        self.add_market(market.clone());
        Ok(market)
    }

    async fn resolve_binary_market(
        &self,
        _api_key: &str,
        market_id: &str,
        outcome: Outcome,
    ) -> Result<()> {
        if !self.markets.lock().unwrap().contains_key(market_id) {
            return Err(Error::NotFound(market_id.into()));
        }
        self.resolutions
            .lock()
            .unwrap()
            .push((market_id.into(), outcome));
        self.resolve_market(market_id, outcome);
        Ok(())
    }

    async fn place_bet(
        &self,
        api_key: &str,
        market_id: &str,
        amount: u64,
        side: Side,
    ) -> Result<()> {
        if self.reject_bets_insufficient.load(Ordering::SeqCst) {
            return Err(Error::InsufficientBalance);
        }
        self.placed_bets.lock().unwrap().push(PlacedBet {
            api_key: api_key.into(),
            market_id: market_id.into(),
            amount,
            side,
        });
        Ok(())
    }

    async fn sell_shares(&self, _api_key: &str, market_id: &str, side: Side) -> Result<()> {
        self.sells.lock().unwrap().push((market_id.into(), side));
        Ok(())
    }

    async fn verify_api_key(&self, api_key: &str) -> Result<bool> {
        Ok(api_key != "bad-key")
    }
}

/// Records everything said to chat.
#[derive(Default)]
pub struct CaptureSink {
    messages: Mutex<Vec<(String, String)>>,
}

impl CaptureSink {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSink for CaptureSink {
    async fn say(&self, channel: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((channel.into(), message.into()));
    }
}
