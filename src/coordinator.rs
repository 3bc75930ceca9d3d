use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::{Bet, LiteMarket, MarketApi};
use crate::chat::{messages, ChatSink};
use crate::error::{Error, Result};
use crate::hub::{BroadcastHub, ClientHandle, ConnId};
use crate::packets::{MarketSnapshot, Packet};
use crate::state::{compute_top_winners, MarketSession, Outcome, ResolveData};

/// Grace period a resolved market stays featured so late viewers still see
/// the final state.
pub const AUTO_UNFEATURE_DELAY: Duration = Duration::from_secs(24);

pub const BET_POLL_INTERVAL: Duration = Duration::from_secs(2);

const POLL_BET_LIMIT: usize = 100;

struct Inner {
    /// At most one session per channel; absence means "no featured market".
    sessions: HashMap<String, MarketSession>,
    /// At most one pending delayed unfeature per channel.
    unfeature_timers: HashMap<String, JoinHandle<()>>,
}

/// Owns the channel→session map and its lifecycle transitions.
///
/// All session mutation happens under one async mutex, and any fallible
/// network step runs *before* the lock is taken, so every retire→install
/// sequence commits without an observable intermediate state. Joins replay
/// under the same lock, which keeps late-joiner snapshots consistent with
/// concurrent selection.
pub struct Coordinator {
    inner: Mutex<Inner>,
    hub: Arc<BroadcastHub>,
    api: Arc<dyn MarketApi>,
    /// Late-bound: the chat transport needs the coordinator to exist first.
    chat: RwLock<Option<Arc<dyn ChatSink>>>,
}

impl Coordinator {
    pub fn new(api: Arc<dyn MarketApi>, hub: Arc<BroadcastHub>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                unfeature_timers: HashMap::new(),
            }),
            hub,
            api,
            chat: RwLock::new(None),
        })
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub async fn set_chat(&self, chat: Arc<dyn ChatSink>) {
        *self.chat.write().await = Some(chat);
    }

    /// Feature a market on a channel, or unfeature only when `market_id` is
    /// `None`. The previous session is always fully retired (unfeature
    /// broadcast included) before the new one becomes visible.
    ///
    /// `origin` suppresses the echo back to the dock socket that issued the
    /// request; every other room member still receives the events.
    pub async fn select_market(
        self: &Arc<Self>,
        channel: &str,
        market_id: Option<&str>,
        origin: Option<ConnId>,
    ) -> Result<Option<LiteMarket>> {
        // All fallible work happens before the commit below.
        let fetched = match market_id {
            Some(id) => {
                let full = self.api.full_market(id).await?;
                if full.market.is_resolved {
                    return Err(Error::InvalidMarket(id.to_string()));
                }
                Some(full)
            }
            None => None,
        };

        let mut inner = self.inner.lock().await;
        self.retire_locked(&mut inner, channel, origin);

        let Some(full) = fetched else {
            return Ok(None);
        };

        let session = MarketSession::start(channel, full.market, full.bets);
        let market = session.market.clone();
        let flag = session.polling_flag();
        self.hub
            .publish(channel, &Packet::SelectMarketId(market.id.clone()), origin);
        self.hub.publish(
            channel,
            &Packet::SelectMarket(MarketSnapshot::of(&session)),
            origin,
        );
        inner.sessions.insert(channel.to_string(), session);
        drop(inner);

        debug!(%channel, market = %market.id, question = %market.question, "featured market");
        self.spawn_poll_task(channel.to_string(), market.id.clone(), flag);
        Ok(Some(market))
    }

    /// Retire the channel's current session: cancel any pending auto-
    /// unfeature, stop polling, drop the session, broadcast the unfeature.
    /// No await points between these steps.
    fn retire_locked(&self, inner: &mut Inner, channel: &str, origin: Option<ConnId>) {
        if let Some(timer) = inner.unfeature_timers.remove(channel) {
            timer.abort();
        }
        if let Some(old) = inner.sessions.remove(channel) {
            old.stop();
            debug!(%channel, market = %old.market.id, "retired session");
        }
        self.hub.publish(channel, &Packet::UnfeatureMarket, origin);
    }

    /// Add a socket to a channel's room and replay current state to it.
    /// Runs under the coordinator lock so the replay cannot interleave with
    /// a concurrent selection.
    pub async fn join(&self, channel: &str, handle: ClientHandle) {
        let inner = self.inner.lock().await;
        self.hub.add(channel, handle.clone());
        handle.send(&Packet::Clear);
        if let Some(session) = inner.sessions.get(channel) {
            handle.send(&Packet::SelectMarket(MarketSnapshot::of(session)));
            if let Some(resolve) = &session.resolve {
                handle.send(&Packet::Resolve(resolve.clone()));
            }
        }
    }

    pub async fn get_market(&self, channel: &str) -> Option<LiteMarket> {
        self.inner
            .lock()
            .await
            .sessions
            .get(channel)
            .map(|s| s.market.clone())
    }

    /// Reverse lookup by linear scan of active sessions; used to route
    /// resolution notifications back to the owning channel.
    pub async fn channel_for_market(&self, market_id: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .sessions
            .iter()
            .find(|(_, s)| s.market.id == market_id)
            .map(|(channel, _)| channel.clone())
    }

    /// Signed share count for a user in the channel's active market, or
    /// `None` when no market is featured.
    pub async fn user_position(&self, channel: &str, username: &str) -> Option<f64> {
        self.inner
            .lock()
            .await
            .sessions
            .get(channel)
            .map(|s| s.user_position(username))
    }

    /// Merge freshly polled bets into the channel's session and broadcast
    /// the incremental set. Silently ignores stale deliveries for a market
    /// that is no longer featured.
    async fn ingest_bets(&self, channel: &str, market_id: &str, bets: Vec<Bet>) {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.sessions.get_mut(channel) else {
            return;
        };
        if session.market.id != market_id || session.is_resolved() {
            return;
        }
        let fresh = session.append_bets(bets);
        if !fresh.is_empty() {
            debug!(%channel, count = fresh.len(), "new bets");
            self.hub.publish(channel, &Packet::AddBets(fresh), None);
        }
    }

    /// Resolution path: record the outcome, broadcast it, schedule the
    /// delayed auto-unfeature (replacing any pending timer for the
    /// channel), and announce the result in chat.
    pub async fn on_market_resolved(self: &Arc<Self>, market_id: &str, outcome: Outcome) {
        let Some(channel) = self.channel_for_market(market_id).await else {
            return;
        };
        let (data, market_url) = {
            let mut inner = self.inner.lock().await;
            let Some(session) = inner.sessions.get_mut(&channel) else {
                return;
            };
            // Re-validate under the lock; the session may have been
            // replaced since the reverse lookup.
            if session.market.id != market_id || session.is_resolved() {
                return;
            }

            let data = ResolveData {
                outcome,
                top_winners: compute_top_winners(outcome, session.bets()),
            };
            session.record_resolution(outcome, data.top_winners.clone());
            let market_url = session.market.url.clone();
            self.hub
                .publish(&channel, &Packet::Resolve(data.clone()), None);

            if let Some(timer) = inner.unfeature_timers.remove(&channel) {
                timer.abort();
            }
            let coordinator = Arc::clone(self);
            let timer_channel = channel.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(AUTO_UNFEATURE_DELAY).await;
                // select with None never fetches, so this cannot fail; the
                // retire step aborts this very task, which is harmless
                // because no await follows it.
                if let Err(e) = coordinator.select_market(&timer_channel, None, None).await {
                    warn!(channel = %timer_channel, error = %e, "auto-unfeature failed");
                }
            });
            inner.unfeature_timers.insert(channel.clone(), timer);
            (data, market_url)
        };

        debug!(%channel, %market_id, outcome = outcome.display(), "market resolved");
        let chat = self.chat.read().await.clone();
        if let Some(chat) = chat {
            chat.say(&channel, &messages::resolved(&data, &market_url))
                .await;
        }
    }

    /// Long-lived background task per session: fetch the bet feed and the
    /// market status on a coarse interval until the session's polling flag
    /// goes false.
    fn spawn_poll_task(
        self: &Arc<Self>,
        channel: String,
        market_id: String,
        active: Arc<AtomicBool>,
    ) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(BET_POLL_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the select snapshot already
            // carried the current bets.
            interval.tick().await;
            loop {
                interval.tick().await;
                if !active.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = coordinator.poll_once(&channel, &market_id).await {
                    warn!(%channel, %market_id, error = %e, "bet poll failed");
                }
            }
            debug!(%channel, %market_id, "bet polling stopped");
        });
    }

    async fn poll_once(self: &Arc<Self>, channel: &str, market_id: &str) -> Result<()> {
        let bets = self.api.market_bets(market_id, Some(POLL_BET_LIMIT)).await?;
        self.ingest_bets(channel, market_id, bets).await;

        let market = self.api.market_by_id(market_id).await?;
        if market.is_resolved {
            if let Some(outcome) = market.resolution {
                self.on_market_resolved(market_id, outcome).await;
            }
        }
        Ok(())
    }
}
