use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::{Bet, LiteMarket};
use crate::state::Outcome;

/// Ranked winner list is capped at this many entries.
pub const MAX_TOP_WINNERS: usize = 10;

/// How many recent bets ride along with a select / replay packet.
pub const RECENT_BETS_WINDOW: usize = 3;

/// Resolution outcome plus the ranked highest-profit participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveData {
    pub outcome: Outcome,
    pub top_winners: Vec<Winner>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub display_name: String,
    pub profit: f64,
}

/// One featured market bound to one channel for its lifetime.
///
/// The bet ledger is append-only and kept oldest-first; the backend does
/// not guarantee ordering, so every merge re-sorts by creation time.
/// `polling_active` is the cooperative stop signal for the bet-poll task.
#[derive(Debug)]
pub struct MarketSession {
    pub channel: String,
    pub market: LiteMarket,
    bets: Vec<Bet>,
    bet_ids: HashSet<String>,
    pub resolve: Option<ResolveData>,
    polling_active: Arc<AtomicBool>,
}

impl MarketSession {
    pub fn start(channel: impl Into<String>, market: LiteMarket, mut bets: Vec<Bet>) -> Self {
        bets.sort_by_key(|b| b.created_time);
        let bet_ids = bets.iter().map(|b| b.id.clone()).collect();
        Self {
            channel: channel.into(),
            market,
            bets,
            bet_ids,
            resolve: None,
            polling_active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Idempotent merge: bets already present (by id) are skipped. Returns
    /// the bets that were actually new, oldest-first, for incremental
    /// broadcast.
    pub fn append_bets(&mut self, incoming: Vec<Bet>) -> Vec<Bet> {
        let mut fresh: Vec<Bet> = incoming
            .into_iter()
            .filter(|b| !self.bet_ids.contains(&b.id))
            .collect();
        fresh.sort_by_key(|b| b.created_time);
        for bet in &fresh {
            self.bet_ids.insert(bet.id.clone());
        }
        self.bets.extend(fresh.iter().cloned());
        self.bets.sort_by_key(|b| b.created_time);
        fresh
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    /// The most recent `RECENT_BETS_WINDOW` bets, oldest-first.
    pub fn recent_bets(&self) -> &[Bet] {
        let start = self.bets.len().saturating_sub(RECENT_BETS_WINDOW);
        &self.bets[start..]
    }

    pub fn is_resolved(&self) -> bool {
        self.resolve.is_some()
    }

    /// Record the resolution. Flips the polling flag and caps the winner
    /// list; scheduling of the removal grace timer is the coordinator's job.
    pub fn record_resolution(&mut self, outcome: Outcome, mut top_winners: Vec<Winner>) {
        top_winners.truncate(MAX_TOP_WINNERS);
        self.resolve = Some(ResolveData {
            outcome,
            top_winners,
        });
        self.polling_active.store(false, Ordering::SeqCst);
    }

    /// Stop polling without marking resolved (manual unfeature).
    pub fn stop(&self) {
        self.polling_active.store(false, Ordering::SeqCst);
    }

    /// Handle for the poll task to check before scheduling each fetch.
    pub fn polling_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.polling_active)
    }

    /// Signed share count for a user: YES shares minus NO shares across
    /// their bets in this market. Sells carry negative shares, so they
    /// subtract naturally.
    pub fn user_position(&self, username: &str) -> f64 {
        self.bets
            .iter()
            .filter(|b| {
                b.user_username.as_deref() == Some(username)
                    || b.user_name.as_deref() == Some(username)
            })
            .map(|b| match b.outcome {
                crate::state::Side::Yes => b.shares,
                crate::state::Side::No => -b.shares,
            })
            .sum()
    }
}

/// Rank participants by realized profit for a resolution announcement.
///
/// Profit per user is the payout of their winning-side shares (one mana per
/// share) minus everything they spent. A cancelled market refunds all bets,
/// so it produces no winner list.
pub fn compute_top_winners(outcome: Outcome, bets: &[Bet]) -> Vec<Winner> {
    let Some(winning_side) = outcome.winning_side() else {
        return Vec::new();
    };
    struct Tally {
        display_name: String,
        payout: f64,
        spent: f64,
    }
    let mut tallies: HashMap<&str, Tally> = HashMap::new();
    for bet in bets {
        let tally = tallies.entry(&bet.user_id).or_insert_with(|| Tally {
            display_name: bet
                .user_name
                .clone()
                .unwrap_or_else(|| bet.user_id.clone()),
            payout: 0.0,
            spent: 0.0,
        });
        if bet.outcome == winning_side {
            tally.payout += bet.shares;
        }
        tally.spent += bet.amount;
    }
    let mut winners: Vec<Winner> = tallies
        .into_values()
        .map(|t| Winner {
            display_name: t.display_name,
            profit: t.payout - t.spent,
        })
        .filter(|w| w.profit > 0.0)
        .collect();
    winners.sort_by(|a, b| b.profit.total_cmp(&a.profit));
    winners.truncate(MAX_TOP_WINNERS);
    winners
}
