use serde::{Deserialize, Serialize};

use crate::api::{Bet, LiteMarket};
use crate::state::{MarketSession, ResolveData};

/// Full market snapshot carried by a select / replay packet. Includes the
/// most recent bets so a fresh client can render immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    #[serde(flatten)]
    pub market: LiteMarket,
    pub initial_bets: Vec<Bet>,
}

impl MarketSnapshot {
    pub fn of(session: &MarketSession) -> Self {
        Self {
            market: session.market.clone(),
            initial_bets: session.recent_bets().to_vec(),
        }
    }
}

/// State-change events fanned out to Dock and Overlay sockets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Packet {
    /// No featured market; clear any rendered state.
    Clear,
    SelectMarket(MarketSnapshot),
    /// Light-weight dock-to-dock relay emitted ahead of the full snapshot.
    SelectMarketId(String),
    /// Incremental bet feed, oldest-first.
    AddBets(Vec<Bet>),
    Resolve(ResolveData),
    UnfeatureMarket,
    /// Acknowledgment of a dock create request.
    MarketCreated { id: String },
}

/// Requests accepted from Dock sockets. Overlays are display-only and any
/// inbound traffic from them is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DockRequest {
    SelectMarketId(String),
    UnfeatureMarket,
    Resolve { outcome: String },
    CreateMarket {
        question: String,
        #[serde(default)]
        group_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Outcome, Winner};

    #[test]
    fn test_packet_wire_tagging() {
        let json = serde_json::to_value(&Packet::SelectMarketId("m1".into())).unwrap();
        assert_eq!(json["type"], "select_market_id");
        assert_eq!(json["data"], "m1");

        let json = serde_json::to_value(&Packet::UnfeatureMarket).unwrap();
        assert_eq!(json["type"], "unfeature_market");
    }

    #[test]
    fn test_resolve_packet_roundtrip() {
        let packet = Packet::Resolve(ResolveData {
            outcome: Outcome::Yes,
            top_winners: vec![Winner {
                display_name: "Alice".into(),
                profit: 25.0,
            }],
        });
        let raw = serde_json::to_string(&packet).unwrap();
        let back: Packet = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn test_dock_request_parses_create_without_group() {
        let raw = r#"{"type":"create_market","data":{"question":"Will chat behave?"}}"#;
        let req: DockRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(
            req,
            DockRequest::CreateMarket {
                question: "Will chat behave?".into(),
                group_id: None,
            }
        );
    }
}
