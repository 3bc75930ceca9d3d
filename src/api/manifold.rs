use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::state::{Outcome, Side};

/// Market data returned by the Manifold REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiteMarket {
    pub id: String,
    pub question: String,
    pub url: String,
    pub probability: Option<f64>,
    pub created_time: i64,
    #[serde(default)]
    pub is_resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Outcome>,
}

/// One bet on a market. Sells show up as bets with negative amount/shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_username: Option<String>,
    pub amount: f64,
    pub shares: f64,
    pub outcome: Side,
    pub created_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiteUser {
    pub id: String,
    pub username: String,
    pub balance: f64,
}

/// A market snapshot plus its historical bets, fetched at selection time.
#[derive(Debug, Clone)]
pub struct FullMarket {
    pub market: LiteMarket,
    pub bets: Vec<Bet>,
}

/// The prediction-market backend as the coordinator and dispatcher see it.
/// Mutating calls must not be silently retried on ambiguous failure.
#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn market_by_id(&self, id: &str) -> Result<LiteMarket>;
    async fn market_by_slug(&self, slug: &str) -> Result<LiteMarket>;
    async fn full_market(&self, id: &str) -> Result<FullMarket>;
    async fn market_bets(&self, market_id: &str, limit: Option<usize>) -> Result<Vec<Bet>>;
    async fn user_bets(&self, market_id: &str, username: &str) -> Result<Vec<Bet>>;
    async fn user_by_username(&self, username: &str) -> Result<LiteUser>;
    async fn create_binary_market(
        &self,
        api_key: &str,
        question: &str,
        initial_prob: f64,
        group_id: Option<&str>,
    ) -> Result<LiteMarket>;
    async fn resolve_binary_market(
        &self,
        api_key: &str,
        market_id: &str,
        outcome: Outcome,
    ) -> Result<()>;
    async fn place_bet(&self, api_key: &str, market_id: &str, amount: u64, side: Side)
        -> Result<()>;
    async fn sell_shares(&self, api_key: &str, market_id: &str, side: Side) -> Result<()>;
    async fn verify_api_key(&self, api_key: &str) -> Result<bool>;
}

/// HTTP client for the Manifold Markets v0 REST API.
pub struct ManifoldClient {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

impl ManifoldClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }
        Ok(response.json().await?)
    }

    async fn post(
        &self,
        path: &str,
        api_key: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(self.url(path))
            .header("Authorization", format!("Key {api_key}"));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }
        Ok(response)
    }

    /// Map a non-2xx backend response onto the failure taxonomy. The backend
    /// reports insufficient funds via specific message strings.
    async fn map_failure(response: reqwest::Response) -> Error {
        let status = response.status();
        let message = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.to_string());
        if message == "Insufficient balance." || message == "Balance must be at least 100." {
            return Error::InsufficientBalance;
        }
        match status {
            reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED => Error::Forbidden,
            reqwest::StatusCode::NOT_FOUND => Error::NotFound(message),
            _ => Error::Api(message),
        }
    }
}

#[async_trait]
impl MarketApi for ManifoldClient {
    async fn market_by_id(&self, id: &str) -> Result<LiteMarket> {
        self.get_json(&format!("market/{id}")).await
    }

    async fn market_by_slug(&self, slug: &str) -> Result<LiteMarket> {
        self.get_json(&format!("slug/{slug}")).await
    }

    async fn full_market(&self, id: &str) -> Result<FullMarket> {
        let market = self.market_by_id(id).await?;
        let bets = self.market_bets(id, None).await?;
        Ok(FullMarket { market, bets })
    }

    async fn market_bets(&self, market_id: &str, limit: Option<usize>) -> Result<Vec<Bet>> {
        let mut path = format!("bets?contractId={market_id}");
        if let Some(limit) = limit {
            path.push_str(&format!("&limit={limit}"));
        }
        self.get_json(&path).await
    }

    async fn user_bets(&self, market_id: &str, username: &str) -> Result<Vec<Bet>> {
        self.get_json(&format!("bets?contractId={market_id}&username={username}"))
            .await
    }

    async fn user_by_username(&self, username: &str) -> Result<LiteUser> {
        self.get_json(&format!("user/{username}")).await
    }

    async fn create_binary_market(
        &self,
        api_key: &str,
        question: &str,
        initial_prob: f64,
        group_id: Option<&str>,
    ) -> Result<LiteMarket> {
        // Close time is arbitrarily far in the future; featured markets are
        // resolved manually long before then.
        let close_time = chrono::Utc::now().timestamp_millis() + 1_000_000_000_000;
        let mut body = json!({
            "outcomeType": "BINARY",
            "question": question,
            "closeTime": close_time,
            "initialProb": initial_prob,
            "visibility": "unlisted",
        });
        if let Some(group_id) = group_id {
            body["groupId"] = json!(group_id);
        }
        let response = self.post("market", api_key, Some(body)).await?;
        Ok(response.json().await?)
    }

    async fn resolve_binary_market(
        &self,
        api_key: &str,
        market_id: &str,
        outcome: Outcome,
    ) -> Result<()> {
        self.post(
            &format!("market/{market_id}/resolve"),
            api_key,
            Some(json!({ "outcome": outcome })),
        )
        .await?;
        Ok(())
    }

    async fn place_bet(
        &self,
        api_key: &str,
        market_id: &str,
        amount: u64,
        side: Side,
    ) -> Result<()> {
        self.post(
            "bet",
            api_key,
            Some(json!({
                "amount": amount,
                "contractId": market_id,
                "outcome": side,
            })),
        )
        .await?;
        Ok(())
    }

    async fn sell_shares(&self, api_key: &str, market_id: &str, side: Side) -> Result<()> {
        self.post(
            &format!("market/{market_id}/sell"),
            api_key,
            Some(json!({ "outcome": side })),
        )
        .await?;
        Ok(())
    }

    /// A bodyless bet post with a bad key comes back 403; any other failure
    /// means the key itself was accepted.
    async fn verify_api_key(&self, api_key: &str) -> Result<bool> {
        match self.post("bet", api_key, None).await {
            Err(Error::Forbidden) => Ok(false),
            Err(Error::Transport(e)) => Err(Error::Transport(e)),
            _ => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lite_market_deserializes_backend_shape() {
        let raw = r#"{
            "id": "m1",
            "question": "Will it rain tomorrow?",
            "url": "https://manifold.markets/ex/will-it-rain",
            "probability": 0.42,
            "createdTime": 1700000000000,
            "isResolved": false
        }"#;
        let market: LiteMarket = serde_json::from_str(raw).unwrap();
        assert_eq!(market.id, "m1");
        assert!(!market.is_resolved);
        assert_eq!(market.resolution, None);
    }

    #[test]
    fn test_resolved_market_resolution_field() {
        let raw = r#"{
            "id": "m2",
            "question": "q",
            "url": "u",
            "probability": null,
            "createdTime": 0,
            "isResolved": true,
            "resolution": "YES"
        }"#;
        let market: LiteMarket = serde_json::from_str(raw).unwrap();
        assert!(market.is_resolved);
        assert_eq!(market.resolution, Some(Outcome::Yes));
    }

    #[test]
    fn test_bet_deserializes_and_side_roundtrips() {
        let raw = r#"{
            "id": "b1",
            "userId": "u1",
            "userName": "Alice",
            "amount": 50.0,
            "shares": 70.5,
            "outcome": "NO",
            "createdTime": 1700000001000
        }"#;
        let bet: Bet = serde_json::from_str(raw).unwrap();
        assert_eq!(bet.outcome, Side::No);
        assert_eq!(bet.user_username, None);
        assert_eq!(serde_json::to_value(Side::No).unwrap(), "NO");
    }

    #[test]
    fn test_url_join_handles_trailing_slash() {
        let client = ManifoldClient::new("https://example.com/v0/");
        assert_eq!(client.url("market/abc"), "https://example.com/v0/market/abc");
    }
}
