use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// A chat account linked to a prediction-market account. `control_token`
/// authorizes Dock/Overlay socket handshakes for this user's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedUser {
    pub twitch_login: String,
    pub manifold_username: String,
    pub api_key: String,
    pub control_token: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    users: Vec<LinkedUser>,
    channels: Vec<String>,
}

/// JSON-file-backed registry of linked users and the channels the bot has
/// joined. Held in memory behind a read-write lock; every mutation is
/// persisted before it returns.
pub struct UserStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl UserStore {
    /// Load from disk; a missing file starts an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub async fn user_for_control_token(&self, token: &str) -> Option<LinkedUser> {
        self.data
            .read()
            .await
            .users
            .iter()
            .find(|u| u.control_token == token)
            .cloned()
    }

    pub async fn user_for_twitch_login(&self, login: &str) -> Option<LinkedUser> {
        let login = login.to_lowercase();
        self.data
            .read()
            .await
            .users
            .iter()
            .find(|u| u.twitch_login == login)
            .cloned()
    }

    /// Insert or replace the linked account for a twitch login.
    pub async fn upsert_user(&self, user: LinkedUser) -> Result<()> {
        let mut data = self.data.write().await;
        data.users.retain(|u| u.twitch_login != user.twitch_login);
        data.users.push(user);
        self.persist(&data).await
    }

    pub async fn registered_channels(&self) -> Vec<String> {
        self.data.read().await.channels.clone()
    }

    pub async fn register_channel(&self, channel: &str) -> Result<()> {
        let channel = channel.to_lowercase();
        let mut data = self.data.write().await;
        if data.channels.contains(&channel) {
            return Ok(());
        }
        debug!(%channel, "registering channel");
        data.channels.push(channel);
        self.persist(&data).await
    }

    pub async fn unregister_channel(&self, channel: &str) -> Result<()> {
        let channel = channel.to_lowercase();
        let mut data = self.data.write().await;
        data.channels.retain(|c| c != &channel);
        self.persist(&data).await
    }

    async fn persist(&self, data: &StoreData) -> Result<()> {
        let raw = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(login: &str, token: &str) -> LinkedUser {
        LinkedUser {
            twitch_login: login.into(),
            manifold_username: format!("mf_{login}"),
            api_key: "key".into(),
            control_token: token.into(),
        }
    }

    async fn store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::load(dir.path().join("store.json")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let (_dir, store) = store().await;
        assert!(store.registered_channels().await.is_empty());
        assert!(store.user_for_control_token("x").await.is_none());
    }

    #[tokio::test]
    async fn test_token_and_login_lookups() {
        let (_dir, store) = store().await;
        store.upsert_user(user("alice", "tok-1")).await.unwrap();

        let found = store.user_for_control_token("tok-1").await.unwrap();
        assert_eq!(found.twitch_login, "alice");
        // Login lookup is case-insensitive; tokens are exact.
        assert!(store.user_for_twitch_login("ALICE").await.is_some());
        assert!(store.user_for_control_token("TOK-1").await.is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_login() {
        let (_dir, store) = store().await;
        store.upsert_user(user("alice", "tok-1")).await.unwrap();
        store.upsert_user(user("alice", "tok-2")).await.unwrap();

        assert!(store.user_for_control_token("tok-1").await.is_none());
        assert!(store.user_for_control_token("tok-2").await.is_some());
    }

    #[tokio::test]
    async fn test_channels_persist_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = UserStore::load(&path).await.unwrap();
        store.register_channel("Alice").await.unwrap();
        store.register_channel("alice").await.unwrap();
        store.register_channel("bob").await.unwrap();
        store.unregister_channel("bob").await.unwrap();

        let reloaded = UserStore::load(&path).await.unwrap();
        assert_eq!(reloaded.registered_channels().await, vec!["alice"]);
    }
}
