use serde::Deserialize;
use std::env;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub twitch: Twitch,
    pub manifold: Manifold,
    pub server: Server,
    pub general: General,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Twitch {
    pub username: String,
    /// OAuth token without the "oauth:" prefix. Overridable via
    /// TWITCH_OAUTH_TOKEN to keep it out of the config file.
    pub oauth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifold {
    pub api_base: String,
    pub signup_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
    pub store_path: String,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        if let Ok(token) = env::var("TWITCH_OAUTH_TOKEN") {
            config.twitch.oauth_token = token;
        }
        Ok(config)
    }
}
