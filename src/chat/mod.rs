pub mod commands;
pub mod messages;
pub mod twitch;

use async_trait::async_trait;

/// Outbound chat delivery. Implemented by the Twitch transport; tests swap
/// in a capturing sink.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn say(&self, channel: &str, message: &str);
}

/// One inbound chat line with sender identity and role tags, as delivered
/// by the transport. Badge contents are trusted input.
#[derive(Debug, Clone)]
pub struct ChatLine {
    /// Channel name, lowercase, without the IRC '#' prefix.
    pub channel: String,
    pub username: String,
    pub display_name: String,
    /// Badge names from the message tags (e.g. "moderator", "subscriber").
    pub badges: Vec<String>,
    pub text: String,
}

impl ChatLine {
    /// Privileged commands require one of the elevated chat roles.
    pub fn is_privileged(&self) -> bool {
        self.badges.iter().any(|b| {
            matches!(
                b.as_str(),
                "moderator" | "admin" | "global_mod" | "broadcaster"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(badges: &[&str]) -> ChatLine {
        ChatLine {
            channel: "chan".into(),
            username: "alice".into(),
            display_name: "Alice".into(),
            badges: badges.iter().map(|b| b.to_string()).collect(),
            text: "!help".into(),
        }
    }

    #[test]
    fn test_privilege_badges() {
        assert!(line(&["moderator"]).is_privileged());
        assert!(line(&["broadcaster", "subscriber"]).is_privileged());
        assert!(!line(&["subscriber", "vip"]).is_privileged());
        assert!(!line(&[]).is_privileged());
    }
}
