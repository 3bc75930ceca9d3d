//! Chat reply templates. Mana amounts are floored to whole M$.

use crate::state::ResolveData;

pub fn signup(username: &str, signup_url: &str) -> String {
    format!("Hello {username}! Click here to play: {signup_url}!")
}

pub fn help(signup_url: &str) -> String {
    format!("Check out the full list of commands and how to play here: {signup_url}")
}

pub fn balance(username: &str, balance: f64) -> String {
    format!("{username} currently has M${:.0}", balance.floor())
}

pub fn position(username: &str, shares: f64) -> String {
    let side = if shares == 0.0 {
        ""
    } else if shares > 0.0 {
        " YES"
    } else {
        " NO"
    };
    let magnitude = shares.abs();
    let plural = if magnitude == 1.0 { "" } else { "s" };
    format!("{username} has {magnitude:.0}{side} share{plural}.")
}

pub fn resolved(resolve: &ResolveData, market_url: &str) -> String {
    let mut message = format!("The market has resolved to {}!", resolve.outcome.display());
    if !resolve.top_winners.is_empty() {
        let list = resolve
            .top_winners
            .iter()
            .map(|w| format!("{} (+{:.0})", w.display_name, w.profit))
            .collect::<Vec<_>>()
            .join(", ");
        message.push_str(&format!(" The top bettors are {list}."));
    }
    message.push_str(&format!(" See the market here: {market_url}"));
    message
}

pub fn market_created(question: &str) -> String {
    format!("The market '{question}' has been created!")
}

pub fn market_unfeatured() -> String {
    "Market unfeatured.".to_string()
}

pub fn command_failed(username: &str, reason: &str) -> String {
    format!("Sorry {username} but that command failed: {reason}")
}

pub fn no_market(username: &str) -> String {
    format!("Sorry {username} but no market is currently active on this stream.")
}

pub fn not_enough_mana_bet(username: &str) -> String {
    format!("Sorry {username}, you don't have enough Mana to place that bet")
}

pub fn not_enough_mana_create(username: &str, balance: f64) -> String {
    format!(
        "Sorry {username}, the owner of this channel doesn't have enough Mana (M${:.0}/M$100) to create a market",
        balance.floor()
    )
}
