use serde::{Deserialize, Serialize};

/// The two sides of a binary market bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

/// How a binary market was (or will be) resolved.
///
/// `Prob` exists on the backend but is not a valid target for the chat or
/// dock resolve paths; resolving to it is rejected as an invalid outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
    Cancel,
    Prob,
}

impl Outcome {
    /// Map a user-supplied resolution token. `NA` and `N/A` are accepted
    /// aliases for `CANCEL`. Matching is case-insensitive.
    pub fn from_token(token: &str) -> Option<Outcome> {
        match token.to_uppercase().as_str() {
            "YES" => Some(Outcome::Yes),
            "NO" => Some(Outcome::No),
            "CANCEL" | "NA" | "N/A" => Some(Outcome::Cancel),
            "PROB" => Some(Outcome::Prob),
            _ => None,
        }
    }

    /// Winning bet side for this outcome, if there is one.
    pub fn winning_side(&self) -> Option<Side> {
        match self {
            Outcome::Yes => Some(Side::Yes),
            Outcome::No => Some(Side::No),
            Outcome::Cancel | Outcome::Prob => None,
        }
    }

    /// Display form used in chat announcements. `CANCEL` reads as `N/A`.
    pub fn display(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
            Outcome::Cancel => "N/A",
            Outcome::Prob => "PROB",
        }
    }
}
