mod outcome;
mod session;

pub use outcome::{Outcome, Side};
pub use session::{compute_top_winners, MarketSession, ResolveData, Winner, MAX_TOP_WINNERS};
