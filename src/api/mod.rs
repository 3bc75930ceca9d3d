pub mod manifold;

pub use manifold::{Bet, FullMarket, LiteMarket, LiteUser, ManifoldClient, MarketApi};
