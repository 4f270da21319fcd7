//! Source adapter implementations

pub mod coinbase;
pub mod coingecko;
pub mod kraken;

pub use coinbase::CoinbaseSource;
pub use coingecko::CoinGeckoSource;
pub use kraken::KrakenSource;
