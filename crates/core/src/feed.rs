//! In-memory price book fed by the Pyth stream.
//!
//! Keeps the latest price per asset plus a bounded history ring so
//! settlement can look up the price closest to a past timestamp.

use std::collections::VecDeque;

use dashmap::DashMap;
use tracing::debug;

use coinduel_types::{Asset, PriceUpdate};

/// Default staleness threshold in seconds. A latest price older than
/// this is an error, not an answer.
pub const DEFAULT_STALENESS_SECS: i64 = 10;

/// Maximum history samples kept per asset (one per publish second).
pub const HISTORY_CAPACITY: usize = 4096;

/// Errors returned by price lookups.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("No price recorded yet for {0}")]
    Unavailable(String),

    #[error("Price for {symbol} is {age_secs}s old")]
    Stale { symbol: String, age_secs: i64 },
}

/// Read access to current and historical prices.
pub trait PriceSource: Send + Sync {
    /// Latest price for a symbol. Fails if nothing was recorded or the
    /// latest update is older than the staleness threshold at `now`.
    fn price(&self, symbol: &str, now: i64) -> Result<PriceUpdate, FeedError>;

    /// Recorded price closest to the given Unix timestamp.
    fn price_at(&self, symbol: &str, ts: i64) -> Result<PriceUpdate, FeedError>;
}

/// Price cache that accumulates updates from the feed.
///
/// Shared between the ingest task and match operations, so all methods
/// take `&self`.
pub struct PriceBook {
    /// Latest update per asset.
    latest: DashMap<Asset, PriceUpdate>,

    /// Bounded history per asset, oldest first.
    history: DashMap<Asset, VecDeque<PriceUpdate>>,

    /// Staleness threshold in seconds for `price`.
    staleness_secs: i64,
}

impl PriceBook {
    /// Create a price book with the default staleness threshold.
    pub fn new() -> Self {
        Self::with_staleness(DEFAULT_STALENESS_SECS)
    }

    /// Create a price book with a custom staleness threshold.
    pub fn with_staleness(staleness_secs: i64) -> Self {
        Self {
            latest: DashMap::new(),
            history: DashMap::new(),
            staleness_secs,
        }
    }

    /// Record a price update.
    /// Returns true if a new history sample was recorded.
    pub fn record(&self, update: &PriceUpdate) -> bool {
        let Some(asset) = Asset::from_symbol(&update.symbol) else {
            debug!("Ignoring update for untracked symbol {}", update.symbol);
            return false;
        };

        // Hermes can replay older frames after a reconnect; the latest
        // price never goes backwards.
        if let Some(current) = self.latest.get(&asset) {
            if update.publish_time < current.publish_time {
                return false;
            }
        }
        self.latest.insert(asset, update.clone());

        // At most one history sample per publish second.
        let mut ring = self.history.entry(asset).or_default();
        if let Some(last) = ring.back() {
            if update.publish_time - last.publish_time < 1 {
                return false;
            }
        }
        if ring.len() >= HISTORY_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(update.clone());

        true
    }

    /// Get the current number of history samples for an asset.
    pub fn sample_count(&self, symbol: &str) -> usize {
        Asset::from_symbol(symbol)
            .and_then(|asset| self.history.get(&asset).map(|ring| ring.len()))
            .unwrap_or(0)
    }

    /// Drop all history samples older than the given timestamp.
    pub fn prune(&self, before: i64) {
        for mut entry in self.history.iter_mut() {
            let original_len = entry.len();
            entry.retain(|s| s.publish_time >= before);
            let pruned = original_len - entry.len();
            if pruned > 0 {
                debug!("Pruned {} old samples for {}", pruned, entry.key());
            }
        }
    }
}

impl Default for PriceBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceSource for PriceBook {
    fn price(&self, symbol: &str, now: i64) -> Result<PriceUpdate, FeedError> {
        let asset = Asset::from_symbol(symbol)
            .ok_or_else(|| FeedError::UnknownSymbol(symbol.to_string()))?;

        let update = self
            .latest
            .get(&asset)
            .map(|u| u.clone())
            .ok_or_else(|| FeedError::Unavailable(symbol.to_string()))?;

        let age_secs = now - update.publish_time;
        if age_secs > self.staleness_secs {
            return Err(FeedError::Stale {
                symbol: update.symbol,
                age_secs,
            });
        }

        Ok(update)
    }

    fn price_at(&self, symbol: &str, ts: i64) -> Result<PriceUpdate, FeedError> {
        let asset = Asset::from_symbol(symbol)
            .ok_or_else(|| FeedError::UnknownSymbol(symbol.to_string()))?;

        let ring = self
            .history
            .get(&asset)
            .ok_or_else(|| FeedError::Unavailable(symbol.to_string()))?;

        ring.iter()
            .min_by_key(|s| (s.publish_time - ts).abs())
            .cloned()
            .ok_or_else(|| FeedError::Unavailable(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_update(symbol: &str, price: f64, timestamp: i64) -> PriceUpdate {
        PriceUpdate {
            symbol: symbol.to_string(),
            price,
            confidence: 0.01,
            publish_time: timestamp,
            feed_id: "0x123".to_string(),
        }
    }

    #[test]
    fn test_record_and_price() {
        let book = PriceBook::new();
        assert!(book.record(&make_update("BTC", 50_000.0, 1_000)));

        let update = book.price("BTC", 1_005).unwrap();
        assert_eq!(update.price, 50_000.0);

        // Symbol lookup is case-insensitive.
        let update = book.price("btc", 1_005).unwrap();
        assert_eq!(update.symbol, "BTC");
    }

    #[test]
    fn test_unknown_symbol() {
        let book = PriceBook::new();
        assert_eq!(
            book.price("DOGE", 1_000),
            Err(FeedError::UnknownSymbol("DOGE".to_string()))
        );
        assert!(!book.record(&make_update("DOGE", 0.1, 1_000)));
    }

    #[test]
    fn test_price_unavailable() {
        let book = PriceBook::new();
        assert_eq!(
            book.price("BTC", 1_000),
            Err(FeedError::Unavailable("BTC".to_string()))
        );
    }

    #[test]
    fn test_stale_price() {
        let book = PriceBook::new();
        book.record(&make_update("BTC", 50_000.0, 1_000));

        // Exactly at the threshold is still good.
        assert!(book.price("BTC", 1_010).is_ok());

        assert_eq!(
            book.price("BTC", 1_011),
            Err(FeedError::Stale {
                symbol: "BTC".to_string(),
                age_secs: 11,
            })
        );
    }

    #[test]
    fn test_out_of_order_updates_dropped() {
        let book = PriceBook::new();
        assert!(book.record(&make_update("ETH", 3_000.0, 1_000)));
        assert!(!book.record(&make_update("ETH", 2_990.0, 999)));

        let update = book.price("ETH", 1_001).unwrap();
        assert_eq!(update.price, 3_000.0);
    }

    #[test]
    fn test_one_sample_per_second() {
        let book = PriceBook::new();
        assert!(book.record(&make_update("SOL", 200.0, 1_000)));
        assert!(!book.record(&make_update("SOL", 200.5, 1_000)));
        assert!(book.record(&make_update("SOL", 201.0, 1_001)));

        assert_eq!(book.sample_count("SOL"), 2);

        // The same-second update still refreshed the latest price.
        let update = book.price("SOL", 1_001).unwrap();
        assert_eq!(update.price, 201.0);
    }

    #[test]
    fn test_price_at_nearest() {
        let book = PriceBook::new();
        for i in 0..10 {
            book.record(&make_update("SOL", 200.0 + i as f64, 1_000 + i));
        }

        let update = book.price_at("SOL", 1_003).unwrap();
        assert_eq!(update.price, 203.0);

        // Past the last sample snaps to the newest one.
        let update = book.price_at("SOL", 5_000).unwrap();
        assert_eq!(update.price, 209.0);

        // Before the first sample snaps to the oldest one.
        let update = book.price_at("SOL", 0).unwrap();
        assert_eq!(update.price, 200.0);
    }

    #[test]
    fn test_prune_old_samples() {
        let book = PriceBook::new();
        for i in 0..100 {
            book.record(&make_update("SOL", 200.0, 1_000 + i));
        }
        assert_eq!(book.sample_count("SOL"), 100);

        book.prune(1_050);
        assert_eq!(book.sample_count("SOL"), 50);
    }

    #[test]
    fn test_history_capacity() {
        let book = PriceBook::new();
        for i in 0..(HISTORY_CAPACITY as i64 + 10) {
            book.record(&make_update("BTC", 50_000.0, 1_000 + i));
        }
        assert_eq!(book.sample_count("BTC"), HISTORY_CAPACITY);

        // The oldest samples are the ones that fell off.
        let update = book.price_at("BTC", 0).unwrap();
        assert_eq!(update.publish_time, 1_010);
    }
}
