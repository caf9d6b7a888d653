//! Pyth Hermes client for streaming price updates.
//!
//! Connects to Pyth's Hermes API via Server-Sent Events (SSE) to
//! receive real-time price updates for the tracked assets.

use eventsource_client::{Client, SSE};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use coinduel_types::{Asset, PriceUpdate};

/// Default Hermes API endpoint.
pub const HERMES_URL: &str = "https://hermes.pyth.network";

/// Seconds between reconnect attempts.
const RECONNECT_SECS: u64 = 5;

/// Events emitted by the feed client.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Connected to Pyth
    Connected,

    /// Disconnected from Pyth
    Disconnected,

    /// A new price update was received
    Price(PriceUpdate),

    /// An error occurred
    Error { message: String },
}

/// Response from the one-shot latest-price endpoint.
#[derive(Debug, Deserialize)]
struct LatestResponse {
    parsed: Vec<ParsedFeed>,
}

/// SSE frame from the Hermes streaming endpoint.
#[derive(Debug, Deserialize)]
struct StreamFrame {
    parsed: Vec<ParsedFeed>,
}

#[derive(Debug, Deserialize)]
struct ParsedFeed {
    id: String,
    price: RawPrice,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

/// Client for Pyth Hermes API.
pub struct PythClient {
    event_tx: mpsc::Sender<FeedEvent>,
    assets: Vec<Asset>,
    hermes_url: String,
}

impl PythClient {
    /// Create a new Pyth client.
    pub fn new(event_tx: mpsc::Sender<FeedEvent>, assets: Vec<Asset>) -> Self {
        Self {
            event_tx,
            assets,
            hermes_url: HERMES_URL.to_string(),
        }
    }

    /// Create a new Pyth client with a custom Hermes URL.
    pub fn with_url(event_tx: mpsc::Sender<FeedEvent>, assets: Vec<Asset>, url: &str) -> Self {
        Self {
            event_tx,
            assets,
            hermes_url: url.trim_end_matches('/').to_string(),
        }
    }

    /// Run the client, streaming price updates indefinitely.
    /// Automatically reconnects on disconnect.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match self.stream_once().await {
                Ok(()) => {
                    info!("Pyth connection closed gracefully");
                }
                Err(e) => {
                    error!("Pyth connection error: {}", e);
                    let _ = self
                        .event_tx
                        .send(FeedEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }

            let _ = self.event_tx.send(FeedEvent::Disconnected).await;

            info!("Reconnecting to Pyth in {} seconds...", RECONNECT_SECS);
            tokio::time::sleep(tokio::time::Duration::from_secs(RECONNECT_SECS)).await;
        }
    }

    /// Fetch the latest price for all configured assets (one-shot).
    pub async fn fetch_latest(&self) -> anyhow::Result<Vec<PriceUpdate>> {
        let url = format!(
            "{}/v2/updates/price/latest?{}",
            self.hermes_url,
            self.feed_query()
        );
        debug!("Fetching latest prices from: {}", url);

        let response = reqwest::get(&url).await?;
        let data: LatestResponse = response.json().await?;

        Ok(data.parsed.into_iter().filter_map(decode_feed).collect())
    }

    async fn stream_once(&mut self) -> anyhow::Result<()> {
        let url = format!(
            "{}/v2/updates/price/stream?{}",
            self.hermes_url,
            self.feed_query()
        );
        info!("Connecting to Pyth Hermes SSE stream: {}", url);

        let client = eventsource_client::ClientBuilder::for_url(&url)?.build();
        let mut stream = client.stream();

        let _ = self.event_tx.send(FeedEvent::Connected).await;
        info!("Connected to Pyth Hermes");

        while let Some(event) = stream.next().await {
            match event {
                Ok(SSE::Event(ev)) => {
                    if ev.event_type == "message" {
                        match serde_json::from_str::<StreamFrame>(&ev.data) {
                            Ok(frame) => {
                                for parsed in frame.parsed {
                                    if let Some(update) = decode_feed(parsed) {
                                        debug!(
                                            "{}: ${:.4} (conf: ${:.4})",
                                            update.symbol, update.price, update.confidence
                                        );
                                        let _ =
                                            self.event_tx.send(FeedEvent::Price(update)).await;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Failed to parse SSE data: {} - {}", e, ev.data);
                            }
                        }
                    }
                }
                Ok(SSE::Comment(_)) | Ok(SSE::Connected(_)) => {
                    // Heartbeat or connection confirmation, ignore
                }
                Err(e) => {
                    error!("SSE stream error: {}", e);
                    return Err(anyhow::anyhow!("SSE stream error: {}", e));
                }
            }
        }

        Ok(())
    }

    fn feed_query(&self) -> String {
        self.assets
            .iter()
            .map(|a| format!("ids[]={}", a.feed_id()))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Decode one parsed Hermes feed into a price update.
/// Returns None for untracked feeds and malformed numbers.
fn decode_feed(parsed: ParsedFeed) -> Option<PriceUpdate> {
    let feed_id = normalize_feed_id(&parsed.id);
    let asset = Asset::from_feed_id(&feed_id)?;

    let price_raw: i64 = parsed.price.price.parse().ok()?;
    let conf_raw: i64 = parsed.price.conf.parse().ok()?;

    // expo is negative (e.g., -8), so price = raw * 10^expo
    let multiplier = 10f64.powi(parsed.price.expo);

    Some(PriceUpdate {
        symbol: asset.symbol().to_string(),
        price: (price_raw as f64) * multiplier,
        confidence: (conf_raw as f64) * multiplier,
        publish_time: parsed.price.publish_time,
        feed_id,
    })
}

/// Hermes omits the 0x prefix; the asset registry keys on the prefixed
/// lowercase form.
fn normalize_feed_id(id: &str) -> String {
    let lower = id.to_lowercase();
    if lower.starts_with("0x") {
        lower
    } else {
        format!("0x{}", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_feed(id: &str, price: &str, conf: &str, expo: i32) -> ParsedFeed {
        ParsedFeed {
            id: id.to_string(),
            price: RawPrice {
                price: price.to_string(),
                conf: conf.to_string(),
                expo,
                publish_time: 1_700_000_000,
            },
        }
    }

    #[test]
    fn test_decode_feed() {
        let id = Asset::Btc.feed_id().trim_start_matches("0x");
        let update = decode_feed(make_feed(id, "6234598000000", "1000000", -8)).unwrap();

        assert_eq!(update.symbol, "BTC");
        assert!((update.price - 62_345.98).abs() < 1e-6);
        assert!((update.confidence - 0.01).abs() < 1e-9);
        assert_eq!(update.publish_time, 1_700_000_000);
        assert_eq!(update.feed_id, Asset::Btc.feed_id());
    }

    #[test]
    fn test_decode_untracked_feed() {
        assert!(decode_feed(make_feed("0xdeadbeef", "1", "1", 0)).is_none());
    }

    #[test]
    fn test_decode_malformed_price() {
        let id = Asset::Eth.feed_id();
        assert!(decode_feed(make_feed(id, "not-a-number", "1", -8)).is_none());
    }

    #[test]
    fn test_normalize_feed_id() {
        assert_eq!(normalize_feed_id("0xABCD"), "0xabcd");
        assert_eq!(normalize_feed_id("abcd"), "0xabcd");
        assert_eq!(normalize_feed_id("0xabcd"), "0xabcd");
    }
}
