//! Coinduel Match Service
//!
//! PvP price duels: two wallets each back a coin, live Pyth prices
//! decide the winner when the match window closes.
//!
//! # Usage
//!
//! ```bash
//! cargo run
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use coinduel::{
    run_gateway, Asset, Config, FeedEvent, MatchStore, PriceBook, PriceSource, PriceUpdate,
    PythClient, Settlement,
};

/// Assets available for duels.
const ASSETS: &[Asset] = &[Asset::Sol, Asset::Btc, Asset::Eth];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let config = Config::from_env();

    info!("Starting Coinduel match service");
    info!(
        "Tracking assets: {}",
        ASSETS
            .iter()
            .map(|a| a.symbol())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let book = Arc::new(PriceBook::with_staleness(config.staleness_secs));
    let source: Arc<dyn PriceSource> = book.clone();
    let store = Arc::new(MatchStore::new(source.clone(), config.tie_policy));

    // Broadcast channel fanning price ticks out to gateway clients
    let (price_tx, _) = broadcast::channel::<PriceUpdate>(256);

    // Channel for Pyth client events
    let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(256);

    let mut pyth_client = PythClient::with_url(event_tx, ASSETS.to_vec(), &config.hermes_url);

    // Seed the book so matches can activate before the stream warms up
    match pyth_client.fetch_latest().await {
        Ok(updates) => {
            for update in &updates {
                book.record(update);
            }
            info!("Seeded {} initial prices", updates.len());
        }
        Err(e) => warn!("Could not fetch initial prices: {}", e),
    }

    // Start Pyth client
    tokio::spawn(async move {
        if let Err(e) = pyth_client.run().await {
            error!("Pyth client error: {}", e);
        }
    });

    // Start WebSocket gateway
    let addr = config.bind_addr.clone();
    let gateway_store = store.clone();
    let gateway_source = source.clone();
    let gateway_price_tx = price_tx.clone();
    tokio::spawn(async move {
        run_gateway(&addr, gateway_store, gateway_source, gateway_price_tx).await;
    });

    // Background sweeper settles expired matches nobody is watching
    if config.sweep_secs > 0 {
        let sweep_store = store.clone();
        let sweep_secs = config.sweep_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweep_secs));
            loop {
                interval.tick().await;
                let now = chrono::Utc::now().timestamp();

                for m in sweep_store.active_matches() {
                    if !m.expired(now) {
                        continue;
                    }
                    match sweep_store.finalize(m.id, now) {
                        Ok((_, Settlement::StillTied)) => {}
                        Ok((row, settlement)) => {
                            info!("Swept match {}: {:?} -> {}", row.id, settlement, row.status);
                        }
                        Err(e) => debug!("Sweep skipped match {}: {}", m.id, e),
                    }
                }
            }
        });
    }

    // Process feed events
    let mut last_prices: HashMap<String, f64> = HashMap::new();

    while let Some(event) = event_rx.recv().await {
        match event {
            FeedEvent::Connected => {
                info!("Connected to Pyth Hermes");
            }
            FeedEvent::Disconnected => {
                warn!("Disconnected from Pyth Hermes");
            }
            FeedEvent::Price(update) => {
                book.record(&update);
                let _ = price_tx.send(update.clone());

                // Log price changes (avoid spamming on every update)
                let should_log = match last_prices.get(&update.symbol) {
                    Some(&last) => {
                        let pct_change = ((update.price - last) / last).abs();
                        pct_change > 0.001 // Log if > 0.1% change
                    }
                    None => true,
                };

                if should_log {
                    info!(
                        "{}: ${:.4} (conf: ${:.4}, samples: {})",
                        update.symbol,
                        update.price,
                        update.confidence,
                        book.sample_count(&update.symbol)
                    );
                    last_prices.insert(update.symbol.clone(), update.price);
                }
            }
            FeedEvent::Error { message } => {
                warn!("Feed error: {}", message);
            }
        }
    }

    Ok(())
}
