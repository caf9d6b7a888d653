//! Coinduel Match Service
//!
//! This crate runs PvP price duels over live Pyth Network prices: two
//! wallets each back a coin, and whichever coin gains more over the
//! match window wins.
//!
//! # Features
//!
//! - **Real-time price streaming** via Pyth Hermes SSE API
//! - **Transactional match store** with a change feed for live clients
//! - **WebSocket gateway** accepting match commands as JSON
//! - **Multi-asset support** (SOL, BTC, ETH)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use coinduel::{Asset, FeedEvent, PriceBook, PythClient};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, mut rx) = mpsc::channel(256);
//!     let book = Arc::new(PriceBook::new());
//!
//!     let mut client = PythClient::new(tx, Asset::all().to_vec());
//!     tokio::spawn(async move { client.run().await });
//!
//!     while let Some(event) = rx.recv().await {
//!         if let FeedEvent::Price(update) = event {
//!             book.record(&update);
//!             println!("{}: ${:.2}", update.symbol, update.price);
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod server;
pub mod session;

pub use config::Config;
pub use server::run_gateway;
pub use session::Session;

pub use coinduel_core::{
    lifecycle, FeedError, FeedEvent, MatchError, MatchNotifier, MatchStore, Outcome, PriceBook,
    PriceSource, PythClient, Subscription, TiePolicy, HERMES_URL,
};
pub use coinduel_types::{
    Asset, ChangeOp, ClientCommand, GatewayEvent, Match, MatchChange, MatchStatus, MatchView,
    PriceUpdate, Settlement, Side,
};
