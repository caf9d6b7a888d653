//! Core domain logic for the Coinduel match service.
//!
//! A match is a PvP price duel: two wallets each pick a coin, and the
//! bigger percentage gain over the match window wins. This crate holds
//! the lifecycle state machine, the transactional match store, the
//! realtime change notifier, and the Pyth-backed price book.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use coinduel_core::{MatchStore, PriceBook, TiePolicy};
//! use coinduel_types::PriceUpdate;
//!
//! let book = Arc::new(PriceBook::new());
//! book.record(&PriceUpdate {
//!     symbol: "BTC".to_string(),
//!     price: 50_000.0,
//!     confidence: 5.0,
//!     publish_time: 1_000,
//!     feed_id: "0xe62d".to_string(),
//! });
//!
//! let store = MatchStore::new(book.clone(), TiePolicy::default());
//! let m = store.create("wallet-a", 60).unwrap();
//! assert!(store.get(m.id).is_ok());
//! ```

pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod notify;
pub mod pyth;
pub mod store;

pub use error::MatchError;
pub use feed::{FeedError, PriceBook, PriceSource, DEFAULT_STALENESS_SECS, HISTORY_CAPACITY};
pub use lifecycle::{Outcome, TiePolicy, Transition, DRAW_REASON, TIE_TOLERANCE};
pub use notify::{MatchNotifier, Subscription, CHANGE_BUFFER};
pub use pyth::{FeedEvent, PythClient, HERMES_URL};
pub use store::{MatchStore, MAX_DURATION_SECS};
