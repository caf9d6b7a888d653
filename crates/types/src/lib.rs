//! Domain and wire types for the Coinduel match service.
//!
//! Everything here crosses a boundary: rows handed to change-feed
//! subscribers, JSON sent over the gateway, price updates from Pyth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Created, waiting for a second wallet to join.
    WaitingForOpponent,

    /// Both wallets present, coins not yet locked in.
    SelectingCoins,

    /// Both coins locked, start prices captured, clock running.
    Active,

    /// Settled with a winner.
    Completed,

    /// Ended without a winner (user cancel or voided draw).
    Cancelled,
}

impl MatchStatus {
    /// Returns true once the match can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Cancelled)
    }

    /// Returns true while the clock is running.
    pub fn is_active(&self) -> bool {
        matches!(self, MatchStatus::Active)
    }

    /// Returns the snake_case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::WaitingForOpponent => "waiting_for_opponent",
            MatchStatus::SelectingCoins => "selecting_coins",
            MatchStatus::Active => "active",
            MatchStatus::Completed => "completed",
            MatchStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which seat a wallet occupies in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Creator,
    Opponent,
}

impl Side {
    /// Returns the opposite seat.
    pub fn other(&self) -> Side {
        match self {
            Side::Creator => Side::Opponent,
            Side::Opponent => Side::Creator,
        }
    }
}

/// A single PvP price duel.
///
/// Two wallets each pick a coin; whoever's coin gains more over the
/// match window wins. This row is the unit of storage and of change
/// notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Unique match id.
    pub id: Uuid,

    /// Short shareable code the opponent joins with.
    pub invite_code: String,

    /// Wallet address of the match creator.
    pub creator_wallet: String,

    /// Wallet address of the opponent, set on join.
    pub opponent_wallet: Option<String>,

    /// Creator's chosen coin symbol (e.g., "BTC"), set during selection.
    pub creator_coin: Option<String>,

    /// Opponent's chosen coin symbol, set during selection.
    pub opponent_coin: Option<String>,

    /// Current lifecycle state.
    pub status: MatchStatus,

    /// Length of the active window in seconds.
    pub duration_seconds: i64,

    /// Unix timestamp (seconds) when the match went active.
    pub start_time: Option<i64>,

    /// Creator coin price captured at activation. Never rewritten.
    pub start_price_creator: Option<f64>,

    /// Opponent coin price captured at activation. Never rewritten.
    pub start_price_opponent: Option<f64>,

    /// Winning wallet, set if and only if status is completed.
    pub winner_wallet: Option<String>,

    /// Why the match was cancelled, when it was.
    pub cancel_reason: Option<String>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// Unix timestamp in milliseconds of the last applied write.
    /// Strictly increasing per match; on replay, readers keep the row
    /// with the larger value.
    pub updated_at: i64,
}

impl Match {
    /// Create a fresh match waiting for an opponent.
    pub fn new(id: Uuid, invite_code: String, creator_wallet: String, duration_seconds: i64) -> Self {
        Self {
            id,
            invite_code,
            creator_wallet,
            opponent_wallet: None,
            creator_coin: None,
            opponent_coin: None,
            status: MatchStatus::WaitingForOpponent,
            duration_seconds,
            start_time: None,
            start_price_creator: None,
            start_price_opponent: None,
            winner_wallet: None,
            cancel_reason: None,
            created_at: Utc::now(),
            updated_at: 0,
        }
    }

    /// Returns the wallet seated on the given side, if present.
    pub fn wallet(&self, side: Side) -> Option<&str> {
        match side {
            Side::Creator => Some(self.creator_wallet.as_str()),
            Side::Opponent => self.opponent_wallet.as_deref(),
        }
    }

    /// Returns the coin chosen by the given side, if any.
    pub fn coin(&self, side: Side) -> Option<&str> {
        match side {
            Side::Creator => self.creator_coin.as_deref(),
            Side::Opponent => self.opponent_coin.as_deref(),
        }
    }

    /// Returns which seat a wallet occupies, or None for strangers.
    pub fn side_of(&self, wallet: &str) -> Option<Side> {
        if self.creator_wallet == wallet {
            Some(Side::Creator)
        } else if self.opponent_wallet.as_deref() == Some(wallet) {
            Some(Side::Opponent)
        } else {
            None
        }
    }

    /// Unix timestamp (seconds) when the active window closes.
    /// None until the match has started, or if the sum would overflow.
    pub fn deadline(&self) -> Option<i64> {
        self.start_time
            .and_then(|t| t.checked_add(self.duration_seconds))
    }

    /// Returns true for an active match whose window has closed.
    pub fn expired(&self, now: i64) -> bool {
        self.status.is_active() && self.deadline().is_some_and(|d| now >= d)
    }
}

/// Supported assets and their Pyth feed IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Asset {
    Sol,
    Btc,
    Eth,
}

impl Asset {
    /// Returns the Pyth price feed ID for this asset.
    pub fn feed_id(&self) -> &'static str {
        match self {
            Asset::Sol => "0xef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d",
            Asset::Btc => "0xe62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43",
            Asset::Eth => "0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace",
        }
    }

    /// Returns the symbol string for this asset.
    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Sol => "SOL",
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
        }
    }

    /// Parse an asset from its symbol, case-insensitive.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.to_ascii_uppercase().as_str() {
            "SOL" => Some(Asset::Sol),
            "BTC" => Some(Asset::Btc),
            "ETH" => Some(Asset::Eth),
            _ => None,
        }
    }

    /// Parse an asset from its feed ID.
    pub fn from_feed_id(feed_id: &str) -> Option<Self> {
        match feed_id {
            id if id == Asset::Sol.feed_id() => Some(Asset::Sol),
            id if id == Asset::Btc.feed_id() => Some(Asset::Btc),
            id if id == Asset::Eth.feed_id() => Some(Asset::Eth),
            _ => None,
        }
    }

    /// Returns all supported assets.
    pub fn all() -> &'static [Asset] {
        &[Asset::Sol, Asset::Btc, Asset::Eth]
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A price update from Pyth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// The asset symbol (e.g., "SOL", "BTC", "ETH")
    pub symbol: String,

    /// Price in USD (as f64 for simplicity; production may use fixed-point)
    pub price: f64,

    /// Confidence interval (+/- this amount)
    pub confidence: f64,

    /// Unix timestamp in seconds when this price was published
    pub publish_time: i64,

    /// The Pyth feed ID (hex string)
    pub feed_id: String,
}

/// What kind of write produced a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A change-feed notification carrying the full row after the write.
/// For deletes, `row` is the last state the match had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchChange {
    pub op: ChangeOp,
    pub row: Match,
}

/// Outcome of settling an expired match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Settlement {
    /// One side gained strictly more; the match is completed.
    Winner { wallet: String },

    /// The match ended in a dead heat and was voided.
    Voided { reason: String },

    /// Dead heat under the rollover policy; the match stays active.
    StillTied,
}

/// Live standing of an active match, recomputed from current prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchView {
    /// The match this view describes.
    pub match_id: Uuid,

    /// Creator coin percentage change since the start price.
    pub creator_pct: f64,

    /// Opponent coin percentage change since the start price.
    pub opponent_pct: f64,

    /// Wallet currently ahead, or None on a dead heat.
    pub leader_wallet: Option<String>,

    /// Seconds left in the active window, floored at zero.
    pub seconds_remaining: i64,
}

/// Commands clients send over the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Open a new match and receive its invite code.
    CreateMatch { wallet: String, duration_seconds: i64 },

    /// Take the opponent seat in a match by invite code.
    JoinMatch { invite_code: String, wallet: String },

    /// Lock in a coin for the calling wallet's side.
    SelectCoin {
        match_id: Uuid,
        wallet: String,
        symbol: String,
    },

    /// Settle an expired match.
    Finalize { match_id: Uuid },

    /// Cancel a match that has not gone active yet.
    Cancel {
        match_id: Uuid,
        wallet: String,
        reason: Option<String>,
    },

    /// Start receiving state and view updates for a match.
    Watch { match_id: Uuid },

    /// Stop receiving updates for a match.
    Unwatch { match_id: Uuid },
}

/// Events the gateway sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Handshake complete, commands accepted from here on.
    Connected,

    /// Full state of a match after a write or on watch.
    MatchState(Match),

    /// Live standing of a watched active match.
    View(MatchView),

    /// A price tick for a coin involved in a watched match.
    Price(PriceUpdate),

    /// An expired match was settled.
    Settled { match_id: Uuid, settlement: Settlement },

    /// A command failed.
    Error { message: String },
}
