//! Match operation errors.
//!
//! Every variant is recoverable: the caller gets an error, the row is
//! untouched, and the same call can be retried once the condition
//! clears. Operations never partially apply.

use coinduel_types::MatchStatus;

use crate::feed::FeedError;

/// Errors returned by match operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("Cannot {action} in status {from}")]
    InvalidTransition {
        from: MatchStatus,
        action: &'static str,
    },

    #[error("Match already has an opponent")]
    AlreadyJoined,

    #[error("Coin already selected for this side")]
    AlreadySelected,

    #[error("Creator cannot join their own match")]
    SelfJoin,

    #[error("Unsupported coin symbol: {0}")]
    InvalidCoin(String),

    #[error("No price available for {0}")]
    PriceUnavailable(String),

    #[error("Price for {symbol} is stale ({age_secs}s old)")]
    StalePrice { symbol: String, age_secs: i64 },

    #[error("Match window still open for another {remaining_secs}s")]
    NotYetExpired { remaining_secs: i64 },

    #[error("No such match")]
    NotFound,

    #[error("Wallet is not a participant in this match")]
    NotParticipant,

    #[error("Invalid match duration: {0}s")]
    InvalidDuration(i64),
}

impl From<FeedError> for MatchError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::UnknownSymbol(symbol) => MatchError::InvalidCoin(symbol),
            FeedError::Unavailable(symbol) => MatchError::PriceUnavailable(symbol),
            FeedError::Stale { symbol, age_secs } => MatchError::StalePrice { symbol, age_secs },
        }
    }
}
