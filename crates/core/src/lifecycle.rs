//! Match lifecycle state machine.
//!
//! Pure decision layer: every function takes the current row plus
//! inputs and returns an intended [`Transition`] or a typed error. The
//! store applies transitions under its per-match guard; nothing here
//! touches storage.
//!
//! States: waiting_for_opponent -> selecting_coins -> active ->
//! completed | cancelled (both terminal).

use coinduel_types::{Asset, Match, MatchStatus, Settlement, Side};

use crate::error::MatchError;
use crate::feed::PriceSource;

/// Relative tolerance for calling two percentage changes equal.
pub const TIE_TOLERANCE: f64 = 1e-9;

/// Cancel reason recorded when a dead heat is voided.
pub const DRAW_REASON: &str = "dead heat at expiry";

/// How finalize resolves a dead heat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiePolicy {
    /// Leave the match active; a later finalize tries again.
    Rollover,

    /// Void the match to cancelled, nobody wins.
    #[default]
    Draw,

    /// Award the tie to the creator.
    CreatorWins,
}

impl std::str::FromStr for TiePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rollover" => Ok(TiePolicy::Rollover),
            "draw" => Ok(TiePolicy::Draw),
            "creator_wins" | "creator-wins" => Ok(TiePolicy::CreatorWins),
            _ => Err(format!("Unknown tie policy: {}", s)),
        }
    }
}

/// An intended state change. Computed here, applied by the store.
/// Each variant carries exactly the fields that change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Opponent seat filled; match moves to coin selection.
    OpponentJoined { wallet: String },

    /// One side picked its coin; the other side is still pending.
    CoinChosen { side: Side, symbol: String },

    /// Final coin picked; the match goes active right now.
    Activated {
        side: Side,
        symbol: String,
        start_time: i64,
        start_price_creator: f64,
        start_price_opponent: f64,
    },

    /// Match settled with a winner.
    Completed { winner_wallet: String },

    /// Match ended without a winner.
    Cancelled { reason: Option<String> },
}

/// Result of evaluating an active match against current prices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    /// Creator coin percentage change since the start price.
    pub creator_pct: f64,

    /// Opponent coin percentage change since the start price.
    pub opponent_pct: f64,

    /// Side currently ahead, or None on a dead heat.
    pub leader: Option<Side>,
}

/// Seat an opponent in a waiting match.
///
/// A join-race loser observes the match already in selecting_coins and
/// gets `AlreadyJoined`.
pub fn join(m: &Match, wallet: &str) -> Result<Transition, MatchError> {
    match m.status {
        MatchStatus::WaitingForOpponent => {
            if m.creator_wallet == wallet {
                return Err(MatchError::SelfJoin);
            }
            Ok(Transition::OpponentJoined {
                wallet: wallet.to_string(),
            })
        }
        MatchStatus::SelectingCoins => Err(MatchError::AlreadyJoined),
        from => Err(MatchError::InvalidTransition {
            from,
            action: "join",
        }),
    }
}

/// Lock in a coin for one side.
///
/// The selection that completes the pair activates the match: start
/// time stamped at `now`, both start prices captured from `source` in
/// the same transition. A stale, missing, or nonpositive price aborts
/// the activation with no state change.
pub fn select_coin(
    m: &Match,
    side: Side,
    symbol: &str,
    source: &dyn PriceSource,
    now: i64,
) -> Result<Transition, MatchError> {
    if m.status != MatchStatus::SelectingCoins {
        return Err(MatchError::InvalidTransition {
            from: m.status,
            action: "select a coin",
        });
    }
    if m.coin(side).is_some() {
        return Err(MatchError::AlreadySelected);
    }

    let asset =
        Asset::from_symbol(symbol).ok_or_else(|| MatchError::InvalidCoin(symbol.to_string()))?;
    let symbol = asset.symbol().to_string();

    let other_symbol = match m.coin(side.other()) {
        None => return Ok(Transition::CoinChosen { side, symbol }),
        Some(s) => s.to_string(),
    };

    // Both coins known; capture start prices and go active.
    let (creator_symbol, opponent_symbol) = match side {
        Side::Creator => (symbol.clone(), other_symbol),
        Side::Opponent => (other_symbol, symbol.clone()),
    };
    let start_price_creator = start_price(source, &creator_symbol, now)?;
    let start_price_opponent = start_price(source, &opponent_symbol, now)?;

    Ok(Transition::Activated {
        side,
        symbol,
        start_time: now,
        start_price_creator,
        start_price_opponent,
    })
}

/// Fetch a live price fit to anchor a percentage change: finite and
/// strictly positive, since evaluation divides by it.
fn start_price(source: &dyn PriceSource, symbol: &str, now: i64) -> Result<f64, MatchError> {
    let update = source.price(symbol, now)?;
    if !update.price.is_finite() || update.price <= 0.0 {
        return Err(MatchError::PriceUnavailable(symbol.to_string()));
    }
    Ok(update.price)
}

/// Score an active match against current prices. Pure.
pub fn evaluate(
    m: &Match,
    creator_price: f64,
    opponent_price: f64,
) -> Result<Outcome, MatchError> {
    let err = MatchError::InvalidTransition {
        from: m.status,
        action: "evaluate",
    };
    if m.status != MatchStatus::Active {
        return Err(err);
    }
    let (Some(start_creator), Some(start_opponent)) =
        (m.start_price_creator, m.start_price_opponent)
    else {
        return Err(err);
    };

    let creator_pct = pct_change(start_creator, creator_price);
    let opponent_pct = pct_change(start_opponent, opponent_price);

    Ok(Outcome {
        creator_pct,
        opponent_pct,
        leader: leader_of(creator_pct, opponent_pct),
    })
}

/// Settle an expired match from its last evaluated outcome.
///
/// Time-gated by wall clock, not by a timer: `NotYetExpired` until
/// `now` reaches `start_time + duration_seconds`, however late the
/// call comes after that.
pub fn finalize(
    m: &Match,
    outcome: &Outcome,
    now: i64,
    policy: TiePolicy,
) -> Result<Settlement, MatchError> {
    let err = MatchError::InvalidTransition {
        from: m.status,
        action: "finalize",
    };
    if m.status != MatchStatus::Active {
        return Err(err);
    }
    let deadline = m.deadline().ok_or(err.clone())?;
    if now < deadline {
        return Err(MatchError::NotYetExpired {
            remaining_secs: deadline - now,
        });
    }

    let winner_side = match outcome.leader {
        Some(side) => side,
        None => match policy {
            TiePolicy::Rollover => return Ok(Settlement::StillTied),
            TiePolicy::Draw => {
                return Ok(Settlement::Voided {
                    reason: DRAW_REASON.to_string(),
                })
            }
            TiePolicy::CreatorWins => Side::Creator,
        },
    };

    let wallet = m.wallet(winner_side).ok_or(err)?.to_string();
    Ok(Settlement::Winner { wallet })
}

/// Cancel a match that has not gone active.
///
/// Forbidden from active on: a started match ends only through
/// finalize. Only a participant may cancel.
pub fn cancel(m: &Match, wallet: &str, reason: Option<String>) -> Result<Transition, MatchError> {
    match m.status {
        MatchStatus::WaitingForOpponent | MatchStatus::SelectingCoins => {
            if m.side_of(wallet).is_none() {
                return Err(MatchError::NotParticipant);
            }
            Ok(Transition::Cancelled { reason })
        }
        from => Err(MatchError::InvalidTransition {
            from,
            action: "cancel",
        }),
    }
}

fn pct_change(start: f64, current: f64) -> f64 {
    (current - start) / start * 100.0
}

fn leader_of(creator_pct: f64, opponent_pct: f64) -> Option<Side> {
    let diff = creator_pct - opponent_pct;
    // Relative tolerance with an absolute floor for near-zero deltas.
    let tol = TIE_TOLERANCE * creator_pct.abs().max(opponent_pct.abs()).max(1.0);
    if diff.abs() <= tol {
        None
    } else if diff > 0.0 {
        Some(Side::Creator)
    } else {
        Some(Side::Opponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::PriceBook;
    use coinduel_types::PriceUpdate;
    use uuid::Uuid;

    fn waiting() -> Match {
        Match::new(
            Uuid::new_v4(),
            "KX7P2Q".to_string(),
            "wallet-a".to_string(),
            60,
        )
    }

    fn selecting() -> Match {
        let mut m = waiting();
        m.opponent_wallet = Some("wallet-b".to_string());
        m.status = MatchStatus::SelectingCoins;
        m
    }

    fn active() -> Match {
        let mut m = selecting();
        m.creator_coin = Some("BTC".to_string());
        m.opponent_coin = Some("ETH".to_string());
        m.status = MatchStatus::Active;
        m.start_time = Some(1_000);
        m.start_price_creator = Some(50_000.0);
        m.start_price_opponent = Some(3_000.0);
        m
    }

    fn make_update(symbol: &str, price: f64, timestamp: i64) -> PriceUpdate {
        PriceUpdate {
            symbol: symbol.to_string(),
            price,
            confidence: 0.01,
            publish_time: timestamp,
            feed_id: "0x123".to_string(),
        }
    }

    fn stocked_book(now: i64) -> PriceBook {
        let book = PriceBook::new();
        book.record(&make_update("BTC", 50_000.0, now));
        book.record(&make_update("ETH", 3_000.0, now));
        book.record(&make_update("SOL", 200.0, now));
        book
    }

    #[test]
    fn test_join_seats_opponent() {
        let m = waiting();
        let t = join(&m, "wallet-b").unwrap();
        assert_eq!(
            t,
            Transition::OpponentJoined {
                wallet: "wallet-b".to_string()
            }
        );
    }

    #[test]
    fn test_join_rejects_creator() {
        let m = waiting();
        assert_eq!(join(&m, "wallet-a"), Err(MatchError::SelfJoin));
    }

    #[test]
    fn test_join_full_match() {
        let m = selecting();
        assert_eq!(join(&m, "wallet-c"), Err(MatchError::AlreadyJoined));
    }

    #[test]
    fn test_join_terminal_match() {
        let mut m = waiting();
        m.status = MatchStatus::Cancelled;
        assert_eq!(
            join(&m, "wallet-b"),
            Err(MatchError::InvalidTransition {
                from: MatchStatus::Cancelled,
                action: "join",
            })
        );
    }

    #[test]
    fn test_select_first_coin() {
        let m = selecting();
        let book = stocked_book(1_000);
        let t = select_coin(&m, Side::Creator, "btc", &book, 1_000).unwrap();
        // Symbol is stored canonically.
        assert_eq!(
            t,
            Transition::CoinChosen {
                side: Side::Creator,
                symbol: "BTC".to_string(),
            }
        );
    }

    #[test]
    fn test_select_twice_same_side() {
        let mut m = selecting();
        m.creator_coin = Some("BTC".to_string());
        let book = stocked_book(1_000);
        assert_eq!(
            select_coin(&m, Side::Creator, "ETH", &book, 1_000),
            Err(MatchError::AlreadySelected)
        );
    }

    #[test]
    fn test_select_unknown_symbol() {
        let m = selecting();
        let book = stocked_book(1_000);
        assert_eq!(
            select_coin(&m, Side::Creator, "DOGE", &book, 1_000),
            Err(MatchError::InvalidCoin("DOGE".to_string()))
        );
    }

    #[test]
    fn test_select_before_join() {
        let m = waiting();
        let book = stocked_book(1_000);
        assert!(matches!(
            select_coin(&m, Side::Creator, "BTC", &book, 1_000),
            Err(MatchError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_second_selection_activates() {
        let mut m = selecting();
        m.creator_coin = Some("BTC".to_string());
        let book = stocked_book(1_000);

        let t = select_coin(&m, Side::Opponent, "eth", &book, 1_000).unwrap();
        assert_eq!(
            t,
            Transition::Activated {
                side: Side::Opponent,
                symbol: "ETH".to_string(),
                start_time: 1_000,
                start_price_creator: 50_000.0,
                start_price_opponent: 3_000.0,
            }
        );
    }

    #[test]
    fn test_activation_refuses_stale_price() {
        let mut m = selecting();
        m.creator_coin = Some("BTC".to_string());
        let book = stocked_book(1_000);

        // 11 seconds past the samples, over the 10s threshold.
        let err = select_coin(&m, Side::Opponent, "ETH", &book, 1_011).unwrap_err();
        assert_eq!(
            err,
            MatchError::StalePrice {
                symbol: "BTC".to_string(),
                age_secs: 11,
            }
        );
    }

    #[test]
    fn test_activation_refuses_missing_price() {
        let mut m = selecting();
        m.creator_coin = Some("BTC".to_string());
        let book = PriceBook::new();
        book.record(&make_update("ETH", 3_000.0, 1_000));

        assert_eq!(
            select_coin(&m, Side::Opponent, "ETH", &book, 1_000),
            Err(MatchError::PriceUnavailable("BTC".to_string()))
        );
    }

    #[test]
    fn test_activation_refuses_zero_price() {
        let mut m = selecting();
        m.creator_coin = Some("BTC".to_string());
        let book = PriceBook::new();
        // A degenerate tick: recorded, but no good as a start price.
        book.record(&make_update("BTC", 0.0, 1_000));
        book.record(&make_update("ETH", 3_000.0, 1_000));

        assert_eq!(
            select_coin(&m, Side::Opponent, "ETH", &book, 1_000),
            Err(MatchError::PriceUnavailable("BTC".to_string()))
        );
    }

    #[test]
    fn test_evaluate_percentages() {
        let m = active();
        // BTC +2%, ETH +1%.
        let outcome = evaluate(&m, 51_000.0, 3_030.0).unwrap();
        assert!((outcome.creator_pct - 2.0).abs() < 1e-12);
        assert!((outcome.opponent_pct - 1.0).abs() < 1e-12);
        assert_eq!(outcome.leader, Some(Side::Creator));

        // Pure: identical inputs, identical outputs, row untouched.
        let again = evaluate(&m, 51_000.0, 3_030.0).unwrap();
        assert_eq!(outcome, again);
        assert_eq!(m.start_price_creator, Some(50_000.0));
    }

    #[test]
    fn test_evaluate_dead_heat() {
        let m = active();
        // Both +1%.
        let outcome = evaluate(&m, 50_500.0, 3_030.0).unwrap();
        assert_eq!(outcome.leader, None);

        // No movement at all is also a dead heat.
        let outcome = evaluate(&m, 50_000.0, 3_000.0).unwrap();
        assert_eq!(outcome.leader, None);
    }

    #[test]
    fn test_evaluate_opponent_leads() {
        let m = active();
        let outcome = evaluate(&m, 50_000.0, 3_060.0).unwrap();
        assert_eq!(outcome.leader, Some(Side::Opponent));
    }

    #[test]
    fn test_evaluate_requires_active() {
        let m = selecting();
        assert!(matches!(
            evaluate(&m, 1.0, 1.0),
            Err(MatchError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_finalize_before_expiry() {
        let m = active();
        let outcome = evaluate(&m, 51_000.0, 3_030.0).unwrap();
        // Window is [1000, 1060).
        assert_eq!(
            finalize(&m, &outcome, 1_030, TiePolicy::default()),
            Err(MatchError::NotYetExpired { remaining_secs: 30 })
        );
    }

    #[test]
    fn test_finalize_picks_leader() {
        let m = active();
        let outcome = evaluate(&m, 51_000.0, 3_030.0).unwrap();
        let settlement = finalize(&m, &outcome, 1_061, TiePolicy::default()).unwrap();
        assert_eq!(
            settlement,
            Settlement::Winner {
                wallet: "wallet-a".to_string()
            }
        );
    }

    #[test]
    fn test_finalize_tie_policies() {
        let m = active();
        let tied = evaluate(&m, 50_500.0, 3_030.0).unwrap();
        assert_eq!(tied.leader, None);

        assert_eq!(
            finalize(&m, &tied, 1_061, TiePolicy::Rollover).unwrap(),
            Settlement::StillTied
        );
        assert_eq!(
            finalize(&m, &tied, 1_061, TiePolicy::Draw).unwrap(),
            Settlement::Voided {
                reason: DRAW_REASON.to_string()
            }
        );
        assert_eq!(
            finalize(&m, &tied, 1_061, TiePolicy::CreatorWins).unwrap(),
            Settlement::Winner {
                wallet: "wallet-a".to_string()
            }
        );
    }

    #[test]
    fn test_cancel_waiting_match() {
        let m = waiting();
        let t = cancel(&m, "wallet-a", Some("changed my mind".to_string())).unwrap();
        assert_eq!(
            t,
            Transition::Cancelled {
                reason: Some("changed my mind".to_string())
            }
        );
    }

    #[test]
    fn test_cancel_active_match_fails() {
        let m = active();
        assert_eq!(
            cancel(&m, "wallet-a", None),
            Err(MatchError::InvalidTransition {
                from: MatchStatus::Active,
                action: "cancel",
            })
        );
    }

    #[test]
    fn test_cancel_by_stranger_fails() {
        let m = selecting();
        assert_eq!(
            cancel(&m, "wallet-z", None),
            Err(MatchError::NotParticipant)
        );
    }

    #[test]
    fn test_tie_policy_from_str() {
        assert_eq!("rollover".parse(), Ok(TiePolicy::Rollover));
        assert_eq!("Draw".parse(), Ok(TiePolicy::Draw));
        assert_eq!("creator_wins".parse(), Ok(TiePolicy::CreatorWins));
        assert_eq!("creator-wins".parse(), Ok(TiePolicy::CreatorWins));
        assert!("coinflip".parse::<TiePolicy>().is_err());
    }
}
