//! Transactional match store.
//!
//! Single source of truth for match rows. Every mutation re-reads the
//! row under its entry guard, runs the lifecycle decision against that
//! state, and applies the transition or fails - the conditional-update
//! primitive that makes races explicit. First writer wins; losers get
//! `AlreadyJoined`/`AlreadySelected`/`InvalidTransition`. A failed
//! decision leaves the row untouched and publishes nothing.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use coinduel_types::{ChangeOp, Match, MatchStatus, Settlement, Side};

use crate::error::MatchError;
use crate::feed::PriceSource;
use crate::lifecycle::{self, TiePolicy, Transition, DRAW_REASON};
use crate::notify::{MatchNotifier, Subscription};

/// Invite-code alphabet, with the ambiguous characters (0/O, 1/I/L)
/// left out.
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Invite code length.
const INVITE_LEN: usize = 6;

/// Longest allowed match window: 24 hours.
pub const MAX_DURATION_SECS: i64 = 86_400;

/// In-process match table with an invite-code index and a change feed.
pub struct MatchStore {
    rows: DashMap<Uuid, Match>,
    invites: DashMap<String, Uuid>,
    notifier: MatchNotifier,
    source: Arc<dyn PriceSource>,
    tie_policy: TiePolicy,
}

impl MatchStore {
    /// Create an empty store reading prices from `source`.
    pub fn new(source: Arc<dyn PriceSource>, tie_policy: TiePolicy) -> Self {
        Self {
            rows: DashMap::new(),
            invites: DashMap::new(),
            notifier: MatchNotifier::new(),
            source,
            tie_policy,
        }
    }

    /// Subscribe to the change feed for every match.
    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    /// Subscribe to the change feed for one match.
    pub fn subscribe_match(&self, id: Uuid) -> Subscription {
        self.notifier.subscribe_match(id)
    }

    /// Create a match waiting for an opponent. The window length must
    /// fall in `1..=MAX_DURATION_SECS`.
    pub fn create(&self, creator_wallet: &str, duration_seconds: i64) -> Result<Match, MatchError> {
        if !(1..=MAX_DURATION_SECS).contains(&duration_seconds) {
            return Err(MatchError::InvalidDuration(duration_seconds));
        }

        let id = Uuid::new_v4();
        let invite_code = self.claim_invite_code(id);
        let mut row = Match::new(id, invite_code, creator_wallet.to_string(), duration_seconds);
        row.updated_at = now_epoch_ms();

        self.rows.insert(id, row.clone());
        self.notifier.publish(ChangeOp::Insert, row.clone());
        info!(
            "Match {} created by {} ({}s, invite {})",
            id, creator_wallet, duration_seconds, row.invite_code
        );
        Ok(row)
    }

    /// Read a match by id.
    pub fn get(&self, id: Uuid) -> Result<Match, MatchError> {
        self.rows
            .get(&id)
            .map(|r| r.clone())
            .ok_or(MatchError::NotFound)
    }

    /// Read a match by invite code, case-insensitive.
    pub fn get_by_invite(&self, code: &str) -> Result<Match, MatchError> {
        let id = self.lookup_invite(code)?;
        self.get(id)
    }

    /// Seat `wallet` as the opponent in the match behind `invite_code`.
    pub fn join(&self, invite_code: &str, wallet: &str) -> Result<Match, MatchError> {
        let id = self.lookup_invite(invite_code)?;
        self.commit(id, |m| lifecycle::join(m, wallet))
    }

    /// Lock in a coin for the side `wallet` occupies. The selection
    /// that completes the pair activates the match with start prices
    /// captured at `now`.
    pub fn select_coin(
        &self,
        id: Uuid,
        wallet: &str,
        symbol: &str,
        now: i64,
    ) -> Result<Match, MatchError> {
        self.commit(id, |m| {
            let side = m.side_of(wallet).ok_or(MatchError::NotParticipant)?;
            lifecycle::select_coin(m, side, symbol, self.source.as_ref(), now)
        })
    }

    /// Cancel a match that has not gone active.
    pub fn cancel(
        &self,
        id: Uuid,
        wallet: &str,
        reason: Option<String>,
    ) -> Result<Match, MatchError> {
        self.commit(id, |m| lifecycle::cancel(m, wallet, reason))
    }

    /// Settle an expired match using prices at `now`.
    ///
    /// Idempotent for racing callers: whoever finds the match already
    /// decided receives the recorded settlement as success instead of
    /// an error. Under the rollover tie policy a dead heat writes
    /// nothing and reports `StillTied`.
    pub fn finalize(&self, id: Uuid, now: i64) -> Result<(Match, Settlement), MatchError> {
        let mut entry = self.rows.get_mut(&id).ok_or(MatchError::NotFound)?;

        match entry.status {
            MatchStatus::Completed => {
                if let Some(wallet) = entry.winner_wallet.clone() {
                    return Ok((entry.clone(), Settlement::Winner { wallet }));
                }
                return Err(MatchError::InvalidTransition {
                    from: MatchStatus::Completed,
                    action: "finalize",
                });
            }
            // A voided dead heat reads back as its recorded settlement.
            // Pre-activation cancels fall through to the status error.
            MatchStatus::Cancelled if entry.start_time.is_some() => {
                let reason = entry
                    .cancel_reason
                    .clone()
                    .unwrap_or_else(|| DRAW_REASON.to_string());
                return Ok((entry.clone(), Settlement::Voided { reason }));
            }
            MatchStatus::Active => {}
            from => {
                return Err(MatchError::InvalidTransition {
                    from,
                    action: "finalize",
                })
            }
        }

        // Wall-clock expiry gate before any price lookup.
        if let Some(deadline) = entry.deadline() {
            if now < deadline {
                return Err(MatchError::NotYetExpired {
                    remaining_secs: deadline - now,
                });
            }
        }

        let (Some(creator_coin), Some(opponent_coin)) =
            (entry.creator_coin.clone(), entry.opponent_coin.clone())
        else {
            return Err(MatchError::InvalidTransition {
                from: MatchStatus::Active,
                action: "finalize",
            });
        };

        let creator_price = self.source.price(&creator_coin, now)?;
        let opponent_price = self.source.price(&opponent_coin, now)?;

        let outcome = lifecycle::evaluate(entry.value(), creator_price.price, opponent_price.price)?;
        let settlement = lifecycle::finalize(entry.value(), &outcome, now, self.tie_policy)?;

        let transition = match &settlement {
            Settlement::Winner { wallet } => Transition::Completed {
                winner_wallet: wallet.clone(),
            },
            Settlement::Voided { reason } => Transition::Cancelled {
                reason: Some(reason.clone()),
            },
            Settlement::StillTied => {
                return Ok((entry.clone(), settlement));
            }
        };

        apply(entry.value_mut(), &transition);
        entry.updated_at = next_updated_at(entry.updated_at);
        let row = entry.clone();
        self.notifier.publish(ChangeOp::Update, row.clone());
        info!(
            "Match {} settled: {:.4}% vs {:.4}% -> {}",
            id, outcome.creator_pct, outcome.opponent_pct, row.status
        );
        Ok((row, settlement))
    }

    /// Snapshot of every active match, for expiry sweeps.
    pub fn active_matches(&self) -> Vec<Match> {
        self.rows
            .iter()
            .filter(|r| r.status.is_active())
            .map(|r| r.clone())
            .collect()
    }

    /// Drop a terminal match and retire its invite code.
    /// Live matches cannot be removed.
    pub fn remove(&self, id: Uuid) -> Result<Match, MatchError> {
        let removed = self
            .rows
            .remove_if(&id, |_, m| m.status.is_terminal())
            .map(|(_, m)| m);

        match removed {
            Some(row) => {
                self.invites.remove(&row.invite_code);
                self.notifier.publish(ChangeOp::Delete, row.clone());
                info!("Match {} removed", id);
                Ok(row)
            }
            None => match self.rows.get(&id) {
                Some(row) => Err(MatchError::InvalidTransition {
                    from: row.status,
                    action: "remove",
                }),
                None => Err(MatchError::NotFound),
            },
        }
    }

    /// Decide-and-apply under the row's entry guard.
    ///
    /// The decision runs against the current row state; concurrent
    /// writers to the same match serialize here. The change event is
    /// published before the guard drops so per-row delivery order
    /// matches commit order.
    fn commit<F>(&self, id: Uuid, decide: F) -> Result<Match, MatchError>
    where
        F: FnOnce(&Match) -> Result<Transition, MatchError>,
    {
        let mut entry = self.rows.get_mut(&id).ok_or(MatchError::NotFound)?;
        let from = entry.status;

        let transition = decide(entry.value())?;
        apply(entry.value_mut(), &transition);
        entry.updated_at = next_updated_at(entry.updated_at);

        let row = entry.clone();
        self.notifier.publish(ChangeOp::Update, row.clone());
        info!("Match {}: {} -> {}", id, from, row.status);
        Ok(row)
    }

    fn lookup_invite(&self, code: &str) -> Result<Uuid, MatchError> {
        let code = code.trim().to_ascii_uppercase();
        self.invites
            .get(&code)
            .map(|r| *r)
            .ok_or(MatchError::NotFound)
    }

    /// Generate an invite code and reserve it in the index. Retries on
    /// collision.
    fn claim_invite_code(&self, id: Uuid) -> String {
        loop {
            let code = generate_invite_code();
            match self.invites.entry(code.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(id);
                    return code;
                }
                Entry::Occupied(_) => continue,
            }
        }
    }
}

/// Write a transition's field changes onto the row.
fn apply(row: &mut Match, transition: &Transition) {
    match transition {
        Transition::OpponentJoined { wallet } => {
            row.opponent_wallet = Some(wallet.clone());
            row.status = MatchStatus::SelectingCoins;
        }
        Transition::CoinChosen { side, symbol } => {
            set_coin(row, *side, symbol.clone());
        }
        Transition::Activated {
            side,
            symbol,
            start_time,
            start_price_creator,
            start_price_opponent,
        } => {
            set_coin(row, *side, symbol.clone());
            row.status = MatchStatus::Active;
            row.start_time = Some(*start_time);
            row.start_price_creator = Some(*start_price_creator);
            row.start_price_opponent = Some(*start_price_opponent);
        }
        Transition::Completed { winner_wallet } => {
            row.status = MatchStatus::Completed;
            row.winner_wallet = Some(winner_wallet.clone());
        }
        Transition::Cancelled { reason } => {
            row.status = MatchStatus::Cancelled;
            row.cancel_reason = reason.clone();
        }
    }
}

fn set_coin(row: &mut Match, side: Side, symbol: String) {
    match side {
        Side::Creator => row.creator_coin = Some(symbol),
        Side::Opponent => row.opponent_coin = Some(symbol),
    }
}

/// Monotonic per-row write stamp: wall clock, but always strictly
/// greater than the previous value.
fn next_updated_at(prev: i64) -> i64 {
    now_epoch_ms().max(prev + 1)
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_LEN)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}
