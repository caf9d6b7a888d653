//! Per-client match session controller.
//!
//! Tracks the matches one client watches, folds the store's change
//! feed into that working set (last write wins by `updated_at`),
//! derives live standings from current prices, and settles watched
//! matches once their window closes. One session per connection; all
//! cross-client coordination happens in the store.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use coinduel_core::{lifecycle, MatchError, MatchStore, PriceSource};
use coinduel_types::{
    ChangeOp, ClientCommand, GatewayEvent, Match, MatchChange, MatchStatus, MatchView, Settlement,
};

/// Per-connection orchestration state.
pub struct Session {
    store: Arc<MatchStore>,
    source: Arc<dyn PriceSource>,

    /// Matches this client watches, newest known row per id.
    watched: HashMap<Uuid, Match>,
}

impl Session {
    pub fn new(store: Arc<MatchStore>, source: Arc<dyn PriceSource>) -> Self {
        Self {
            store,
            source,
            watched: HashMap::new(),
        }
    }

    /// Handle one client command. Failures become error events; the
    /// connection stays up.
    pub fn handle_command(&mut self, cmd: ClientCommand, now: i64) -> Vec<GatewayEvent> {
        match self.run_command(cmd, now) {
            Ok(events) => events,
            Err(e) => vec![GatewayEvent::Error {
                message: e.to_string(),
            }],
        }
    }

    fn run_command(
        &mut self,
        cmd: ClientCommand,
        now: i64,
    ) -> Result<Vec<GatewayEvent>, MatchError> {
        match cmd {
            ClientCommand::CreateMatch {
                wallet,
                duration_seconds,
            } => {
                let row = self.store.create(&wallet, duration_seconds)?;
                self.watch_row(row.clone());
                Ok(vec![GatewayEvent::MatchState(row)])
            }
            ClientCommand::JoinMatch {
                invite_code,
                wallet,
            } => {
                let row = self.store.join(&invite_code, &wallet)?;
                self.watch_row(row.clone());
                Ok(vec![GatewayEvent::MatchState(row)])
            }
            ClientCommand::SelectCoin {
                match_id,
                wallet,
                symbol,
            } => {
                let row = self.store.select_coin(match_id, &wallet, &symbol, now)?;
                self.watch_row(row.clone());
                Ok(vec![GatewayEvent::MatchState(row)])
            }
            ClientCommand::Finalize { match_id } => {
                let (row, settlement) = self.store.finalize(match_id, now)?;
                self.watch_row(row.clone());
                Ok(vec![
                    GatewayEvent::Settled {
                        match_id,
                        settlement,
                    },
                    GatewayEvent::MatchState(row),
                ])
            }
            ClientCommand::Cancel {
                match_id,
                wallet,
                reason,
            } => {
                let row = self.store.cancel(match_id, &wallet, reason)?;
                self.watch_row(row.clone());
                Ok(vec![GatewayEvent::MatchState(row)])
            }
            ClientCommand::Watch { match_id } => {
                let row = self.store.get(match_id)?;
                self.watch_row(row.clone());
                Ok(vec![GatewayEvent::MatchState(row)])
            }
            ClientCommand::Unwatch { match_id } => {
                self.watched.remove(&match_id);
                Ok(vec![])
            }
        }
    }

    /// Fold a change-feed event into the watched set.
    ///
    /// Returns the row when it supersedes what we knew; replays and
    /// out-of-date deliveries return None. Each received row is
    /// authoritative-at-its-timestamp, never a delta.
    pub fn apply_change(&mut self, change: &MatchChange) -> Option<Match> {
        let known = self.watched.get(&change.row.id)?;

        if change.op == ChangeOp::Delete {
            self.watched.remove(&change.row.id);
            return Some(change.row.clone());
        }
        if change.row.updated_at <= known.updated_at {
            return None;
        }
        self.watched.insert(change.row.id, change.row.clone());
        Some(change.row.clone())
    }

    /// True if any watched match involves the given coin symbol.
    pub fn involves_symbol(&self, symbol: &str) -> bool {
        self.watched.values().any(|m| {
            m.creator_coin.as_deref() == Some(symbol) || m.opponent_coin.as_deref() == Some(symbol)
        })
    }

    /// Live standings for every watched active match.
    pub fn views(&self, now: i64) -> Vec<MatchView> {
        self.watched
            .values()
            .filter_map(|m| self.view_of(m, now))
            .collect()
    }

    fn view_of(&self, m: &Match, now: i64) -> Option<MatchView> {
        if m.status != MatchStatus::Active {
            return None;
        }
        let creator_coin = m.creator_coin.as_deref()?;
        let opponent_coin = m.opponent_coin.as_deref()?;

        // A feed gap skips this tick's view instead of showing a stale
        // standing.
        let creator_price = self.source.price(creator_coin, now).ok()?;
        let opponent_price = self.source.price(opponent_coin, now).ok()?;
        let outcome = lifecycle::evaluate(m, creator_price.price, opponent_price.price).ok()?;

        Some(MatchView {
            match_id: m.id,
            creator_pct: outcome.creator_pct,
            opponent_pct: outcome.opponent_pct,
            leader_wallet: outcome
                .leader
                .and_then(|side| m.wallet(side))
                .map(|w| w.to_string()),
            seconds_remaining: m.deadline().map(|d| (d - now).max(0)).unwrap_or(0),
        })
    }

    /// Settle watched matches whose window has closed. One of N racing
    /// viewers wins the store write; the rest receive the recorded
    /// settlement.
    pub fn settle_expired(&mut self, now: i64) -> Vec<GatewayEvent> {
        let expired: Vec<Uuid> = self
            .watched
            .values()
            .filter(|m| m.expired(now))
            .map(|m| m.id)
            .collect();

        let mut events = Vec::new();
        for id in expired {
            match self.store.finalize(id, now) {
                Ok((_, Settlement::StillTied)) => {
                    debug!("Match {} still tied at expiry", id);
                }
                Ok((row, settlement)) => {
                    self.watch_row(row.clone());
                    events.push(GatewayEvent::Settled {
                        match_id: id,
                        settlement,
                    });
                    events.push(GatewayEvent::MatchState(row));
                }
                Err(e) => {
                    debug!("Could not settle match {} yet: {}", id, e);
                }
            }
        }
        events
    }

    fn watch_row(&mut self, row: Match) {
        match self.watched.get(&row.id) {
            Some(known) if known.updated_at >= row.updated_at => {}
            _ => {
                self.watched.insert(row.id, row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinduel_core::{PriceBook, TiePolicy};
    use coinduel_types::PriceUpdate;

    fn make_update(symbol: &str, price: f64, timestamp: i64) -> PriceUpdate {
        PriceUpdate {
            symbol: symbol.to_string(),
            price,
            confidence: 0.01,
            publish_time: timestamp,
            feed_id: "0x123".to_string(),
        }
    }

    fn setup(now: i64) -> (Arc<PriceBook>, Arc<MatchStore>, Session) {
        let book = Arc::new(PriceBook::new());
        book.record(&make_update("BTC", 50_000.0, now));
        book.record(&make_update("ETH", 3_000.0, now));
        let store = Arc::new(MatchStore::new(book.clone(), TiePolicy::default()));
        let session = Session::new(store.clone(), book.clone());
        (book, store, session)
    }

    /// Drive a full match to active through session commands.
    fn activate(session: &mut Session, store: &MatchStore, now: i64) -> Match {
        let events = session.handle_command(
            ClientCommand::CreateMatch {
                wallet: "wallet-a".to_string(),
                duration_seconds: 60,
            },
            now,
        );
        let GatewayEvent::MatchState(m) = &events[0] else {
            panic!("expected match state, got {:?}", events);
        };
        let id = m.id;

        store.join(&m.invite_code, "wallet-b").unwrap();
        session.handle_command(
            ClientCommand::SelectCoin {
                match_id: id,
                wallet: "wallet-a".to_string(),
                symbol: "BTC".to_string(),
            },
            now,
        );
        let events = session.handle_command(
            ClientCommand::SelectCoin {
                match_id: id,
                wallet: "wallet-b".to_string(),
                symbol: "ETH".to_string(),
            },
            now,
        );
        let GatewayEvent::MatchState(row) = &events[0] else {
            panic!("expected match state, got {:?}", events);
        };
        row.clone()
    }

    #[test]
    fn test_command_failure_becomes_error_event() {
        let (_, _, mut session) = setup(1_000);
        let events = session.handle_command(
            ClientCommand::JoinMatch {
                invite_code: "ZZZZZZ".to_string(),
                wallet: "wallet-b".to_string(),
            },
            1_000,
        );
        assert!(matches!(&events[0], GatewayEvent::Error { .. }));
    }

    #[test]
    fn test_create_watches_match() {
        let (_, store, mut session) = setup(1_000);
        let row = activate(&mut session, &store, 1_000);

        assert_eq!(row.status, MatchStatus::Active);
        assert!(session.involves_symbol("BTC"));
        assert!(session.involves_symbol("ETH"));
        assert!(!session.involves_symbol("SOL"));
    }

    #[test]
    fn test_apply_change_last_write_wins() {
        let (_, store, mut session) = setup(1_000);
        let row = activate(&mut session, &store, 1_000);

        // A replay of what we already know is dropped.
        let replay = MatchChange {
            op: ChangeOp::Update,
            row: row.clone(),
        };
        assert!(session.apply_change(&replay).is_none());

        // A newer row supersedes.
        let mut newer = row.clone();
        newer.updated_at += 1;
        let change = MatchChange {
            op: ChangeOp::Update,
            row: newer,
        };
        assert!(session.apply_change(&change).is_some());

        // An older row arriving late is dropped.
        let mut older = row.clone();
        older.updated_at -= 1;
        let change = MatchChange {
            op: ChangeOp::Update,
            row: older,
        };
        assert!(session.apply_change(&change).is_none());
    }

    #[test]
    fn test_apply_change_ignores_unwatched() {
        let (_, store, mut session) = setup(1_000);
        let foreign = store.create("wallet-x", 60).unwrap();

        let change = MatchChange {
            op: ChangeOp::Update,
            row: foreign,
        };
        assert!(session.apply_change(&change).is_none());
    }

    #[test]
    fn test_unwatch_stops_updates() {
        let (_, store, mut session) = setup(1_000);
        let row = activate(&mut session, &store, 1_000);

        session.handle_command(ClientCommand::Unwatch { match_id: row.id }, 1_000);
        assert!(!session.involves_symbol("BTC"));

        let mut newer = row.clone();
        newer.updated_at += 1;
        let change = MatchChange {
            op: ChangeOp::Update,
            row: newer,
        };
        assert!(session.apply_change(&change).is_none());
    }

    #[test]
    fn test_views_reflect_prices() {
        let (book, store, mut session) = setup(1_000);
        let row = activate(&mut session, &store, 1_000);

        book.record(&make_update("BTC", 51_000.0, 1_030));
        book.record(&make_update("ETH", 3_030.0, 1_030));

        let views = session.views(1_030);
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.match_id, row.id);
        assert!((view.creator_pct - 2.0).abs() < 1e-9);
        assert!((view.opponent_pct - 1.0).abs() < 1e-9);
        assert_eq!(view.leader_wallet.as_deref(), Some("wallet-a"));
        assert_eq!(view.seconds_remaining, 30);
    }

    #[test]
    fn test_views_skip_on_feed_gap() {
        let (_, store, mut session) = setup(1_000);
        activate(&mut session, &store, 1_000);

        // Prices are stale 30 seconds in; no view rather than a wrong
        // one.
        assert!(session.views(1_030).is_empty());
    }

    #[test]
    fn test_settle_expired_watched_match() {
        let (book, store, mut session) = setup(1_000);
        let row = activate(&mut session, &store, 1_000);

        book.record(&make_update("BTC", 51_000.0, 1_061));
        book.record(&make_update("ETH", 3_030.0, 1_061));

        let events = session.settle_expired(1_061);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            GatewayEvent::Settled {
                match_id,
                settlement: Settlement::Winner { wallet },
            } if *match_id == row.id && wallet == "wallet-a"
        ));
        assert!(matches!(&events[1], GatewayEvent::MatchState(m) if m.status == MatchStatus::Completed));

        // Settled matches drop out of the expiry scan.
        assert!(session.settle_expired(1_062).is_empty());
    }

    #[test]
    fn test_settle_skips_unexpired() {
        let (_, store, mut session) = setup(1_000);
        activate(&mut session, &store, 1_000);
        assert!(session.settle_expired(1_030).is_empty());
    }
}
