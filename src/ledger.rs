//! Position ledger: trades, positions, and derived P&L per agent.
//!
//! All writes for one logical trade (one or two legs) happen under a single
//! agent-scoped critical section, so concurrent status reads never observe a
//! half-applied arbitrage pair. Global counters are updated in the same call
//! behind their own lock.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{Position, Trade};
use crate::error::{EngineError, Result};
use crate::risk::RiskSnapshot;

/// Aggregate platform counters.
///
/// Invariant: `total_fees_collected` equals the sum of `platform_fee` over
/// every recorded trade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_trades: u64,
    pub total_volume: Decimal,
    pub total_fees_collected: Decimal,
}

/// Everything the ledger tracks for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBook {
    pub starting_balance: Decimal,
    pub positions: Vec<Position>,
    pub trades: Vec<Trade>,
    pub fees_paid: Decimal,
    pub realized_pnl: Decimal,
    pub peak_equity: Decimal,
    pub halted: bool,
    pub trade_date: Option<NaiveDate>,
    pub trades_today: u32,
}

impl AgentBook {
    fn new(starting_balance: Decimal) -> Self {
        Self {
            starting_balance,
            positions: Vec::new(),
            trades: Vec::new(),
            fees_paid: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            peak_equity: starting_balance,
            halted: false,
            trade_date: None,
            trades_today: 0,
        }
    }

    fn open_exposure(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.notional())
            .sum()
    }

    fn unrealized_pnl(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.unrealized_pnl())
            .sum()
    }

    fn equity(&self) -> Decimal {
        self.starting_balance + self.realized_pnl - self.fees_paid + self.unrealized_pnl()
    }

    fn drawdown(&self) -> Decimal {
        let equity = self.equity();
        if self.peak_equity <= Decimal::ZERO || equity >= self.peak_equity {
            return Decimal::ZERO;
        }
        (self.peak_equity - equity) / self.peak_equity
    }

    fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if self.trade_date != Some(today) {
            self.trade_date = Some(today);
            self.trades_today = 0;
        }
    }

    fn update_peak(&mut self) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }
}

/// Portfolio view derived from one agent's book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub balance: Decimal,
    pub total_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_positions: usize,
    pub roi_pct: Decimal,
}

/// Per-agent trading statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub total_trades: u64,
    pub successful_trades: u64,
    pub total_volume: Decimal,
    pub gross_profit: Decimal,
    pub fees_paid: Decimal,
    pub net_profit: Decimal,
    pub realized_pnl: Decimal,
    pub open_positions: usize,
    pub halted: bool,
}

pub struct PositionLedger {
    books: DashMap<String, Arc<Mutex<AgentBook>>>,
    system: Mutex<SystemStats>,
    default_starting_balance: Decimal,
}

impl PositionLedger {
    pub fn new(default_starting_balance: Decimal) -> Self {
        Self {
            books: DashMap::new(),
            system: Mutex::new(SystemStats::default()),
            default_starting_balance,
        }
    }

    /// Rebuild a ledger from a persisted snapshot
    pub fn restore(
        default_starting_balance: Decimal,
        books: HashMap<String, AgentBook>,
        system: SystemStats,
    ) -> Self {
        let ledger = Self::new(default_starting_balance);
        for (agent_id, book) in books {
            ledger.books.insert(agent_id, Arc::new(Mutex::new(book)));
        }
        *ledger.system.try_lock().expect("fresh ledger lock") = system;
        ledger
    }

    /// Create the agent's book if it does not exist yet
    pub fn ensure_book(&self, agent_id: &str, starting_balance: Decimal) {
        self.books
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AgentBook::new(starting_balance))));
    }

    fn book(&self, agent_id: &str) -> Arc<Mutex<AgentBook>> {
        self.books
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AgentBook::new(self.default_starting_balance))))
            .clone()
    }

    /// Derive the current risk snapshot for one agent
    pub async fn snapshot(&self, agent_id: &str) -> RiskSnapshot {
        let book = self.book(agent_id);
        let mut book = book.lock().await;
        book.roll_day();
        RiskSnapshot {
            total_exposure: book.open_exposure(),
            drawdown: book.drawdown(),
            trades_today: book.trades_today,
            halted: book.halted,
        }
    }

    /// Append a trade and its resulting positions in one critical section.
    ///
    /// Global counters are updated before the call returns, keeping the fee
    /// invariant observable at all times.
    pub async fn record_trade(&self, trade: Trade, positions: Vec<Position>) {
        let agent_id = trade.agent_id.clone();
        let book = self.book(&agent_id);
        let volume = trade.volume();
        let fee = trade.platform_fee;

        {
            let mut book = book.lock().await;
            book.roll_day();
            book.trades_today += 1;
            book.fees_paid += fee;
            book.positions.extend(positions);
            if !trade.success {
                warn!(
                    agent_id = %agent_id,
                    trade_id = %trade.trade_id,
                    reason = trade.failure_reason.as_deref().unwrap_or("unknown"),
                    "recorded failed trade"
                );
            } else {
                info!(
                    agent_id = %agent_id,
                    trade_id = %trade.trade_id,
                    net_profit = %trade.net_profit,
                    "recorded trade"
                );
            }
            book.trades.push(trade);
            book.update_peak();
        }

        let mut system = self.system.lock().await;
        system.total_trades += 1;
        system.total_volume += volume;
        system.total_fees_collected += fee;
    }

    /// Latch the agent's halted state after a terminal drawdown rejection
    pub async fn mark_halted(&self, agent_id: &str) {
        let book = self.book(agent_id);
        let mut book = book.lock().await;
        if !book.halted {
            warn!(agent_id, "agent halted by drawdown limit");
            book.halted = true;
        }
    }

    /// Close an open position at the given exit price; returns realized P&L
    pub async fn close_position(
        &self,
        agent_id: &str,
        position_id: &str,
        exit_price: Decimal,
    ) -> Result<Decimal> {
        let book = self.book(agent_id);
        let mut book = book.lock().await;

        let position = book
            .positions
            .iter_mut()
            .find(|p| p.position_id == position_id && p.is_open())
            .ok_or_else(|| {
                EngineError::Internal(format!("no open position {position_id} for {agent_id}"))
            })?;

        let pnl = match position.side {
            crate::domain::Side::Yes => (exit_price - position.entry_price) * position.shares,
            crate::domain::Side::No => (position.entry_price - exit_price) * position.shares,
        };
        position.current_price = Some(exit_price);
        position.closed_at = Some(Utc::now());
        position.realized_pnl = Some(pnl);

        book.realized_pnl += pnl;
        book.update_peak();

        info!(agent_id, position_id, %pnl, "position closed");
        Ok(pnl)
    }

    /// Apply caller-supplied marks to the agent's open positions
    pub async fn update_marks(&self, agent_id: &str, marks: &HashMap<String, Decimal>) {
        let book = self.book(agent_id);
        let mut book = book.lock().await;
        for position in book.positions.iter_mut().filter(|p| p.is_open()) {
            if let Some(&price) = marks.get(&position.market_id) {
                position.current_price = Some(price);
            }
        }
        book.update_peak();
    }

    /// Portfolio summary using the latest caller-supplied marks
    pub async fn portfolio_summary(
        &self,
        agent_id: &str,
        marks: &HashMap<String, Decimal>,
    ) -> PortfolioSummary {
        let book = self.book(agent_id);
        let mut book = book.lock().await;
        for position in book.positions.iter_mut().filter(|p| p.is_open()) {
            if let Some(&price) = marks.get(&position.market_id) {
                position.current_price = Some(price);
            }
        }

        let unrealized = book.unrealized_pnl();
        let balance = book.starting_balance + book.realized_pnl - book.fees_paid;
        let total_value = balance + unrealized;
        let roi_pct = if book.starting_balance > Decimal::ZERO {
            (total_value - book.starting_balance) / book.starting_balance * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        PortfolioSummary {
            balance,
            total_value,
            unrealized_pnl: unrealized,
            open_positions: book.positions.iter().filter(|p| p.is_open()).count(),
            roi_pct,
        }
    }

    pub async fn agent_stats(&self, agent_id: &str) -> AgentStats {
        let book = self.book(agent_id);
        let book = book.lock().await;

        let gross_profit: Decimal = book
            .trades
            .iter()
            .filter(|t| t.success)
            .map(|t| t.expected_profit)
            .sum();

        AgentStats {
            total_trades: book.trades.len() as u64,
            successful_trades: book.trades.iter().filter(|t| t.success).count() as u64,
            total_volume: book.trades.iter().map(|t| t.volume()).sum(),
            gross_profit,
            fees_paid: book.fees_paid,
            net_profit: gross_profit - book.fees_paid,
            realized_pnl: book.realized_pnl,
            open_positions: book.positions.iter().filter(|p| p.is_open()).count(),
            halted: book.halted,
        }
    }

    /// Most recent trades first
    pub async fn recent_trades(&self, agent_id: &str, limit: usize) -> Vec<Trade> {
        let book = self.book(agent_id);
        let book = book.lock().await;
        book.trades.iter().rev().take(limit).cloned().collect()
    }

    pub async fn open_positions(&self, agent_id: &str) -> Vec<Position> {
        let book = self.book(agent_id);
        let book = book.lock().await;
        book.positions
            .iter()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    pub async fn system_stats(&self) -> SystemStats {
        self.system.lock().await.clone()
    }

    /// Export all books and counters for a snapshot
    pub async fn export(&self) -> (HashMap<String, AgentBook>, SystemStats) {
        let mut books = HashMap::new();
        for entry in self.books.iter() {
            let book = entry.value().lock().await;
            books.insert(entry.key().clone(), book.clone());
        }
        let system = self.system.lock().await.clone();
        (books, system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{next_trade_id, Side, TradeLegs, Venue};
    use rust_decimal_macros::dec;

    fn pair_trade(agent: &str, fee: Decimal, success: bool) -> Trade {
        Trade {
            trade_id: next_trade_id(agent, 0),
            agent_id: agent.to_string(),
            market_id: "mkt-1".into(),
            legs: TradeLegs::Pair {
                buy_venue: Venue::Polymarket,
                sell_venue: Venue::Kalshi,
                buy_order_id: Some("POL-1".into()),
                sell_order_id: Some("KAL-1".into()),
            },
            size: dec!(50),
            spread: dec!(5.0),
            expected_profit: dec!(2.5),
            platform_fee: fee,
            net_profit: dec!(2.5) - fee,
            success,
            failure_reason: (!success).then(|| "PartialLegFailure".to_string()),
            simulated: true,
            executed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fee_invariant_holds_across_trades() {
        let ledger = PositionLedger::new(dec!(10000));
        ledger.ensure_book("a1", dec!(10000));

        ledger.record_trade(pair_trade("a1", dec!(1.0), true), vec![]).await;
        ledger.record_trade(pair_trade("a1", dec!(0.5), false), vec![]).await;
        ledger.record_trade(pair_trade("a1", dec!(1.0), true), vec![]).await;

        let system = ledger.system_stats().await;
        assert_eq!(system.total_trades, 3);
        assert_eq!(system.total_fees_collected, dec!(2.5));

        let (books, _) = ledger.export().await;
        let recorded: Decimal = books["a1"].trades.iter().map(|t| t.platform_fee).sum();
        assert_eq!(recorded, system.total_fees_collected);
    }

    #[tokio::test]
    async fn snapshot_reflects_open_exposure() {
        let ledger = PositionLedger::new(dec!(10000));
        ledger.ensure_book("a1", dec!(10000));

        let position = Position::open("mkt-1", Venue::Polymarket, Side::Yes, dec!(360), dec!(0.50), false);
        ledger.record_trade(pair_trade("a1", dec!(1.0), true), vec![position]).await;

        let snapshot = ledger.snapshot("a1").await;
        assert_eq!(snapshot.total_exposure, dec!(180.00));
        assert_eq!(snapshot.trades_today, 1);
        assert!(!snapshot.halted);
    }

    #[tokio::test]
    async fn closing_at_a_loss_creates_drawdown() {
        let ledger = PositionLedger::new(dec!(1000));
        ledger.ensure_book("a1", dec!(1000));

        let position = Position::open("mkt-1", Venue::Polymarket, Side::Yes, dec!(400), dec!(0.50), false);
        let position_id = position.position_id.clone();
        ledger.record_trade(pair_trade("a1", dec!(0), true), vec![position]).await;

        let pnl = ledger
            .close_position("a1", &position_id, dec!(0.25))
            .await
            .unwrap();
        assert_eq!(pnl, dec!(-100.00));

        let snapshot = ledger.snapshot("a1").await;
        assert_eq!(snapshot.drawdown, dec!(0.1));
    }

    #[tokio::test]
    async fn halted_latch_survives_snapshot_reads() {
        let ledger = PositionLedger::new(dec!(1000));
        ledger.mark_halted("a1").await;
        assert!(ledger.snapshot("a1").await.halted);
    }

    #[tokio::test]
    async fn portfolio_summary_applies_marks() {
        let ledger = PositionLedger::new(dec!(1000));
        let position = Position::open("mkt-1", Venue::Kalshi, Side::Yes, dec!(100), dec!(0.50), false);
        ledger.record_trade(pair_trade("a1", dec!(0), true), vec![position]).await;

        let marks = HashMap::from([("mkt-1".to_string(), dec!(0.60))]);
        let summary = ledger.portfolio_summary("a1", &marks).await;
        assert_eq!(summary.unrealized_pnl, dec!(10.00));
        assert_eq!(summary.open_positions, 1);
    }
}
