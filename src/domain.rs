//! Core domain types: venues, orders, fills, trades, positions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Execution venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Blockchain-signed CLOB venue
    Polymarket,
    /// HMAC-session REST venue
    Kalshi,
    /// No real connector; always simulated
    Limitless,
}

impl Venue {
    pub const ALL: [Venue; 3] = [Venue::Polymarket, Venue::Kalshi, Venue::Limitless];

    /// Short prefix used in synthetic order ids
    pub fn prefix(&self) -> &'static str {
        match self {
            Venue::Polymarket => "POL",
            Venue::Kalshi => "KAL",
            Venue::Limitless => "LIM",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Polymarket => write!(f, "polymarket"),
            Venue::Kalshi => write!(f, "kalshi"),
            Venue::Limitless => write!(f, "limitless"),
        }
    }
}

impl FromStr for Venue {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "polymarket" => Ok(Venue::Polymarket),
            "kalshi" => Ok(Venue::Kalshi),
            "limitless" => Ok(Venue::Limitless),
            _ => Err("invalid venue; expected polymarket|kalshi|limitless"),
        }
    }
}

/// Outcome side of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn flip(&self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    /// Outcome index in CLOB order payloads (0 = YES, 1 = NO)
    pub fn outcome_index(&self) -> u8 {
        match self {
            Side::Yes => 0,
            Side::No => 1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Yes => write!(f, "yes"),
            Side::No => write!(f, "no"),
        }
    }
}

impl FromStr for Side {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" | "buy" => Ok(Side::Yes),
            "no" | "sell" => Ok(Side::No),
            _ => Err("invalid side; expected yes|no"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// One order leg submitted to a single venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub agent_id: String,
    pub venue: Venue,
    pub market_id: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Stake in USD
    pub size: Decimal,
    /// Limit price in [0, 1]; None for market orders
    pub price: Option<Decimal>,
    /// Observed market liquidity, supplied by the caller
    pub liquidity: Decimal,
}

impl OrderRequest {
    /// USD value the leg puts at risk
    pub fn notional(&self) -> Decimal {
        self.size
    }
}

/// Fill status reported by a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillStatus {
    Submitted,
    Filled,
}

/// Execution result returned by every connector variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub venue: Venue,
    pub status: FillStatus,
    /// Price the leg executed at
    pub price: Decimal,
    pub simulated: bool,
    pub latency_ms: u64,
    pub executed_at: DateTime<Utc>,
}

/// Venue legs covered by a trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeLegs {
    Single {
        venue: Venue,
        order_id: Option<String>,
    },
    Pair {
        buy_venue: Venue,
        sell_venue: Venue,
        buy_order_id: Option<String>,
        sell_order_id: Option<String>,
    },
}

impl TradeLegs {
    pub fn is_pair(&self) -> bool {
        matches!(self, TradeLegs::Pair { .. })
    }
}

/// Immutable execution record. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub agent_id: String,
    pub market_id: String,
    pub legs: TradeLegs,
    /// Stake per leg in USD
    pub size: Decimal,
    /// Observed spread (percent) at submission, zero for directional legs
    pub spread: Decimal,
    pub expected_profit: Decimal,
    pub platform_fee: Decimal,
    pub net_profit: Decimal,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub simulated: bool,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Total venue volume the record represents
    pub fn volume(&self) -> Decimal {
        if self.legs.is_pair() {
            self.size * Decimal::TWO
        } else {
            self.size
        }
    }
}

static TRADE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Composite trade id: agent + leg index + timestamp + process-wide sequence.
///
/// The sequence component guarantees uniqueness even when two legs of the
/// same agent land in the same nanosecond.
pub fn next_trade_id(agent_id: &str, leg_index: u8) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = TRADE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{agent_id}-{leg_index}-{nanos}-{seq}")
}

/// One open or closed exposure, owned by a single agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub market_id: String,
    pub venue: Venue,
    pub side: Side,
    /// Contract count (stake / entry price)
    pub shares: Decimal,
    pub entry_price: Decimal,
    /// Latest caller-supplied mark
    pub current_price: Option<Decimal>,
    /// True when the position is one half of a settled arbitrage pair
    pub hedged: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    pub fn open(
        market_id: &str,
        venue: Venue,
        side: Side,
        shares: Decimal,
        entry_price: Decimal,
        hedged: bool,
    ) -> Self {
        Self {
            position_id: format!("pos-{}", uuid::Uuid::new_v4()),
            market_id: market_id.to_string(),
            venue,
            side,
            shares,
            entry_price,
            current_price: Some(entry_price),
            hedged,
            opened_at: Utc::now(),
            closed_at: None,
            realized_pnl: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// USD value at entry
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.shares
    }

    /// Mark-to-market P&L using the latest known price
    pub fn unrealized_pnl(&self) -> Decimal {
        let Some(current) = self.current_price else {
            return Decimal::ZERO;
        };
        if !self.is_open() {
            return Decimal::ZERO;
        }
        match self.side {
            Side::Yes => (current - self.entry_price) * self.shares,
            Side::No => (self.entry_price - current) * self.shares,
        }
    }
}

/// Arbitrage candidate supplied by an external scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub market_id: String,
    pub buy_venue: Venue,
    pub buy_price: Decimal,
    pub sell_venue: Venue,
    pub sell_price: Decimal,
    /// Stake per leg in USD
    pub size: Decimal,
    /// Percentage price difference between the two venues
    pub spread: Decimal,
    /// Observed liquidity on the thinner venue
    pub liquidity: Decimal,
}

impl Opportunity {
    /// Build an opportunity from a base price and a percentage spread.
    pub fn from_spread(
        market_id: &str,
        buy_venue: Venue,
        sell_venue: Venue,
        base_price: Decimal,
        spread_pct: Decimal,
        size: Decimal,
        liquidity: Decimal,
    ) -> Self {
        let sell_price = base_price * (Decimal::ONE + spread_pct / Decimal::ONE_HUNDRED);
        Self {
            market_id: market_id.to_string(),
            buy_venue,
            buy_price: base_price,
            sell_venue,
            sell_price,
            size,
            spread: spread_pct,
            liquidity,
        }
    }
}
