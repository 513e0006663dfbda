//! Pure risk approval for proposed trades.
//!
//! The manager performs no I/O: it reads a snapshot the ledger derived and
//! returns a typed decision. The drawdown check is terminal — callers latch
//! the agent's halted flag so later proposals short-circuit cheaply.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-agent risk bounds, fixed at registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum stake per position (USD)
    pub max_position_size: Decimal,
    /// Maximum total open notional (USD)
    pub max_total_exposure: Decimal,
    /// Maximum peak-to-current equity decline (fraction)
    pub max_drawdown: Decimal,
    /// Minimum required profit spread (percent)
    pub min_profit_spread: Decimal,
    /// Minimum market liquidity (USD)
    pub min_liquidity: Decimal,
    /// Maximum trades per UTC day
    pub max_trades_per_day: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(100),
            max_total_exposure: Decimal::from(5000),
            max_drawdown: Decimal::new(20, 2), // 0.20
            min_profit_spread: Decimal::new(20, 1), // 2.0%
            min_liquidity: Decimal::from(10_000),
            max_trades_per_day: 50,
        }
    }
}

/// Derived view of an agent's current risk state.
///
/// Always recomputed from ledger state plus the starting balance; never
/// stored independently.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskSnapshot {
    /// Sum of open position notional (USD)
    pub total_exposure: Decimal,
    /// Peak-to-current equity decline (fraction)
    pub drawdown: Decimal,
    /// Trades recorded today (UTC)
    pub trades_today: u32,
    /// Latched after a terminal drawdown rejection
    pub halted: bool,
}

/// What the agent wants to do, reduced to the numbers risk checks need
#[derive(Debug, Clone, Copy)]
pub struct ProposedTrade {
    /// Stake of the leg (USD)
    pub size: Decimal,
    /// Notional added to exposure if the leg fills (USD)
    pub notional: Decimal,
    /// Caller-observed market liquidity (USD)
    pub liquidity: Decimal,
}

/// Rejection reasons, ordered as the checks run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Agent previously tripped the drawdown limit
    TradingHalted,
    PositionTooLarge {
        limit: Decimal,
        requested: Decimal,
    },
    ExposureExceeded {
        limit: Decimal,
        current: Decimal,
        requested: Decimal,
    },
    /// Terminal: flips the agent-level halted state
    DrawdownExceeded {
        limit: Decimal,
        current: Decimal,
    },
    InsufficientLiquidity {
        minimum: Decimal,
        observed: Decimal,
    },
    TradeLimitReached {
        limit: u32,
    },
    /// Arbitrage-only pre-check: spread below the agent's minimum
    SpreadTooThin {
        minimum: Decimal,
        observed: Decimal,
    },
}

impl RejectReason {
    /// Terminal reasons halt the agent rather than rejecting one proposal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RejectReason::DrawdownExceeded { .. } | RejectReason::TradingHalted
        )
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TradingHalted => write!(f, "trading halted"),
            RejectReason::PositionTooLarge { limit, requested } => {
                write!(f, "position ${requested} exceeds limit ${limit}")
            }
            RejectReason::ExposureExceeded {
                limit,
                current,
                requested,
            } => write!(f, "exposure ${current} + ${requested} exceeds ${limit}"),
            RejectReason::DrawdownExceeded { limit, current } => {
                write!(f, "drawdown {current} exceeds limit {limit}, trading halted")
            }
            RejectReason::InsufficientLiquidity { minimum, observed } => {
                write!(f, "liquidity ${observed} below minimum ${minimum}")
            }
            RejectReason::TradeLimitReached { limit } => {
                write!(f, "daily trade limit {limit} reached")
            }
            RejectReason::SpreadTooThin { minimum, observed } => {
                write!(f, "spread {observed}% below minimum {minimum}%")
            }
        }
    }
}

/// Approval outcome
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved,
    Rejected(RejectReason),
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approved)
    }
}

/// Stateless validator; all state arrives via the snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskManager;

impl RiskManager {
    /// Run the five checks in order, short-circuiting on first failure.
    pub fn approve(
        &self,
        limits: &RiskLimits,
        proposed: &ProposedTrade,
        snapshot: &RiskSnapshot,
    ) -> RiskDecision {
        if snapshot.halted {
            return RiskDecision::Rejected(RejectReason::TradingHalted);
        }

        if proposed.size > limits.max_position_size {
            return RiskDecision::Rejected(RejectReason::PositionTooLarge {
                limit: limits.max_position_size,
                requested: proposed.size,
            });
        }

        if snapshot.total_exposure + proposed.notional > limits.max_total_exposure {
            return RiskDecision::Rejected(RejectReason::ExposureExceeded {
                limit: limits.max_total_exposure,
                current: snapshot.total_exposure,
                requested: proposed.notional,
            });
        }

        if snapshot.drawdown > limits.max_drawdown {
            return RiskDecision::Rejected(RejectReason::DrawdownExceeded {
                limit: limits.max_drawdown,
                current: snapshot.drawdown,
            });
        }

        if proposed.liquidity < limits.min_liquidity {
            return RiskDecision::Rejected(RejectReason::InsufficientLiquidity {
                minimum: limits.min_liquidity,
                observed: proposed.liquidity,
            });
        }

        if snapshot.trades_today >= limits.max_trades_per_day {
            return RiskDecision::Rejected(RejectReason::TradeLimitReached {
                limit: limits.max_trades_per_day,
            });
        }

        RiskDecision::Approved
    }
}
