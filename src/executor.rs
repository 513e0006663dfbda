//! Strategy executors: two-leg arbitrage and direct directional entries.
//!
//! Arbitrage is fail-closed: leg B is never attempted after a leg A failure,
//! and a leg B failure after a leg A fill is recorded as a partial failure
//! with the surviving position left open. Unwinding that position is a
//! trading decision and stays out of scope.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::{
    next_trade_id, Fill, Opportunity, OrderRequest, OrderType, Position, Side, Trade, TradeLegs,
};
use crate::error::{EngineError, Result};
use crate::ledger::PositionLedger;
use crate::registry::AgentConfig;
use crate::risk::RejectReason;
use crate::router::{ExecutionResult, OrderRouter};

/// Failure reason recorded when leg B fails after leg A filled
pub const PARTIAL_LEG_FAILURE: &str = "PartialLegFailure";

/// Outcome of one arbitrage attempt. The trade is already recorded when
/// this is returned; `trade.success` tells the two apart.
#[derive(Debug, Clone)]
pub struct ArbitrageOutcome {
    pub trade: Trade,
    pub buy_fill: Option<Fill>,
    pub sell_fill: Option<Fill>,
}

pub struct ArbitrageExecutor {
    router: Arc<OrderRouter>,
    ledger: Arc<PositionLedger>,
}

impl ArbitrageExecutor {
    pub fn new(router: Arc<OrderRouter>, ledger: Arc<PositionLedger>) -> Self {
        Self { router, ledger }
    }

    fn leg_request(agent: &AgentConfig, opp: &Opportunity, buy: bool) -> OrderRequest {
        OrderRequest {
            agent_id: agent.agent_id.clone(),
            venue: if buy { opp.buy_venue } else { opp.sell_venue },
            market_id: opp.market_id.clone(),
            side: if buy { Side::Yes } else { Side::No },
            order_type: OrderType::Limit,
            size: opp.size,
            price: Some(if buy { opp.buy_price } else { opp.sell_price }),
            liquidity: opp.liquidity,
        }
    }

    /// Execute both legs of an opportunity.
    ///
    /// Errors mean nothing reached a venue (spread too thin, or leg A was
    /// risk-rejected). Every other path records exactly one paired trade.
    pub async fn execute(&self, agent: &AgentConfig, opp: &Opportunity) -> Result<ArbitrageOutcome> {
        // Pre-check before any routing: not profitable enough to try
        if opp.spread < agent.limits.min_profit_spread {
            return Err(EngineError::RiskRejected(RejectReason::SpreadTooThin {
                minimum: agent.limits.min_profit_spread,
                observed: opp.spread,
            }));
        }

        let buy_order = Self::leg_request(agent, opp, true);
        let buy_fill = match self.router.execute_leg(agent, &buy_order).await {
            Ok(fill) => fill,
            // Risk gate said no: nothing reached a venue, nothing to record
            Err(e @ EngineError::RiskRejected(_)) => return Err(e),
            Err(e) => {
                // Leg A reached the venue and failed; record the dead pair
                let trade = self.pair_trade(agent, opp, None, None, false, Some(e.to_string()));
                self.ledger.record_trade(trade.clone(), vec![]).await;
                return Ok(ArbitrageOutcome {
                    trade,
                    buy_fill: None,
                    sell_fill: None,
                });
            }
        };

        let sell_order = Self::leg_request(agent, opp, false);
        let sell_fill = match self.router.execute_leg(agent, &sell_order).await {
            Ok(fill) => fill,
            Err(e) => {
                // Leg A is filled and cannot be taken back: the position
                // stays open and unhedged, and the pair is recorded failed.
                error!(
                    agent_id = %agent.agent_id,
                    market = %opp.market_id,
                    buy_venue = %opp.buy_venue,
                    sell_venue = %opp.sell_venue,
                    error = %e,
                    "partial arbitrage failure: sell leg failed after buy leg filled"
                );
                let open_leg = self.open_position(&buy_fill, opp, Side::Yes, false);
                let fee_a = self.router.fee_for(opp.size);
                let mut trade = self.pair_trade(
                    agent,
                    opp,
                    Some(&buy_fill),
                    None,
                    false,
                    Some(format!("{PARTIAL_LEG_FAILURE}: {e}")),
                );
                trade.platform_fee = fee_a;
                trade.net_profit = -fee_a;
                self.ledger.record_trade(trade.clone(), vec![open_leg]).await;
                return Ok(ArbitrageOutcome {
                    trade,
                    buy_fill: Some(buy_fill),
                    sell_fill: None,
                });
            }
        };

        // Both legs filled: one logical trade covering the pair
        let shares = if buy_fill.price > Decimal::ZERO {
            opp.size / buy_fill.price
        } else {
            Decimal::ZERO
        };
        let expected_profit = (sell_fill.price - buy_fill.price) * shares;
        let fee = self.router.fee_for(opp.size) * Decimal::TWO;
        let net_profit = expected_profit - fee;

        let mut trade = self.pair_trade(agent, opp, Some(&buy_fill), Some(&sell_fill), true, None);
        trade.expected_profit = expected_profit;
        trade.platform_fee = fee;
        trade.net_profit = net_profit;

        let positions = vec![
            self.open_position(&buy_fill, opp, Side::Yes, true),
            self.open_position(&sell_fill, opp, Side::No, true),
        ];

        info!(
            agent_id = %agent.agent_id,
            market = %opp.market_id,
            spread = %opp.spread,
            net_profit = %net_profit,
            simulated = trade.simulated,
            "arbitrage pair executed"
        );

        self.ledger.record_trade(trade.clone(), positions).await;

        Ok(ArbitrageOutcome {
            trade,
            buy_fill: Some(buy_fill),
            sell_fill: Some(sell_fill),
        })
    }

    fn open_position(&self, fill: &Fill, opp: &Opportunity, side: Side, hedged: bool) -> Position {
        let shares = if fill.price > Decimal::ZERO {
            opp.size / fill.price
        } else {
            Decimal::ZERO
        };
        Position::open(&opp.market_id, fill.venue, side, shares, fill.price, hedged)
    }

    fn pair_trade(
        &self,
        agent: &AgentConfig,
        opp: &Opportunity,
        buy_fill: Option<&Fill>,
        sell_fill: Option<&Fill>,
        success: bool,
        failure_reason: Option<String>,
    ) -> Trade {
        Trade {
            trade_id: next_trade_id(&agent.agent_id, 0),
            agent_id: agent.agent_id.clone(),
            market_id: opp.market_id.clone(),
            legs: TradeLegs::Pair {
                buy_venue: opp.buy_venue,
                sell_venue: opp.sell_venue,
                buy_order_id: buy_fill.map(|f| f.order_id.clone()),
                sell_order_id: sell_fill.map(|f| f.order_id.clone()),
            },
            size: opp.size,
            spread: opp.spread,
            expected_profit: Decimal::ZERO,
            platform_fee: Decimal::ZERO,
            net_profit: Decimal::ZERO,
            success,
            failure_reason,
            simulated: match (buy_fill, sell_fill) {
                (Some(b), Some(s)) => b.simulated && s.simulated,
                (Some(b), None) => b.simulated,
                _ => false,
            },
            executed_at: chrono::Utc::now(),
        }
    }
}

/// Direct single-leg strategy: one order through the router
pub struct DirectionalExecutor {
    router: Arc<OrderRouter>,
}

impl DirectionalExecutor {
    pub fn new(router: Arc<OrderRouter>) -> Self {
        Self { router }
    }

    pub async fn execute(&self, agent: &AgentConfig, order: &OrderRequest) -> ExecutionResult {
        self.router.place_single(agent, order).await
    }
}
