//! Order router: risk gate, connector dispatch, bounded retry, fee capture.
//!
//! The connector is resolved from which credentials the agent carries —
//! resolution happens here, once per leg, and a real connector's error is
//! never downgraded to a simulated fill.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::domain::{next_trade_id, Fill, OrderRequest, Position, Trade, TradeLegs};
use crate::error::{EngineError, Result};
use crate::ledger::PositionLedger;
use crate::registry::AgentConfig;
use crate::risk::{ProposedTrade, RejectReason, RiskDecision, RiskManager};
use crate::venue::{ConnectorFactory, VenueConnector};

/// Result of routing one leg
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Filled { fill: Fill, fee: Decimal },
    RiskRejected { reason: RejectReason },
    Failed { reason: String },
}

impl ExecutionResult {
    pub fn is_filled(&self) -> bool {
        matches!(self, ExecutionResult::Filled { .. })
    }
}

pub struct OrderRouter {
    ledger: Arc<PositionLedger>,
    factory: Arc<dyn ConnectorFactory>,
    risk: RiskManager,
    fee_rate: Decimal,
    max_retries: u8,
    retry_backoff_ms: u64,
}

impl OrderRouter {
    pub fn new(
        ledger: Arc<PositionLedger>,
        factory: Arc<dyn ConnectorFactory>,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            ledger,
            factory,
            risk: RiskManager,
            fee_rate: engine.fee_rate,
            max_retries: engine.max_retries.max(1),
            retry_backoff_ms: engine.retry_backoff_ms,
        }
    }

    /// Platform fee for a leg of the given notional
    pub fn fee_for(&self, notional: Decimal) -> Decimal {
        (self.fee_rate * notional).round_dp(6)
    }

    /// Drop cached per-agent connectors after credential rotation
    pub fn invalidate_agent(&self, agent_id: &str) {
        self.factory.invalidate(agent_id);
    }

    /// Risk-gate a proposed leg against the agent's current snapshot.
    ///
    /// A terminal drawdown rejection latches the agent's halted state so
    /// later proposals short-circuit without recomputing the snapshot.
    pub async fn approve(&self, agent: &AgentConfig, order: &OrderRequest) -> RiskDecision {
        let snapshot = self.ledger.snapshot(&order.agent_id).await;
        let proposed = ProposedTrade {
            size: order.size,
            notional: order.notional(),
            liquidity: order.liquidity,
        };
        let decision = self.risk.approve(&agent.limits, &proposed, &snapshot);
        if let RiskDecision::Rejected(RejectReason::DrawdownExceeded { .. }) = &decision {
            self.ledger.mark_halted(&order.agent_id).await;
        }
        decision
    }

    /// Risk gate + connector execution for one leg. No trade is recorded
    /// here; callers that assemble multi-leg trades persist one record.
    pub async fn execute_leg(&self, agent: &AgentConfig, order: &OrderRequest) -> Result<Fill> {
        if let RiskDecision::Rejected(reason) = self.approve(agent, order).await {
            debug!(agent_id = %order.agent_id, %reason, "leg rejected by risk gate");
            return Err(EngineError::RiskRejected(reason));
        }

        let connector =
            self.factory
                .connector(&agent.agent_id, order.venue, &agent.credentials)?;
        self.execute_with_retry(connector, order).await
    }

    async fn execute_with_retry(
        &self,
        connector: Arc<dyn VenueConnector>,
        order: &OrderRequest,
    ) -> Result<Fill> {
        let mut attempt: u8 = 1;
        loop {
            match connector.execute(order).await {
                Ok(fill) => return Ok(fill),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay_ms = self.retry_backoff_ms * (1u64 << (attempt - 1));
                    warn!(
                        venue = %order.venue,
                        market = %order.market_id,
                        attempt,
                        delay_ms,
                        error = %e,
                        "transient submission failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Direct single-leg entry point: risk gate, execute, record.
    ///
    /// Risk rejections return immediately — no connector call, no fee, no
    /// trade record. Connector failures are recorded as failed trades.
    pub async fn place_single(&self, agent: &AgentConfig, order: &OrderRequest) -> ExecutionResult {
        if let RiskDecision::Rejected(reason) = self.approve(agent, order).await {
            return ExecutionResult::RiskRejected { reason };
        }

        let connector =
            match self
                .factory
                .connector(&agent.agent_id, order.venue, &agent.credentials)
            {
                Ok(connector) => connector,
                Err(e) => {
                    let reason = e.to_string();
                    self.record_single_failure(order, &reason).await;
                    return ExecutionResult::Failed { reason };
                }
            };

        match self.execute_with_retry(connector, order).await {
            Ok(fill) => {
                let fee = self.fee_for(order.notional());
                let shares = if fill.price > Decimal::ZERO {
                    order.size / fill.price
                } else {
                    Decimal::ZERO
                };
                let position = Position::open(
                    &order.market_id,
                    order.venue,
                    order.side,
                    shares,
                    fill.price,
                    false,
                );
                let trade = Trade {
                    trade_id: next_trade_id(&order.agent_id, 0),
                    agent_id: order.agent_id.clone(),
                    market_id: order.market_id.clone(),
                    legs: TradeLegs::Single {
                        venue: order.venue,
                        order_id: Some(fill.order_id.clone()),
                    },
                    size: order.size,
                    spread: Decimal::ZERO,
                    expected_profit: Decimal::ZERO,
                    platform_fee: fee,
                    net_profit: -fee,
                    success: true,
                    failure_reason: None,
                    simulated: fill.simulated,
                    executed_at: fill.executed_at,
                };
                self.ledger.record_trade(trade, vec![position]).await;
                ExecutionResult::Filled { fill, fee }
            }
            Err(e) => {
                let reason = e.to_string();
                self.record_single_failure(order, &reason).await;
                ExecutionResult::Failed { reason }
            }
        }
    }

    async fn record_single_failure(&self, order: &OrderRequest, reason: &str) {
        let trade = Trade {
            trade_id: next_trade_id(&order.agent_id, 0),
            agent_id: order.agent_id.clone(),
            market_id: order.market_id.clone(),
            legs: TradeLegs::Single {
                venue: order.venue,
                order_id: None,
            },
            size: order.size,
            spread: Decimal::ZERO,
            expected_profit: Decimal::ZERO,
            platform_fee: Decimal::ZERO,
            net_profit: Decimal::ZERO,
            success: false,
            failure_reason: Some(reason.to_string()),
            simulated: false,
            executed_at: chrono::Utc::now(),
        };
        self.ledger.record_trade(trade, vec![]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FillStatus, OrderType, Side, Venue};
    use crate::risk::RiskLimits;
    use crate::venue::AgentCredentials;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyConnector {
        venue: Venue,
        failures_before_fill: u32,
        calls: AtomicU32,
        error: fn(u32) -> EngineError,
    }

    #[async_trait]
    impl VenueConnector for FlakyConnector {
        fn venue(&self) -> Venue {
            self.venue
        }

        async fn execute(&self, order: &OrderRequest) -> Result<Fill> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_fill {
                return Err((self.error)(call));
            }
            Ok(Fill {
                order_id: format!("{}-{}", self.venue.prefix(), call),
                venue: self.venue,
                status: FillStatus::Filled,
                price: order.price.unwrap_or(dec!(0.5)),
                simulated: false,
                latency_ms: 1,
                executed_at: Utc::now(),
            })
        }
    }

    struct FixedFactory {
        connector: Arc<FlakyConnector>,
    }

    impl ConnectorFactory for FixedFactory {
        fn connector(
            &self,
            _agent_id: &str,
            _venue: Venue,
            _credentials: &AgentCredentials,
        ) -> Result<Arc<dyn VenueConnector>> {
            Ok(self.connector.clone())
        }
    }

    fn agent(limits: RiskLimits) -> AgentConfig {
        AgentConfig {
            agent_id: "agent-1".into(),
            wallet_address: "0x1111111111111111111111111111111111111111".into(),
            platforms: [(Venue::Polymarket, true), (Venue::Kalshi, true)]
                .into_iter()
                .collect(),
            strategy: crate::registry::Strategy::Arbitrage,
            limits,
            credentials: AgentCredentials::none(),
            active: false,
            created_at: Utc::now(),
        }
    }

    fn order(size: Decimal) -> OrderRequest {
        OrderRequest {
            agent_id: "agent-1".into(),
            venue: Venue::Polymarket,
            market_id: "mkt-1".into(),
            side: Side::Yes,
            order_type: OrderType::Limit,
            size,
            price: Some(dec!(0.50)),
            liquidity: dec!(100000),
        }
    }

    fn router_with(
        failures: u32,
        error: fn(u32) -> EngineError,
    ) -> (OrderRouter, Arc<FlakyConnector>, Arc<PositionLedger>) {
        let connector = Arc::new(FlakyConnector {
            venue: Venue::Polymarket,
            failures_before_fill: failures,
            calls: AtomicU32::new(0),
            error,
        });
        let ledger = Arc::new(PositionLedger::new(dec!(10000)));
        let mut engine = EngineConfig::default();
        engine.retry_backoff_ms = 1;
        let router = OrderRouter::new(
            ledger.clone(),
            Arc::new(FixedFactory {
                connector: connector.clone(),
            }),
            &engine,
        );
        (router, connector, ledger)
    }

    #[tokio::test]
    async fn transient_submission_failures_are_retried() {
        let (router, connector, _) =
            router_with(2, |i| EngineError::Submission(format!("venue busy {i}")));
        let fill = router
            .execute_leg(&agent(RiskLimits::default()), &order(dec!(50)))
            .await
            .unwrap();
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fill.status, FillStatus::Filled);
    }

    #[tokio::test]
    async fn authentication_errors_are_not_retried() {
        let (router, connector, _) = router_with(5, |_| EngineError::Auth("bad key".into()));
        let err = router
            .execute_leg(&agent(RiskLimits::default()), &order(dec!(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Auth(_)));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn risk_rejection_never_reaches_the_connector() {
        let (router, connector, ledger) = router_with(0, |_| EngineError::Internal("n/a".into()));
        let mut limits = RiskLimits::default();
        limits.max_position_size = dec!(10);

        let result = router.place_single(&agent(limits), &order(dec!(50))).await;
        assert!(matches!(result, ExecutionResult::RiskRejected { .. }));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.system_stats().await.total_trades, 0);
    }

    #[tokio::test]
    async fn connector_failures_are_recorded_not_dropped() {
        let (router, _, ledger) = router_with(5, |_| {
            EngineError::InsufficientBalance("collateral".into())
        });
        let result = router
            .place_single(&agent(RiskLimits::default()), &order(dec!(50)))
            .await;
        assert!(matches!(result, ExecutionResult::Failed { .. }));

        let trades = ledger.recent_trades("agent-1", 10).await;
        assert_eq!(trades.len(), 1);
        assert!(!trades[0].success);
        assert!(trades[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("Insufficient balance"));
    }

    #[tokio::test]
    async fn successful_single_leg_records_fee() {
        let (router, _, ledger) = router_with(0, |_| EngineError::Internal("n/a".into()));
        let result = router
            .place_single(&agent(RiskLimits::default()), &order(dec!(50)))
            .await;
        let ExecutionResult::Filled { fee, .. } = result else {
            panic!("expected fill");
        };
        assert_eq!(fee, dec!(0.50));

        let system = ledger.system_stats().await;
        assert_eq!(system.total_trades, 1);
        assert_eq!(system.total_fees_collected, dec!(0.50));
    }
}
