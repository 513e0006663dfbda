//! Engine facade wiring the registry, router, executors, ledger, and store
//! behind the public API surface.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::{Opportunity, OrderRequest, OrderType, Position, Side, Trade, Venue};
use crate::error::{EngineError, Result};
use crate::executor::{ArbitrageExecutor, ArbitrageOutcome, DirectionalExecutor};
use crate::ledger::{AgentStats, PortfolioSummary, PositionLedger};
use crate::registry::{AgentRegistry, AgentView, RegisterRequest};
use crate::router::{ExecutionResult, OrderRouter};
use crate::scan::{OpportunitySource, SimulatedOpportunitySource};
use crate::store::{EngineSnapshot, StateStore};
use crate::venue::{AgentCredentials, CredentialConnectorFactory};

/// Direct single-leg order input
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub agent_id: String,
    pub platform: Venue,
    pub market_id: String,
    pub side: Side,
    pub order_type: OrderType,
    pub size: Decimal,
    pub price: Option<Decimal>,
    /// Observed market liquidity; defaults to the agent's minimum when the
    /// caller has no fresher number
    pub liquidity: Option<Decimal>,
}

/// Status report with credentials redacted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub config: AgentView,
    pub running: bool,
    pub stats: AgentStats,
    pub portfolio: PortfolioSummary,
    pub recent_trades: Vec<Trade>,
}

/// Platform-wide aggregate view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub total_trades: u64,
    pub total_volume: Decimal,
    pub total_fees_collected: Decimal,
    pub fee_rate: Decimal,
}

pub struct TradingEngine {
    config: AppConfig,
    ledger: Arc<PositionLedger>,
    router: Arc<OrderRouter>,
    arbitrage: Arc<ArbitrageExecutor>,
    registry: Arc<AgentRegistry>,
    store: StateStore,
}

impl TradingEngine {
    /// Build an engine with the default simulated opportunity source.
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_source(config, Arc::new(SimulatedOpportunitySource::default()))
    }

    /// Build an engine with a caller-supplied opportunity source.
    pub fn with_source(config: AppConfig, source: Arc<dyn OpportunitySource>) -> Result<Self> {
        if let Err(errors) = config.validate() {
            return Err(EngineError::Validation(errors.join("; ")));
        }

        let store = StateStore::new(&config.storage.data_dir, &config.storage.snapshot_file)?;
        let snapshot = store.load()?.unwrap_or_default();

        let ledger = Arc::new(PositionLedger::restore(
            config.engine.starting_balance,
            snapshot.books,
            snapshot.system,
        ));

        let factory = Arc::new(CredentialConnectorFactory::new(
            config.venues.clone(),
            &config.engine,
        ));
        let router = Arc::new(OrderRouter::new(
            ledger.clone(),
            factory,
            &config.engine,
        ));

        let arbitrage = Arc::new(ArbitrageExecutor::new(router.clone(), ledger.clone()));
        let directional = Arc::new(DirectionalExecutor::new(router.clone()));

        let registry = Arc::new(AgentRegistry::new(
            arbitrage.clone(),
            directional,
            source,
            ledger.clone(),
            config.risk.clone(),
            config.engine.starting_balance,
            Duration::from_millis(config.engine.cycle_interval_ms),
        ));

        for agent in snapshot.agents {
            registry.restore(agent);
        }

        Ok(Self {
            config,
            ledger,
            router,
            arbitrage,
            registry,
            store,
        })
    }

    // ==================== agent lifecycle ====================

    pub async fn register_agent(&self, request: RegisterRequest) -> Result<String> {
        let agent_id = self.registry.register(request)?;
        self.persist().await?;
        Ok(agent_id)
    }

    pub async fn activate_agent(&self, agent_id: &str) -> Result<()> {
        self.registry.activate(agent_id).await?;
        self.persist().await
    }

    pub async fn deactivate_agent(&self, agent_id: &str) -> Result<()> {
        self.registry.deactivate(agent_id).await?;
        self.persist().await
    }

    /// Replace an agent's credentials and drop connectors built from the
    /// old material.
    pub async fn rotate_credentials(
        &self,
        agent_id: &str,
        credentials: AgentCredentials,
    ) -> Result<()> {
        self.registry.rotate_credentials(agent_id, credentials).await?;
        self.router.invalidate_agent(agent_id);
        self.persist().await
    }

    // ==================== trading ====================

    /// Direct single-leg order, still passing through the risk gate and
    /// router.
    pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<ExecutionResult> {
        let config = self.registry.config(&request.agent_id).await?;
        let order = OrderRequest {
            agent_id: request.agent_id.clone(),
            venue: request.platform,
            market_id: request.market_id,
            side: request.side,
            order_type: request.order_type,
            size: request.size,
            price: request.price,
            liquidity: request
                .liquidity
                .unwrap_or(config.limits.min_liquidity),
        };

        let result = self.router.place_single(&config, &order).await;
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist after order");
        }
        Ok(result)
    }

    /// Execute one arbitrage opportunity outside the strategy loop. Same
    /// path the loop takes: spread pre-check, risk gate per leg, fail-closed
    /// pairing.
    pub async fn execute_arbitrage(
        &self,
        agent_id: &str,
        opportunity: &Opportunity,
    ) -> Result<ArbitrageOutcome> {
        let config = self.registry.config(agent_id).await?;
        let outcome = self.arbitrage.execute(&config, opportunity).await?;
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist after arbitrage");
        }
        Ok(outcome)
    }

    /// Close an open position at the given exit price; returns realized P&L
    pub async fn close_position(
        &self,
        agent_id: &str,
        position_id: &str,
        exit_price: Decimal,
    ) -> Result<Decimal> {
        let pnl = self
            .ledger
            .close_position(agent_id, position_id, exit_price)
            .await?;
        self.persist().await?;
        Ok(pnl)
    }

    // ==================== views ====================

    pub async fn agent_status(&self, agent_id: &str) -> Result<AgentStatusReport> {
        let config = self.registry.config(agent_id).await?;
        let stats = self.ledger.agent_stats(agent_id).await;
        let portfolio = self
            .ledger
            .portfolio_summary(agent_id, &HashMap::new())
            .await;
        let recent_trades = self
            .ledger
            .recent_trades(agent_id, self.config.engine.recent_trades)
            .await;

        Ok(AgentStatusReport {
            running: self.registry.is_active(agent_id),
            config: config.view(),
            stats,
            portfolio,
            recent_trades,
        })
    }

    pub async fn portfolio_summary(
        &self,
        agent_id: &str,
        marks: &HashMap<String, Decimal>,
    ) -> Result<PortfolioSummary> {
        self.registry.get(agent_id)?;
        Ok(self.ledger.portfolio_summary(agent_id, marks).await)
    }

    pub async fn open_positions(&self, agent_id: &str) -> Result<Vec<Position>> {
        self.registry.get(agent_id)?;
        Ok(self.ledger.open_positions(agent_id).await)
    }

    pub async fn list_agents(&self) -> Vec<AgentView> {
        self.registry.list_views().await
    }

    pub async fn platform_stats(&self) -> PlatformStats {
        let views = self.registry.list_views().await;
        let active_agents = views
            .iter()
            .filter(|v| self.registry.is_active(&v.agent_id))
            .count();
        let system = self.ledger.system_stats().await;

        PlatformStats {
            total_agents: views.len(),
            active_agents,
            total_trades: system.total_trades,
            total_volume: system.total_volume,
            total_fees_collected: system.total_fees_collected,
            fee_rate: self.config.engine.fee_rate,
        }
    }

    // ==================== persistence / shutdown ====================

    /// Write the current snapshot to disk
    pub async fn persist(&self) -> Result<()> {
        let agents = self.registry.export_configs().await;
        let (books, system) = self.ledger.export().await;
        let snapshot = EngineSnapshot {
            saved_at: Some(Utc::now()),
            agents,
            books,
            system,
        };
        self.store.save(&snapshot)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.config.engine.checkpoint_interval_secs)
    }

    /// Stop every agent loop and write a final snapshot
    pub async fn shutdown(&self) -> Result<()> {
        info!("engine shutting down");
        self.registry.deactivate_all().await;
        self.persist().await
    }
}
