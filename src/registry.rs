//! Agent registry: configuration lifecycle and per-agent execution loops.
//!
//! One cancellable tokio task per active agent. Cancellation rides a watch
//! channel checked at every suspension point; a leg already in flight
//! completes and is still recorded. Agents are soft-disabled, never deleted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RiskDefaults;
use crate::domain::{OrderRequest, OrderType, Side, Venue};
use crate::error::{EngineError, Result};
use crate::executor::{ArbitrageExecutor, DirectionalExecutor};
use crate::ledger::PositionLedger;
use crate::risk::RiskLimits;
use crate::router::ExecutionResult;
use crate::scan::OpportunitySource;
use crate::venue::{AgentCredentials, CredentialPresence};

/// Strategy an agent runs each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Arbitrage,
    Directional,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Arbitrage => write!(f, "arbitrage"),
            Strategy::Directional => write!(f, "directional"),
        }
    }
}

impl FromStr for Strategy {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "arbitrage" => Ok(Strategy::Arbitrage),
            "directional" => Ok(Strategy::Directional),
            _ => Err("invalid strategy; expected arbitrage|directional"),
        }
    }
}

/// Full agent record. Credentials live here and in the persisted snapshot
/// only; every read path goes through [`AgentView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub wallet_address: String,
    pub platforms: BTreeMap<Venue, bool>,
    pub strategy: Strategy,
    pub limits: RiskLimits,
    pub credentials: AgentCredentials,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl AgentConfig {
    pub fn enabled_venues(&self) -> Vec<Venue> {
        self.platforms
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(venue, _)| *venue)
            .collect()
    }

    /// Redacted view safe for status reports and listings
    pub fn view(&self) -> AgentView {
        AgentView {
            agent_id: self.agent_id.clone(),
            wallet_address: self.wallet_address.clone(),
            platforms: self.platforms.clone(),
            strategy: self.strategy,
            limits: self.limits.clone(),
            credentials: self.credentials.presence(),
            active: self.active,
            created_at: self.created_at,
        }
    }
}

/// Agent config with credential material stripped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    pub agent_id: String,
    pub wallet_address: String,
    pub platforms: BTreeMap<Venue, bool>,
    pub strategy: Strategy,
    pub limits: RiskLimits,
    pub credentials: CredentialPresence,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Registration input
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub wallet_address: String,
    pub platforms: BTreeMap<Venue, bool>,
    pub strategy: Strategy,
    /// Maximum stake per position (USD), must be in [10, 10000]
    pub max_position: Decimal,
    /// Minimum profit spread (percent), must be in [0.1, 50]
    pub min_profit: Decimal,
    pub max_trades: u32,
    /// Maximum drawdown fraction in (0, 1]
    pub stop_loss: Decimal,
    pub credentials: AgentCredentials,
}

impl RegisterRequest {
    fn validate(&self) -> Result<()> {
        let wallet = self.wallet_address.trim();
        let hex_part = wallet.strip_prefix("0x").unwrap_or("");
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::Validation(format!(
                "wallet address must be 0x followed by 40 hex chars: {wallet}"
            )));
        }

        if self.max_position < Decimal::from(10) || self.max_position > Decimal::from(10_000) {
            return Err(EngineError::Validation(format!(
                "max_position {} outside [10, 10000]",
                self.max_position
            )));
        }

        if self.min_profit < Decimal::new(1, 1) || self.min_profit > Decimal::from(50) {
            return Err(EngineError::Validation(format!(
                "min_profit {}% outside [0.1, 50]",
                self.min_profit
            )));
        }

        if self.max_trades == 0 {
            return Err(EngineError::Validation(
                "max_trades must be at least 1".to_string(),
            ));
        }

        if self.stop_loss <= Decimal::ZERO || self.stop_loss > Decimal::ONE {
            return Err(EngineError::Validation(format!(
                "stop_loss {} outside (0, 1]",
                self.stop_loss
            )));
        }

        if !self.platforms.values().any(|enabled| *enabled) {
            return Err(EngineError::Validation(
                "at least one platform must be enabled".to_string(),
            ));
        }

        Ok(())
    }
}

/// Per-agent runtime state
pub struct AgentHandle {
    pub config: RwLock<AgentConfig>,
    runtime: StdMutex<AgentRuntime>,
}

#[derive(Default)]
struct AgentRuntime {
    cancel: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl AgentRuntime {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl AgentHandle {
    fn new(config: AgentConfig) -> Self {
        Self {
            config: RwLock::new(config),
            runtime: StdMutex::new(AgentRuntime::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().expect("runtime lock").is_running()
    }
}

struct LoopDeps {
    arbitrage: Arc<ArbitrageExecutor>,
    directional: Arc<DirectionalExecutor>,
    source: Arc<dyn OpportunitySource>,
    cycle_interval: Duration,
}

/// Owns every agent record; all mutation goes through registry methods.
pub struct AgentRegistry {
    agents: DashMap<String, Arc<AgentHandle>>,
    arbitrage: Arc<ArbitrageExecutor>,
    directional: Arc<DirectionalExecutor>,
    source: Arc<dyn OpportunitySource>,
    ledger: Arc<PositionLedger>,
    risk_defaults: RiskDefaults,
    starting_balance: Decimal,
    cycle_interval: Duration,
}

impl AgentRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        arbitrage: Arc<ArbitrageExecutor>,
        directional: Arc<DirectionalExecutor>,
        source: Arc<dyn OpportunitySource>,
        ledger: Arc<PositionLedger>,
        risk_defaults: RiskDefaults,
        starting_balance: Decimal,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            agents: DashMap::new(),
            arbitrage,
            directional,
            source,
            ledger,
            risk_defaults,
            starting_balance,
            cycle_interval,
        }
    }

    /// Validate and create a new agent. Returns the generated agent id.
    pub fn register(&self, request: RegisterRequest) -> Result<String> {
        request.validate()?;

        let wallet = request.wallet_address.trim().to_ascii_lowercase();
        let agent_id = format!("{}-{}", &wallet[2..10], Utc::now().timestamp_millis());

        let config = AgentConfig {
            agent_id: agent_id.clone(),
            wallet_address: wallet,
            platforms: request.platforms,
            strategy: request.strategy,
            limits: RiskLimits {
                max_position_size: request.max_position,
                max_total_exposure: self.risk_defaults.max_total_exposure,
                max_drawdown: request.stop_loss,
                min_profit_spread: request.min_profit,
                min_liquidity: self.risk_defaults.min_liquidity,
                max_trades_per_day: request.max_trades,
            },
            credentials: request.credentials,
            active: false,
            created_at: Utc::now(),
        };

        self.ledger.ensure_book(&agent_id, self.starting_balance);
        info!(
            agent_id = %agent_id,
            strategy = %config.strategy,
            venues = ?config.enabled_venues(),
            "agent registered"
        );
        self.agents
            .insert(agent_id.clone(), Arc::new(AgentHandle::new(config)));

        Ok(agent_id)
    }

    /// Re-insert an agent from a persisted snapshot. Loops are not resumed
    /// automatically; a restored agent starts deactivated.
    pub fn restore(&self, mut config: AgentConfig) {
        config.active = false;
        self.ledger
            .ensure_book(&config.agent_id, self.starting_balance);
        self.agents
            .insert(config.agent_id.clone(), Arc::new(AgentHandle::new(config)));
    }

    pub fn get(&self, agent_id: &str) -> Result<Arc<AgentHandle>> {
        self.agents
            .get(agent_id)
            .map(|h| h.clone())
            .ok_or_else(|| EngineError::AgentNotFound(agent_id.to_string()))
    }

    pub async fn config(&self, agent_id: &str) -> Result<AgentConfig> {
        let handle = self.get(agent_id)?;
        let config = handle.config.read().await.clone();
        Ok(config)
    }

    pub async fn list_views(&self) -> Vec<AgentView> {
        let mut views = Vec::with_capacity(self.agents.len());
        for entry in self.agents.iter() {
            views.push(entry.value().config.read().await.view());
        }
        views
    }

    pub async fn export_configs(&self) -> Vec<AgentConfig> {
        let mut configs = Vec::with_capacity(self.agents.len());
        for entry in self.agents.iter() {
            configs.push(entry.value().config.read().await.clone());
        }
        configs
    }

    pub fn is_active(&self, agent_id: &str) -> bool {
        self.agents
            .get(agent_id)
            .map(|h| h.is_running())
            .unwrap_or(false)
    }

    /// Start the agent's execution loop. Activating an already-active agent
    /// is a no-op success and leaves exactly one loop running.
    pub async fn activate(&self, agent_id: &str) -> Result<()> {
        let handle = self.get(agent_id)?;
        let config = handle.config.read().await.clone();

        let deps = LoopDeps {
            arbitrage: self.arbitrage.clone(),
            directional: self.directional.clone(),
            source: self.source.clone(),
            cycle_interval: self.cycle_interval,
        };

        {
            let mut runtime = handle.runtime.lock().expect("runtime lock");
            if runtime.is_running() {
                debug!(agent_id, "activate: loop already running");
                return Ok(());
            }

            let (cancel_tx, cancel_rx) = watch::channel(false);
            let loop_handle = handle.clone();
            let task = tokio::spawn(async move {
                run_agent_loop(loop_handle, deps, cancel_rx).await;
            });
            runtime.cancel = Some(cancel_tx);
            runtime.task = Some(task);
        }

        handle.config.write().await.active = true;
        info!(agent_id, strategy = %config.strategy, "agent activated");
        Ok(())
    }

    /// Signal the loop to stop. The loop observes the signal within one
    /// sleep interval; an in-flight leg completes and is still recorded.
    pub async fn deactivate(&self, agent_id: &str) -> Result<()> {
        let handle = self.get(agent_id)?;

        {
            let runtime = handle.runtime.lock().expect("runtime lock");
            if let Some(cancel) = runtime.cancel.as_ref() {
                let _ = cancel.send(true);
            }
        }

        let mut config = handle.config.write().await;
        if config.active {
            config.active = false;
            info!(agent_id, "agent deactivated");
        } else {
            debug!(agent_id, "deactivate: agent already inactive");
        }
        Ok(())
    }

    /// Stop every running loop (engine shutdown)
    pub async fn deactivate_all(&self) {
        let ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.deactivate(&id).await;
        }
    }

    /// Replace the agent's credentials. The caller is responsible for
    /// dropping cached connectors built from the old material.
    pub async fn rotate_credentials(
        &self,
        agent_id: &str,
        credentials: AgentCredentials,
    ) -> Result<()> {
        let handle = self.get(agent_id)?;
        handle.config.write().await.credentials = credentials;
        info!(agent_id, "credentials rotated");
        Ok(())
    }
}

async fn run_agent_loop(
    handle: Arc<AgentHandle>,
    deps: LoopDeps,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let agent_id = handle.config.read().await.agent_id.clone();
    info!(agent_id = %agent_id, "agent loop started");

    loop {
        if *cancel_rx.borrow() {
            break;
        }

        let config = handle.config.read().await.clone();

        match config.strategy {
            Strategy::Arbitrage => {
                if let Some(opp) = deps.source.next_opportunity(&config).await {
                    match deps.arbitrage.execute(&config, &opp).await {
                        Ok(outcome) if outcome.trade.success => {
                            debug!(
                                agent_id = %agent_id,
                                trade_id = %outcome.trade.trade_id,
                                net_profit = %outcome.trade.net_profit,
                                "cycle executed arbitrage pair"
                            );
                        }
                        Ok(outcome) => {
                            warn!(
                                agent_id = %agent_id,
                                trade_id = %outcome.trade.trade_id,
                                reason = outcome.trade.failure_reason.as_deref().unwrap_or(""),
                                "cycle recorded failed arbitrage"
                            );
                        }
                        Err(EngineError::RiskRejected(reason)) => {
                            debug!(agent_id = %agent_id, %reason, "proposal rejected");
                        }
                        Err(e) => {
                            warn!(agent_id = %agent_id, error = %e, "arbitrage attempt failed");
                        }
                    }
                }
            }
            Strategy::Directional => {
                if let Some(opp) = deps.source.next_opportunity(&config).await {
                    let order = OrderRequest {
                        agent_id: config.agent_id.clone(),
                        venue: opp.buy_venue,
                        market_id: opp.market_id.clone(),
                        side: Side::Yes,
                        order_type: OrderType::Limit,
                        size: opp.size,
                        price: Some(opp.buy_price),
                        liquidity: opp.liquidity,
                    };
                    match deps.directional.execute(&config, &order).await {
                        ExecutionResult::Filled { fill, .. } => {
                            debug!(agent_id = %agent_id, order_id = %fill.order_id, "cycle placed directional order");
                        }
                        ExecutionResult::RiskRejected { reason } => {
                            debug!(agent_id = %agent_id, %reason, "proposal rejected");
                        }
                        ExecutionResult::Failed { reason } => {
                            warn!(agent_id = %agent_id, %reason, "directional order failed");
                        }
                    }
                }
            }
        }

        // Sleep between cycles; deactivation interrupts the wait
        tokio::select! {
            _ = tokio::time::sleep(deps.cycle_interval) => {}
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(agent_id = %agent_id, "agent loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> RegisterRequest {
        RegisterRequest {
            wallet_address: "0xAbCd111122223333444455556666777788889999".to_string(),
            platforms: [(Venue::Polymarket, true), (Venue::Kalshi, true)]
                .into_iter()
                .collect(),
            strategy: Strategy::Arbitrage,
            max_position: dec!(100),
            min_profit: dec!(2.0),
            max_trades: 10,
            stop_loss: dec!(0.2),
            credentials: AgentCredentials::none(),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn wallet_format_is_enforced() {
        let mut bad = request();
        bad.wallet_address = "abcd1234".to_string();
        assert!(matches!(
            bad.validate().unwrap_err(),
            EngineError::Validation(_)
        ));

        let mut short = request();
        short.wallet_address = "0x1234".to_string();
        assert!(short.validate().is_err());
    }

    #[test]
    fn max_position_bounds_are_enforced() {
        let mut low = request();
        low.max_position = dec!(5);
        assert!(low.validate().is_err());

        let mut high = request();
        high.max_position = dec!(20000);
        assert!(high.validate().is_err());

        let mut edge = request();
        edge.max_position = dec!(10);
        assert!(edge.validate().is_ok());
        edge.max_position = dec!(10000);
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn min_profit_bounds_are_enforced() {
        let mut low = request();
        low.min_profit = dec!(0.05);
        assert!(low.validate().is_err());

        let mut high = request();
        high.min_profit = dec!(60);
        assert!(high.validate().is_err());
    }

    #[test]
    fn all_platforms_disabled_is_rejected() {
        let mut none = request();
        none.platforms = [(Venue::Polymarket, false), (Venue::Kalshi, false)]
            .into_iter()
            .collect();
        assert!(none.validate().is_err());
    }

    #[test]
    fn stop_loss_must_be_a_fraction() {
        let mut zero = request();
        zero.stop_loss = dec!(0);
        assert!(zero.validate().is_err());

        let mut over = request();
        over.stop_loss = dec!(1.5);
        assert!(over.validate().is_err());
    }

    #[test]
    fn strategy_round_trips_through_str() {
        assert_eq!("arbitrage".parse::<Strategy>().unwrap(), Strategy::Arbitrage);
        assert_eq!(
            "Directional".parse::<Strategy>().unwrap(),
            Strategy::Directional
        );
        assert!("momentum".parse::<Strategy>().is_err());
    }
}
