pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod registry;
pub mod risk;
pub mod router;
pub mod scan;
pub mod store;
pub mod venue;

pub use config::AppConfig;
pub use domain::{
    Fill, FillStatus, Opportunity, OrderRequest, OrderType, Position, Side, Trade, TradeLegs, Venue,
};
pub use engine::{AgentStatusReport, PlaceOrderRequest, PlatformStats, TradingEngine};
pub use error::{EngineError, Result};
pub use executor::{ArbitrageExecutor, ArbitrageOutcome, DirectionalExecutor, PARTIAL_LEG_FAILURE};
pub use ledger::{AgentBook, AgentStats, PortfolioSummary, PositionLedger, SystemStats};
pub use registry::{AgentConfig, AgentRegistry, AgentView, RegisterRequest, Strategy};
pub use risk::{ProposedTrade, RejectReason, RiskDecision, RiskLimits, RiskManager, RiskSnapshot};
pub use router::{ExecutionResult, OrderRouter};
pub use scan::{OpportunitySource, SimulatedOpportunitySource};
pub use store::{EngineSnapshot, StateStore};
pub use venue::{
    AgentCredentials, ClobConnector, ConnectorFactory, CredentialConnectorFactory,
    CredentialPresence, SessionRestConnector, SimulatedConnector, VenueConnector,
};
