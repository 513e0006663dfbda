//! Venue connectors.
//!
//! One connector executes one order leg on one venue. The variant is chosen
//! once, from which credentials are present on the agent, never re-derived
//! per call — and never downgraded to the simulator as error recovery.

mod clob;
mod session;
mod simulated;

pub use clob::ClobConnector;
pub use session::SessionRestConnector;
pub use simulated::SimulatedConnector;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::{EngineConfig, VenueEndpoints};
use crate::domain::{Fill, OrderRequest, Venue};
use crate::error::Result;

/// Executes one order leg on one venue
#[async_trait]
pub trait VenueConnector: Send + Sync {
    fn venue(&self) -> Venue;

    /// True only for the demo-mode simulator
    fn is_simulated(&self) -> bool {
        false
    }

    async fn execute(&self, order: &OrderRequest) -> Result<Fill>;
}

/// Optional per-venue credentials carried by an agent.
///
/// Present in persisted agent records; every status/read view must go
/// through [`AgentCredentials::presence`] instead of serializing this.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AgentCredentials {
    /// Signing key for blockchain-signed venues
    pub signing_key: Option<String>,
    /// API key/secret pair for session-authenticated REST venues
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl AgentCredentials {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn has_signer(&self) -> bool {
        self.signing_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn has_api_keys(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.api_secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Redacted view safe for status reports
    pub fn presence(&self) -> CredentialPresence {
        CredentialPresence {
            signing_key: self.has_signer(),
            api_keys: self.has_api_keys(),
        }
    }
}

// Never derive or hand-write anything that prints the key material.
impl std::fmt::Debug for AgentCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCredentials")
            .field("signing_key", &self.has_signer().then_some("<redacted>"))
            .field("api_keys", &self.has_api_keys().then_some("<redacted>"))
            .finish()
    }
}

/// Which credential kinds an agent holds, with the material stripped
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CredentialPresence {
    pub signing_key: bool,
    pub api_keys: bool,
}

/// Resolves the connector for an agent/venue pair
pub trait ConnectorFactory: Send + Sync {
    fn connector(
        &self,
        agent_id: &str,
        venue: Venue,
        credentials: &AgentCredentials,
    ) -> Result<Arc<dyn VenueConnector>>;

    /// Drop any per-agent cached connectors (credential rotation)
    fn invalidate(&self, _agent_id: &str) {}
}

/// Default factory: real connectors when credentials exist at configuration
/// time, the simulator otherwise. Session connectors are cached per agent so
/// the login token is reused until it expires.
pub struct CredentialConnectorFactory {
    endpoints: VenueEndpoints,
    sim_latency_ms: (u64, u64),
    session_cache: DashMap<String, Arc<SessionRestConnector>>,
}

impl CredentialConnectorFactory {
    pub fn new(endpoints: VenueEndpoints, engine: &EngineConfig) -> Self {
        Self {
            endpoints,
            sim_latency_ms: (engine.sim_latency_min_ms, engine.sim_latency_max_ms),
            session_cache: DashMap::new(),
        }
    }

    fn simulated(&self, venue: Venue) -> Arc<dyn VenueConnector> {
        Arc::new(SimulatedConnector::new(
            venue,
            self.sim_latency_ms.0,
            self.sim_latency_ms.1,
        ))
    }
}

impl ConnectorFactory for CredentialConnectorFactory {
    fn connector(
        &self,
        agent_id: &str,
        venue: Venue,
        credentials: &AgentCredentials,
    ) -> Result<Arc<dyn VenueConnector>> {
        match venue {
            Venue::Polymarket if credentials.has_signer() => {
                let key = credentials.signing_key.as_deref().unwrap_or_default();
                let connector = ClobConnector::new(
                    &self.endpoints.clob_rest_url,
                    key,
                    self.endpoints.clob_chain_id,
                )?;
                Ok(Arc::new(connector))
            }
            Venue::Kalshi if credentials.has_api_keys() => {
                if let Some(cached) = self.session_cache.get(agent_id) {
                    let connector: Arc<dyn VenueConnector> = cached.value().clone();
                    return Ok(connector);
                }
                let connector = Arc::new(SessionRestConnector::new(
                    &self.endpoints.session_rest_url,
                    credentials.api_key.clone().unwrap_or_default(),
                    credentials.api_secret.clone().unwrap_or_default(),
                    self.endpoints.session_ttl_secs,
                ));
                self.session_cache
                    .insert(agent_id.to_string(), connector.clone());
                Ok(connector)
            }
            // Credentials absent at configuration time: demo mode. This is
            // the only path that ever selects the simulator.
            _ => {
                debug!(agent_id, %venue, "no credentials configured, using simulated connector");
                Ok(self.simulated(venue))
            }
        }
    }

    fn invalidate(&self, agent_id: &str) {
        self.session_cache.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, VenueEndpoints};

    fn factory() -> CredentialConnectorFactory {
        CredentialConnectorFactory::new(VenueEndpoints::default(), &EngineConfig::default())
    }

    #[test]
    fn absent_credentials_resolve_to_simulator() {
        let factory = factory();
        for venue in Venue::ALL {
            let connector = factory
                .connector("agent-1", venue, &AgentCredentials::none())
                .unwrap();
            assert!(connector.is_simulated());
            assert_eq!(connector.venue(), venue);
        }
    }

    #[test]
    fn api_keys_resolve_to_cached_session_connector() {
        let factory = factory();
        let creds = AgentCredentials {
            signing_key: None,
            api_key: Some("key".into()),
            api_secret: Some("c2VjcmV0".into()),
        };
        let a = factory.connector("agent-1", Venue::Kalshi, &creds).unwrap();
        let b = factory.connector("agent-1", Venue::Kalshi, &creds).unwrap();
        assert!(!a.is_simulated());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.session_cache.len(), 1);

        factory.invalidate("agent-1");
        assert!(factory.session_cache.is_empty());
    }

    #[test]
    fn debug_output_never_contains_key_material() {
        let creds = AgentCredentials {
            signing_key: Some("supersecretkey".into()),
            api_key: Some("api-key-123".into()),
            api_secret: Some("api-secret-456".into()),
        };
        let printed = format!("{creds:?}");
        assert!(!printed.contains("supersecretkey"));
        assert!(!printed.contains("api-key-123"));
        assert!(!printed.contains("api-secret-456"));
    }
}
