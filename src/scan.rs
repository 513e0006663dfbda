//! Opportunity supply.
//!
//! The engine does not discover opportunities itself — an external
//! collaborator supplies them. The trait below is that seam; the simulated
//! source exists for demo mode and tests.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::domain::Opportunity;
use crate::registry::AgentConfig;

/// Supplies one candidate opportunity per strategy cycle
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    async fn next_opportunity(&self, agent: &AgentConfig) -> Option<Opportunity>;
}

/// Synthetic opportunity generator for demo mode.
///
/// Needs at least two enabled venues; yields a candidate on most scans with
/// a spread wide enough to clear typical minimums.
pub struct SimulatedOpportunitySource {
    markets: Vec<String>,
}

impl Default for SimulatedOpportunitySource {
    fn default() -> Self {
        Self {
            markets: vec![
                "will-btc-close-above-100k".to_string(),
                "fed-cuts-rates-next-meeting".to_string(),
                "premier-league-title-winner".to_string(),
                "cpi-print-above-3pct".to_string(),
            ],
        }
    }
}

impl SimulatedOpportunitySource {
    pub fn new(markets: Vec<String>) -> Self {
        Self { markets }
    }
}

#[async_trait]
impl OpportunitySource for SimulatedOpportunitySource {
    async fn next_opportunity(&self, agent: &AgentConfig) -> Option<Opportunity> {
        let venues = agent.enabled_venues();
        if venues.len() < 2 || self.markets.is_empty() {
            return None;
        }

        let (market, buy_venue, sell_venue, spread, base_price, size_frac, liquidity) = {
            let mut rng = rand::thread_rng();
            // Occasional empty scan keeps the loop honest
            if rng.gen_bool(0.05) {
                return None;
            }
            let market = self.markets[rng.gen_range(0..self.markets.len())].clone();
            let buy_idx = rng.gen_range(0..venues.len());
            let mut sell_idx = rng.gen_range(0..venues.len());
            if sell_idx == buy_idx {
                sell_idx = (sell_idx + 1) % venues.len();
            }
            (
                market,
                venues[buy_idx],
                venues[sell_idx],
                rng.gen_range(2.5..12.0),
                rng.gen_range(0.40..0.60),
                rng.gen_range(0.25..1.0),
                rng.gen_range(20_000.0..500_000.0),
            )
        };

        let spread = Decimal::from_f64(spread)?.round_dp(2);
        if spread < agent.limits.min_profit_spread {
            return None;
        }

        let base_price = Decimal::from_f64(base_price)?.round_dp(3);
        let size = (agent.limits.max_position_size * Decimal::from_f64(size_frac)?).round_dp(2);
        let liquidity = Decimal::from_f64(liquidity)?.round_dp(0);

        Some(Opportunity::from_spread(
            &market, buy_venue, sell_venue, base_price, spread, size, liquidity,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Venue;
    use crate::risk::RiskLimits;
    use crate::venue::AgentCredentials;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn agent(venues: &[Venue]) -> AgentConfig {
        AgentConfig {
            agent_id: "agent-1".into(),
            wallet_address: "0x1111111111111111111111111111111111111111".into(),
            platforms: Venue::ALL
                .iter()
                .map(|v| (*v, venues.contains(v)))
                .collect(),
            strategy: crate::registry::Strategy::Arbitrage,
            limits: RiskLimits {
                min_profit_spread: dec!(0.1),
                ..RiskLimits::default()
            },
            credentials: AgentCredentials::none(),
            active: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn single_venue_agents_never_get_arbitrage_candidates() {
        let source = SimulatedOpportunitySource::default();
        let single = agent(&[Venue::Polymarket]);
        for _ in 0..20 {
            assert!(source.next_opportunity(&single).await.is_none());
        }
    }

    #[tokio::test]
    async fn candidates_use_distinct_enabled_venues() {
        let source = SimulatedOpportunitySource::default();
        let both = agent(&[Venue::Polymarket, Venue::Kalshi]);
        let mut seen = 0;
        for _ in 0..50 {
            if let Some(opp) = source.next_opportunity(&both).await {
                assert_ne!(opp.buy_venue, opp.sell_venue);
                assert!(opp.spread >= dec!(2.5) && opp.spread <= dec!(12.0));
                assert!(opp.size <= both.limits.max_position_size);
                seen += 1;
            }
        }
        assert!(seen > 0);
    }

}
