//! Demo-mode connector. Never performs network I/O.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

use super::VenueConnector;
use crate::domain::{Fill, FillStatus, OrderRequest, Venue};
use crate::error::Result;

/// Synthetic fills with bounded random latency. Selected whenever the agent
/// has no credentials for the target venue.
pub struct SimulatedConnector {
    venue: Venue,
    latency_min_ms: u64,
    latency_max_ms: u64,
}

impl SimulatedConnector {
    pub fn new(venue: Venue, latency_min_ms: u64, latency_max_ms: u64) -> Self {
        Self {
            venue,
            latency_min_ms,
            latency_max_ms: latency_max_ms.max(latency_min_ms),
        }
    }

    fn synthetic_order_id(&self) -> String {
        let n: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
        format!("{}-{}", self.venue.prefix(), n)
    }

    fn fill_price(&self, order: &OrderRequest) -> Decimal {
        if let Some(price) = order.price {
            return price;
        }
        // Market order without a limit: mid-range synthetic price
        let raw: f64 = rand::thread_rng().gen_range(0.40..0.60);
        Decimal::from_f64(raw)
            .unwrap_or_else(|| Decimal::new(5, 1))
            .round_dp(3)
    }
}

#[async_trait]
impl VenueConnector for SimulatedConnector {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn execute(&self, order: &OrderRequest) -> Result<Fill> {
        let latency_ms = if self.latency_max_ms > self.latency_min_ms {
            rand::thread_rng().gen_range(self.latency_min_ms..=self.latency_max_ms)
        } else {
            self.latency_min_ms
        };
        let price = self.fill_price(order);

        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        let fill = Fill {
            order_id: self.synthetic_order_id(),
            venue: self.venue,
            status: FillStatus::Filled,
            price,
            simulated: true,
            latency_ms,
            executed_at: Utc::now(),
        };

        debug!(
            venue = %self.venue,
            market = %order.market_id,
            order_id = %fill.order_id,
            latency_ms,
            "simulated fill"
        );

        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Side};
    use rust_decimal_macros::dec;

    fn order(price: Option<Decimal>) -> OrderRequest {
        OrderRequest {
            agent_id: "agent-1".into(),
            venue: Venue::Limitless,
            market_id: "mkt-1".into(),
            side: Side::Yes,
            order_type: if price.is_some() {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            size: dec!(50),
            price,
            liquidity: dec!(100000),
        }
    }

    #[tokio::test]
    async fn fills_are_flagged_simulated() {
        let connector = SimulatedConnector::new(Venue::Limitless, 0, 1);
        let fill = connector.execute(&order(Some(dec!(0.50)))).await.unwrap();

        assert!(fill.simulated);
        assert_eq!(fill.status, FillStatus::Filled);
        assert_eq!(fill.price, dec!(0.50));
        assert!(fill.order_id.starts_with("LIM-"));
    }

    #[tokio::test]
    async fn market_orders_get_mid_range_price() {
        let connector = SimulatedConnector::new(Venue::Polymarket, 0, 0);
        let fill = connector.execute(&order(None)).await.unwrap();

        assert!(fill.price >= dec!(0.40) && fill.price <= dec!(0.60));
        assert!(fill.order_id.starts_with("POL-"));
    }
}
