//! Blockchain-signed CLOB connector.
//!
//! Derives a signer from the agent's key, signs a canonical order message,
//! and submits it to the venue's order endpoint. The key material is
//! zeroized immediately after the signer is derived.

use async_trait::async_trait;
use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, warn};
use zeroize::Zeroize;

use super::VenueConnector;
use crate::domain::{Fill, FillStatus, OrderRequest, Side, Venue};
use crate::error::{EngineError, Result};

/// USDC carries 6 decimals on the venue's chain
const USDC_DECIMALS: u32 = 1_000_000;

fn scale_to_micros(value: Decimal, field: &str) -> Result<u64> {
    if value.is_sign_negative() {
        return Err(EngineError::Submission(format!("invalid {field}: {value}")));
    }
    (value * Decimal::from(USDC_DECIMALS))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .ok_or_else(|| EngineError::Submission(format!("invalid {field}: {value}")))
}

/// Canonical order message; field order fixes the signing payload
#[derive(Debug, Serialize)]
struct ClobOrderPayload {
    market_id: String,
    outcome: u8,
    side: &'static str,
    size: u64,
    price: u64,
    maker: String,
}

#[derive(Debug)]
pub struct ClobConnector {
    http: reqwest::Client,
    base_url: String,
    wallet: LocalWallet,
}

impl ClobConnector {
    /// Derive the signer from a private key hex string.
    ///
    /// The key is zeroized from memory once the wallet is built; the
    /// connector never stores it.
    pub fn new(base_url: &str, signing_key: &str, chain_id: u64) -> Result<Self> {
        let mut secure_key = signing_key.trim_start_matches("0x").to_string();

        let parsed = secure_key.parse::<LocalWallet>();
        secure_key.zeroize();

        let wallet = parsed
            .map_err(|e| EngineError::Auth(format!("cannot derive signer: {e}")))?
            .with_chain_id(chain_id);

        debug!(address = ?wallet.address(), "CLOB signer derived");

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            wallet,
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    fn build_payload(&self, order: &OrderRequest, price: Decimal) -> Result<ClobOrderPayload> {
        Ok(ClobOrderPayload {
            market_id: order.market_id.clone(),
            outcome: order.side.outcome_index(),
            side: match order.side {
                Side::Yes => "BUY",
                Side::No => "SELL",
            },
            size: scale_to_micros(order.size, "size")?,
            price: scale_to_micros(price, "price")?,
            maker: format!("{:?}", self.wallet.address()),
        })
    }

    fn sign_payload(&self, payload: &ClobOrderPayload) -> Result<String> {
        let message = serde_json::to_string(payload)?;
        let hash = H256::from(keccak256(message.as_bytes()));
        let signature = self
            .wallet
            .sign_hash(hash)
            .map_err(|e| EngineError::Signature(format!("failed to sign order: {e}")))?;
        Ok(format!("0x{}", hex::encode(signature.to_vec())))
    }
}

#[async_trait]
impl VenueConnector for ClobConnector {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    async fn execute(&self, order: &OrderRequest) -> Result<Fill> {
        // Mid price for market orders; the venue fills at book price anyway
        let price = order.price.unwrap_or_else(|| Decimal::new(5, 1));
        let payload = self.build_payload(order, price)?;
        let signature = self.sign_payload(&payload)?;

        let body = json!({
            "order": payload,
            "signature": signature,
            "owner": format!("{:?}", self.wallet.address()),
        });

        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/order", self.base_url))
            .json(&body)
            .send()
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(EngineError::Auth(format!(
                "venue rejected signer ({status}): {text}"
            )));
        }

        if !status.is_success() {
            if text.to_ascii_lowercase().contains("insufficient") {
                return Err(EngineError::InsufficientBalance(text));
            }
            warn!(%status, market = %order.market_id, "CLOB order rejected");
            return Err(EngineError::Submission(format!(
                "order submission failed ({status}): {text}"
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)?;
        let order_id = parsed
            .get("orderID")
            .or_else(|| parsed.get("order_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                EngineError::Submission(format!("venue response missing order id: {text}"))
            })?
            .to_string();

        Ok(Fill {
            order_id,
            venue: Venue::Polymarket,
            status: FillStatus::Submitted,
            price,
            simulated: false,
            latency_ms,
            executed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderType;
    use rust_decimal_macros::dec;

    // Well-known test key (DO NOT use in production!)
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn signer_derivation_yields_known_address() {
        let connector = ClobConnector::new("https://clob.example.com", TEST_KEY, 137).unwrap();
        assert_eq!(
            format!("{:?}", connector.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn bad_key_is_an_authentication_error() {
        let err = ClobConnector::new("https://clob.example.com", "not-a-key", 137).unwrap_err();
        assert!(matches!(err, EngineError::Auth(_)));
    }

    #[test]
    fn payload_scales_to_usdc_micros() {
        let connector = ClobConnector::new("https://clob.example.com", TEST_KEY, 137).unwrap();
        let order = OrderRequest {
            agent_id: "agent-1".into(),
            venue: Venue::Polymarket,
            market_id: "mkt-1".into(),
            side: Side::No,
            order_type: OrderType::Limit,
            size: dec!(50),
            price: Some(dec!(0.525)),
            liquidity: dec!(100000),
        };
        let payload = connector.build_payload(&order, dec!(0.525)).unwrap();
        assert_eq!(payload.size, 50_000_000);
        assert_eq!(payload.price, 525_000);
        assert_eq!(payload.side, "SELL");
        assert_eq!(payload.outcome, 1);
    }

    #[test]
    fn signature_is_stable_hex() {
        let connector = ClobConnector::new("https://clob.example.com", TEST_KEY, 137).unwrap();
        let order = OrderRequest {
            agent_id: "agent-1".into(),
            venue: Venue::Polymarket,
            market_id: "mkt-1".into(),
            side: Side::Yes,
            order_type: OrderType::Limit,
            size: dec!(10),
            price: Some(dec!(0.5)),
            liquidity: dec!(100000),
        };
        let payload = connector.build_payload(&order, dec!(0.5)).unwrap();
        let a = connector.sign_payload(&payload).unwrap();
        let b = connector.sign_payload(&payload).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));
    }
}
