//! HMAC-session REST connector.
//!
//! Per-request signature over `timestamp + METHOD + path`, exchanged for a
//! short-lived session token via the login call. One connector instance is
//! cached per agent; the token is reused until it expires, then the
//! connector re-authenticates transparently.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::VenueConnector;
use crate::domain::{Fill, FillStatus, OrderRequest, OrderType, Side, Venue};
use crate::error::{EngineError, Result};

type HmacSha256 = Hmac<Sha256>;

const LOGIN_PATH: &str = "/login";
const ORDERS_PATH: &str = "/portfolio/orders";

#[derive(Debug, Clone)]
struct Session {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

pub struct SessionRestConnector {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    ttl_secs: u64,
    session: Mutex<Option<Session>>,
}

impl SessionRestConnector {
    pub fn new(base_url: &str, api_key: String, api_secret: String, ttl_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            ttl_secs,
            session: Mutex::new(None),
        }
    }

    /// Build the message to sign for a request
    fn build_message(method: &str, path: &str, timestamp: i64, body: Option<&str>) -> String {
        match body {
            Some(b) if !b.is_empty() => {
                format!("{}{}{}{}", timestamp, method.to_uppercase(), path, b)
            }
            _ => format!("{}{}{}", timestamp, method.to_uppercase(), path),
        }
    }

    /// Create HMAC-SHA256 signature over the request message
    fn sign(&self, message: &str) -> Result<String> {
        let secret_bytes = BASE64
            .decode(&self.api_secret)
            .map_err(|e| EngineError::Auth(format!("invalid secret encoding: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| EngineError::Signature(format!("HMAC init failed: {e}")))?;
        mac.update(message.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn login(&self) -> Result<Session> {
        let timestamp = Utc::now().timestamp_millis();
        let message = Self::build_message("POST", LOGIN_PATH, timestamp, None);
        let signature = self.sign(&message)?;

        let response = self
            .http
            .post(format!("{}{}", self.base_url, LOGIN_PATH))
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-SIGNATURE", &signature)
            .header("ACCESS-TIMESTAMP", timestamp.to_string())
            .json(&json!({ "key": self.api_key }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(EngineError::Auth(format!(
                "session login rejected ({status}): {text}"
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)?;
        let token = parsed
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Auth(format!("login response missing token: {text}")))?
            .to_string();

        debug!(ttl_secs = self.ttl_secs, "session venue authenticated");

        Ok(Session {
            token,
            expires_at: Utc::now() + ChronoDuration::seconds(self.ttl_secs as i64),
        })
    }

    /// Return a valid token, logging in again if the cached one expired.
    async fn ensure_session(&self, force: bool) -> Result<String> {
        let mut guard = self.session.lock().await;
        if !force {
            if let Some(session) = guard.as_ref() {
                if session.is_valid() {
                    return Ok(session.token.clone());
                }
            }
        }
        let session = self.login().await?;
        let token = session.token.clone();
        *guard = Some(session);
        Ok(token)
    }

    async fn submit_order(&self, token: &str, order: &OrderRequest) -> Result<reqwest::Response> {
        let body = json!({
            "ticker": order.market_id,
            "action": match order.side {
                Side::Yes => "buy",
                Side::No => "sell",
            },
            "count": order.size,
            "type": match order.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
            },
            "price": order.price,
        });

        Ok(self
            .http
            .post(format!("{}{}", self.base_url, ORDERS_PATH))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?)
    }
}

#[async_trait]
impl VenueConnector for SessionRestConnector {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn execute(&self, order: &OrderRequest) -> Result<Fill> {
        let started = Instant::now();
        let token = self.ensure_session(false).await?;

        let mut response = self.submit_order(&token, order).await?;

        // Expired token race: re-authenticate once, transparently
        if response.status().as_u16() == 401 {
            debug!("session token expired mid-flight, re-authenticating");
            let token = self.ensure_session(true).await?;
            response = self.submit_order(&token, order).await?;
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(EngineError::Auth(format!(
                "venue rejected credentials ({status}): {text}"
            )));
        }

        if !status.is_success() {
            if text.to_ascii_lowercase().contains("insufficient") {
                return Err(EngineError::InsufficientBalance(text));
            }
            warn!(%status, market = %order.market_id, "session venue order rejected");
            return Err(EngineError::Submission(format!(
                "order submission failed ({status}): {text}"
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)?;
        let order_id = parsed
            .get("order")
            .and_then(|o| o.get("order_id"))
            .or_else(|| parsed.get("order_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                EngineError::Submission(format!("venue response missing order id: {text}"))
            })?
            .to_string();

        Ok(Fill {
            order_id,
            venue: Venue::Kalshi,
            status: FillStatus::Submitted,
            price: order.price.unwrap_or_else(|| rust_decimal::Decimal::new(5, 1)),
            simulated: false,
            latency_ms,
            executed_at: Utc::now(),
        })
    }
}
