use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

use crate::config::BinanceConfig;
use crate::execution::{OrderExecutor, PriceFeed};
use crate::models::{Kline, OrderAck, OrderSide};
use crate::{Error, Result};

const KLINES_PATH: &str = "/fapi/v1/klines";
const ORDER_PATH: &str = "/api/v3/order";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";
const MAX_RETRIES: u32 = 3;

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

type HmacSha256 = Hmac<Sha256>;

/// Binance REST client: futures klines for prices, spot market orders for exits
///
/// Cloneable; all clones share one rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    market_data_url: String,
    trading_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    recv_window_ms: u64,
    retry_backoff: Duration,
    rate_limiter: Arc<BinanceRateLimiter>,
}

/// Response from POST /api/v3/order
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: u64,
    #[serde(default)]
    executed_qty: Option<String>,
}

impl BinanceClient {
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::InvalidParameter(format!("failed to build HTTP client: {}", e)))?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).ok_or_else(|| {
            Error::InvalidParameter("requests_per_minute must be > 0".to_string())
        })?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            client,
            market_data_url: config.market_data_url.trim_end_matches('/').to_string(),
            trading_url: config.trading_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            rate_limiter,
        })
    }

    /// Get recent klines, oldest first
    /// Retries network and server errors with exponential backoff; rate limits are not retried here
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        let mut attempt = 1;

        loop {
            match self.fetch_klines_once(symbol, interval, limit).await {
                Ok(klines) => {
                    if attempt > 1 {
                        tracing::info!(
                            symbol = %symbol,
                            attempt,
                            "Fetched klines after retry"
                        );
                    }
                    return Ok(klines);
                }
                Err(Error::Network(msg)) if attempt < MAX_RETRIES => {
                    let backoff = self.retry_backoff * 2_u32.pow(attempt - 1);
                    tracing::warn!(
                        "Attempt {}/{} failed for {} klines: {}. Retrying in {}ms...",
                        attempt,
                        MAX_RETRIES,
                        symbol,
                        msg,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Internal method to fetch klines once (without retry logic)
    async fn fetch_klines_once(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.market_data_url, KLINES_PATH);
        let limit = limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("interval", interval), ("limit", limit.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let rows: Vec<Vec<Value>> = serde_json::from_str(&body)
            .map_err(|e| Error::Api(format!("malformed klines response: {}", e)))?;

        parse_klines(&rows)
    }

    /// Place a signed market order. Never retried.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck> {
        let (api_key, api_secret) = match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => (key, secret),
            _ => {
                return Err(Error::InvalidParameter(
                    "API key and secret are required to place orders".to_string(),
                ))
            }
        };

        let client_order_id = Uuid::new_v4();
        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}&recvWindow={}&timestamp={}",
            symbol,
            side.as_str(),
            quantity,
            client_order_id.simple(),
            self.recv_window_ms,
            Utc::now().timestamp_millis()
        );
        let signature = sign(api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.trading_url, ORDER_PATH, query, signature);

        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await
            .map_err(|e| Error::OrderFailure(format!("order request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::OrderFailure(format!("order response unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(Error::OrderFailure(format!(
                "exchange rejected {} order ({}): {}",
                side.as_str(),
                status,
                body
            )));
        }

        let order: OrderResponse = serde_json::from_str(&body)
            .map_err(|e| Error::OrderFailure(format!("malformed order response: {}", e)))?;

        let filled = order
            .executed_qty
            .as_deref()
            .and_then(|q| q.parse::<f64>().ok())
            .unwrap_or(quantity);

        Ok(OrderAck {
            order_id: order.order_id.to_string(),
            client_order_id,
            symbol: order.symbol,
            side,
            quantity: filled,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl PriceFeed for BinanceClient {
    async fn fetch_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        self.get_klines(symbol, interval, limit).await
    }
}

#[async_trait]
impl OrderExecutor for BinanceClient {
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck> {
        self.place_market_order(symbol, side, quantity).await
    }
}

/// HMAC-SHA256 of the query string, hex encoded
fn sign(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::InvalidParameter(format!("invalid API secret: {}", e)))?;
    mac.update(query.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn classify_status(status: StatusCode, body: &str) -> Error {
    match status.as_u16() {
        // 418 is the IP ban that follows ignored 429s
        429 | 418 => Error::RateLimited(format!("{}: {}", status, body)),
        _ if status.is_server_error() => Error::Network(format!("{}: {}", status, body)),
        _ => Error::Api(format!("{}: {}", status, body)),
    }
}

/// Kline rows are `[openTime, open, high, low, close, volume, closeTime, ...]`
/// with prices as decimal strings
fn parse_klines(rows: &[Vec<Value>]) -> Result<Vec<Kline>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() < 5 {
                return Err(Error::Api(format!(
                    "kline row {} has {} fields, expected at least 5",
                    i,
                    row.len()
                )));
            }

            let open_ms = row[0]
                .as_i64()
                .ok_or_else(|| Error::Api(format!("kline row {} has no open time", i)))?;
            let open_time = DateTime::from_timestamp_millis(open_ms)
                .ok_or_else(|| Error::Api(format!("kline row {} open time out of range", i)))?;

            Ok(Kline {
                open_time,
                high: decimal_field(&row[2], i, "high")?,
                low: decimal_field(&row[3], i, "low")?,
                close: decimal_field(&row[4], i, "close")?,
            })
        })
        .collect()
}

fn decimal_field(value: &Value, row: usize, name: &str) -> Result<f64> {
    let parsed = match value {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };

    parsed.ok_or_else(|| Error::Api(format!("kline row {} has invalid {}: {}", row, name, value)))
}
