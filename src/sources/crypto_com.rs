//! Crypto.com Exchange v2 REST client used for optional auto-trading.
//!
//! Private calls are JSON-RPC style POSTs to `{api_url}/{method}` signed with
//! HMAC-SHA256 over `method + id + api_key + sorted params + nonce`.

use super::{http_client, OrderExecutor};
use crate::config::ExchangeConfig;
use crate::error::{snippet, AppError};
use crate::types::{OrderSide, OrderStatus};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

/// Crypto.com Exchange client.
#[derive(Clone)]
pub struct CryptoComClient {
    client: Client,
    api_url: String,
    api_key: String,
    api_secret: String,
}

impl CryptoComClient {
    pub fn new(api_url: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            client: http_client(Duration::from_secs(15)),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        }
    }

    /// Build from config. Returns None when credentials are missing.
    pub fn from_config(config: &ExchangeConfig) -> Option<Self> {
        let key = config.api_key.as_deref()?;
        let secret = config.api_secret.as_deref()?;
        Some(Self::new(&config.api_url, key, secret))
    }

    /// Sign a request. Signature is lowercase hex.
    pub fn sign(&self, method: &str, id: i64, params: &Value, nonce: i64) -> Result<String, AppError> {
        let payload = format!(
            "{}{}{}{}{}",
            method,
            id,
            self.api_key,
            params_to_string(params),
            nonce
        );
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| AppError::Exchange(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn private_call(&self, method: &str, params: Value) -> Result<Value, AppError> {
        let id = chrono::Utc::now().timestamp_millis();
        let nonce = id;
        let sig = self.sign(method, id, &params, nonce)?;

        let body = json!({
            "id": id,
            "method": method,
            "api_key": self.api_key,
            "params": params,
            "nonce": nonce,
            "sig": sig,
        });

        let url = format!("{}/{}", self.api_url, method);
        let response = self.client.post(&url).json(&body).send().await?;
        parse_response(method, response).await
    }

    /// Last traded price for an instrument such as `BTC_USDT`.
    pub async fn ticker_price(&self, symbol: &str) -> Result<f64, AppError> {
        let url = format!("{}/public/get-ticker", self.api_url);
        let response = self
            .client
            .get(&url)
            .query(&[("instrument_name", symbol)])
            .send()
            .await?;
        let result = parse_response("public/get-ticker", response).await?;
        price_from_ticker(&result)
            .ok_or_else(|| AppError::Exchange(format!("No price in ticker for {}", symbol)))
    }

    /// Place a market order and return the exchange order id.
    pub async fn market_order(&self, symbol: &str, side: OrderSide, amount: f64) -> Result<String, AppError> {
        let params = market_order_params(symbol, side, amount, &Uuid::new_v4().to_string());
        let result = self.private_call("private/create-order", params).await?;
        let order_id = result
            .get("order_id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| AppError::Exchange("create-order returned no order_id".to_string()))?;

        info!("Placed {} market order {} for {} ({})", side, order_id, symbol, amount);
        Ok(order_id)
    }

    pub async fn order_status(&self, order_id: &str) -> Result<OrderStatus, AppError> {
        let result = self
            .private_call("private/get-order-detail", json!({ "order_id": order_id }))
            .await?;
        let raw = result
            .get("order_info")
            .and_then(|info| info.get("status"))
            .and_then(Value::as_str)
            .or_else(|| result.get("status").and_then(Value::as_str))
            .unwrap_or_default();
        debug!("Order {} status: {}", order_id, raw);
        OrderStatus::from_api(raw)
            .ok_or_else(|| AppError::Exchange(format!("Unknown order status '{}'", raw)))
    }
}

impl OrderExecutor for CryptoComClient {
    fn get_current_price<'a>(
        &'a self,
        symbol: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<f64>> + Send + 'a>> {
        Box::pin(async move {
            match self.ticker_price(symbol).await {
                Ok(price) => Some(price),
                Err(e) => {
                    error!("Failed to get price for {}: {}", symbol, e);
                    None
                }
            }
        })
    }

    fn place_market_order<'a>(
        &'a self,
        symbol: &'a str,
        side: OrderSide,
        amount: f64,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            match self.market_order(symbol, side, amount).await {
                Ok(id) => Some(id),
                Err(e) => {
                    error!("Failed to place {} order for {}: {}", side, symbol, e);
                    None
                }
            }
        })
    }

    fn get_order_status<'a>(
        &'a self,
        order_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<OrderStatus>> + Send + 'a>> {
        Box::pin(async move {
            match self.order_status(order_id).await {
                Ok(status) => Some(status),
                Err(e) => {
                    error!("Failed to get status of order {}: {}", order_id, e);
                    None
                }
            }
        })
    }
}

async fn parse_response(method: &str, response: reqwest::Response) -> Result<Value, AppError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AppError::Exchange(format!(
            "{} returned {}: {}",
            method,
            status,
            snippet(&text)
        )));
    }

    let body: ApiResponse = response.json().await?;
    if body.code != 0 {
        return Err(AppError::Exchange(format!(
            "{} failed with code {}: {}",
            method,
            body.code,
            body.message.unwrap_or_default()
        )));
    }
    Ok(body.result.unwrap_or(Value::Null))
}

fn market_order_params(symbol: &str, side: OrderSide, amount: f64, client_oid: &str) -> Value {
    let mut params = Map::new();
    params.insert("instrument_name".to_string(), json!(symbol));
    params.insert("side".to_string(), json!(side.to_string()));
    params.insert("type".to_string(), json!("MARKET"));
    params.insert("client_oid".to_string(), json!(client_oid));
    // buys spend quote currency, sells give up base currency
    let amount_key = match side {
        OrderSide::Buy => "notional",
        OrderSide::Sell => "quantity",
    };
    params.insert(amount_key.to_string(), json!(amount.to_string()));
    Value::Object(params)
}

fn price_from_ticker(result: &Value) -> Option<f64> {
    let ticker = match result.get("data") {
        Some(Value::Array(items)) => items.first()?,
        Some(other) => other,
        None => result,
    };
    // "a" is the latest trade price, "k" the best ask
    ["a", "k"].iter().find_map(|key| match ticker.get(*key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    })
}

/// Flatten params for signing: object keys sorted, nested values recursed, null as `null`.
fn params_to_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.into_iter()
                .map(|key| format!("{}{}", key, params_to_string(&map[key])))
                .collect()
        }
        Value::Array(items) => items.iter().map(params_to_string).collect(),
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
