//! Live-mode order placement against the Polymarket CLOB.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::retry::{retry_async, RetryConfig};
use super::signing::{sign_hmac_request, OrderAuth};
use super::{OrderClient, OrderResult, OrderStatus, Side};
use crate::errors::MartinError;

pub struct ClobOrderClient {
    client: Client,
    base_url: String,
    auth: OrderAuth,
    retry_config: RetryConfig,
}

impl ClobOrderClient {
    /// Returns `SecurityError` for `OrderAuth::Eip712` — live mode only arms the
    /// HMAC signing path (§4.7).
    pub fn new(base_url: String, auth: OrderAuth) -> Result<Self, MartinError> {
        if matches!(auth, OrderAuth::Eip712) {
            return Err(MartinError::Security("EIP-712 order signing is not implemented".to_string()));
        }
        Ok(Self { client: Client::new(), base_url, auth, retry_config: RetryConfig::default() })
    }

    fn sign(&self, method: &str, path: &str, body: &str) -> Result<(u64, String, String)> {
        match &self.auth {
            OrderAuth::Hmac { api_key, api_secret } => {
                let ts = chrono::Utc::now().timestamp() as u64;
                let sig = sign_hmac_request(ts, method, path, body, api_secret).map_err(|e| anyhow!(e))?;
                Ok((ts, sig, api_key.clone()))
            }
            OrderAuth::Eip712 => Err(anyhow!("EIP-712 signing not implemented")),
        }
    }

    fn parse_order_result(order_id_fallback: &str, response: &Value) -> OrderResult {
        let order_id = response
            .get("id")
            .or_else(|| response.get("orderId"))
            .and_then(|v| v.as_str())
            .unwrap_or(order_id_fallback)
            .to_string();
        let status = match response.get("status").and_then(|s| s.as_str()).unwrap_or("LIVE") {
            "FILLED" => OrderStatus::Filled,
            "CANCELLED" => OrderStatus::Cancelled,
            "EXPIRED" => OrderStatus::Expired,
            "PARTIAL" => OrderStatus::Partial,
            _ => OrderStatus::Live,
        };
        let filled_size = response.get("filledSize").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let filled_price = response.get("avgPrice").and_then(|v| v.as_f64());
        OrderResult { order_id, status, filled_size, filled_price }
    }
}

#[async_trait]
impl OrderClient for ClobOrderClient {
    async fn place_limit_order(&self, token_id: &str, side: Side, price: f64, size: f64) -> Result<OrderResult> {
        let path = "/order";
        let side_str = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let body = json!({
            "tokenId": token_id,
            "side": side_str,
            "price": price.to_string(),
            "size": size.to_string(),
            "type": "LIMIT",
            "timeInForce": "GTC",
        })
        .to_string();

        let url = format!("{}{}", self.base_url, path);
        let response = retry_async(&self.retry_config, "clob.place_order", || async {
            let (ts, sig, api_key) = self.sign("POST", path, &body)?;
            let r = self
                .client
                .post(&url)
                .header("X-API-KEY", api_key)
                .header("X-TIMESTAMP", ts.to_string())
                .header("X-SIGNATURE", sig)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await
                .map_err(|e| if e.is_timeout() { MartinError::Timeout(e.to_string()).into() } else { anyhow::Error::from(e) })?;
            let status = r.status();
            if status == 429 {
                let retry_after_secs = r
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(MartinError::RateLimit { retry_after_secs }.into());
            }
            if !status.is_success() {
                let body = r.text().await.unwrap_or_default();
                return Err(MartinError::Api { status: status.as_u16(), body }.into());
            }
            Ok(r.json::<Value>().await?)
        })
        .await?;

        Ok(Self::parse_order_result("", &response))
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderResult> {
        let path = format!("/order/{}", order_id);
        let url = format!("{}{}", self.base_url, path);
        let (ts, sig, api_key) = self.sign("GET", &path, "")?;
        let r = self
            .client
            .get(&url)
            .header("X-API-KEY", api_key)
            .header("X-TIMESTAMP", ts.to_string())
            .header("X-SIGNATURE", sig)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { MartinError::Timeout(e.to_string()).into() } else { anyhow::Error::from(e) })?;
        let status = r.status();
        if status == 429 {
            let retry_after_secs = r
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(MartinError::RateLimit { retry_after_secs }.into());
        }
        if !status.is_success() {
            let body = r.text().await.unwrap_or_default();
            return Err(MartinError::Api { status: status.as_u16(), body }.into());
        }
        let response: Value = r.json().await?;
        Ok(Self::parse_order_result(order_id, &response))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/order/{}", order_id);
        let url = format!("{}{}", self.base_url, path);
        let (ts, sig, api_key) = self.sign("DELETE", &path, "")?;
        let r = self
            .client
            .delete(&url)
            .header("X-API-KEY", api_key)
            .header("X-TIMESTAMP", ts.to_string())
            .header("X-SIGNATURE", sig)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { MartinError::Timeout(e.to_string()).into() } else { anyhow::Error::from(e) })?;
        let status = r.status();
        if status == 429 {
            let retry_after_secs = r
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(MartinError::RateLimit { retry_after_secs }.into());
        }
        if !status.is_success() {
            let body = r.text().await.unwrap_or_default();
            return Err(MartinError::Api { status: status.as_u16(), body }.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eip712_auth_refuses_to_arm() {
        let result = ClobOrderClient::new("https://clob.polymarket.com".to_string(), OrderAuth::Eip712);
        assert!(matches!(result, Err(MartinError::Security(_))));
    }

    #[test]
    fn hmac_auth_arms_successfully() {
        let auth = OrderAuth::Hmac { api_key: "key".to_string(), api_secret: "secret".to_string() };
        let result = ClobOrderClient::new("https://clob.polymarket.com".to_string(), auth);
        assert!(result.is_ok());
    }

    #[test]
    fn parses_filled_status_from_response() {
        let response = json!({"id": "ord1", "status": "FILLED", "filledSize": 10.0, "avgPrice": 0.62});
        let result = ClobOrderClient::parse_order_result("", &response);
        assert_eq!(result.order_id, "ord1");
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.filled_price, Some(0.62));
    }
}
