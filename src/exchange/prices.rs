//! Polymarket CLOB price-history client, used by the CAP validator.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::errors::MartinError;

use super::retry::{retry_async, RetryConfig};
use super::PriceHistoryClient;

pub struct ClobPriceClient {
    client: Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl ClobPriceClient {
    pub fn new(base_url: String) -> Self {
        Self { client: Client::new(), base_url, retry_config: RetryConfig::default() }
    }

    /// Accepts `{t,p}` objects or `[t,p]` pairs, either as a bare array or nested
    /// under a `history` key, milliseconds or seconds.
    fn normalize(raw: &Value) -> Vec<(i64, f64)> {
        let points = raw.as_array().cloned().unwrap_or_else(|| {
            raw.get("history").and_then(|h| h.as_array()).cloned().unwrap_or_default()
        });

        let mut out: Vec<(i64, f64)> = points
            .iter()
            .filter_map(|point| {
                let (ts, price) = if point.is_array() {
                    let arr = point.as_array()?;
                    (arr.first()?.as_f64()?, arr.get(1)?.as_f64()?)
                } else {
                    let ts = point.get("t").or_else(|| point.get("timestamp")).or_else(|| point.get("ts"))?.as_f64()?;
                    let price = point.get("p").or_else(|| point.get("price"))?.as_f64()?;
                    (ts, price)
                };
                let ts_secs = if ts > 1e12 { (ts / 1000.0) as i64 } else { ts as i64 };
                Some((ts_secs, price))
            })
            .collect();

        out.sort_by_key(|(ts, _)| *ts);
        out
    }
}

#[async_trait]
impl PriceHistoryClient for ClobPriceClient {
    async fn get_price_history(&self, token_id: &str, start_ts: i64, end_ts: i64) -> Result<Vec<(i64, f64)>> {
        let url = format!("{}/prices-history", self.base_url);
        let raw = retry_async(&self.retry_config, "clob.prices_history", || async {
            let r = self
                .client
                .get(&url)
                .query(&[("market", token_id.to_string()), ("startTs", start_ts.to_string()), ("endTs", end_ts.to_string())])
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

        Ok(Self::normalize(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_object_points_with_millisecond_timestamps() {
        let raw = json!([{"t": 1700000000000_i64, "p": 0.55}]);
        let out = ClobPriceClient::normalize(&raw);
        assert_eq!(out, vec![(1700000000, 0.55)]);
    }

    #[test]
    fn normalizes_tuple_points_and_sorts_ascending() {
        let raw = json!([[1700000060, 0.60], [1700000000, 0.50]]);
        let out = ClobPriceClient::normalize(&raw);
        assert_eq!(out, vec![(1700000000, 0.50), (1700000060, 0.60)]);
    }

    #[test]
    fn normalizes_nested_history_wrapper() {
        let raw = json!({"history": [{"timestamp": 1700000000, "price": 0.4}]});
        let out = ClobPriceClient::normalize(&raw);
        assert_eq!(out, vec![(1700000000, 0.4)]);
    }
}
