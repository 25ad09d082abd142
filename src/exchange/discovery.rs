//! Polymarket Gamma API client: market discovery for hourly Up-or-Down windows.

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde_json::Value;

use crate::domain::enums::Direction;
use crate::errors::MartinError;

use super::retry::{retry_async, RetryConfig};
use super::{MarketCandidate, MarketDiscoveryClient};

pub struct GammaClient {
    client: Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl GammaClient {
    pub fn new(base_url: String) -> Self {
        Self { client: Client::new(), base_url, retry_config: RetryConfig::default() }
    }

    async fn request(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        retry_async(&self.retry_config, "gamma.request", || async {
            let r = self
                .client
                .get(&url)
                .query(params)
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
            if status == 404 {
                return Ok(Value::Null);
            }
            if !status.is_success() {
                let body = r.text().await.unwrap_or_default();
                return Err(MartinError::Api { status: status.as_u16(), body }.into());
            }
            Ok(r.json::<Value>().await?)
        })
        .await
    }

    /// Accepts a bare market object, a `{markets: [...]}` wrapper, or an `events[]`
    /// array with markets nested inside each event.
    fn flatten_markets(response: &Value) -> Vec<Value> {
        if let Some(markets) = response.get("markets").and_then(|m| m.as_array()) {
            return markets.clone();
        }
        if let Some(events) = response.get("events").and_then(|e| e.as_array()) {
            let mut out = Vec::new();
            for event in events {
                let event_end = event.get("endDate").cloned();
                if let Some(markets) = event.get("markets").and_then(|m| m.as_array()) {
                    for m in markets {
                        let mut m = m.clone();
                        if m.get("endDate").is_none() {
                            if let (Some(obj), Some(end)) = (m.as_object_mut(), event_end.clone()) {
                                obj.insert("endDate".to_string(), end);
                            }
                        }
                        out.push(m);
                    }
                }
            }
            return out;
        }
        if response.is_array() {
            return response.as_array().cloned().unwrap_or_default();
        }
        vec![response.clone()]
    }

    fn parse_timestamp(value: Option<&Value>) -> Option<i64> {
        let value = value?;
        if let Some(n) = value.as_f64() {
            return Some(if n > 1e12 { (n / 1000.0) as i64 } else { n as i64 });
        }
        if let Some(s) = value.as_str() {
            return DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp());
        }
        None
    }

    fn parse_market(data: &Value) -> Option<MarketCandidate> {
        let slug = data.get("slug")?.as_str()?.to_string();
        let condition_id = data.get("conditionId")?.as_str()?.to_string();
        let start_ts = Self::parse_timestamp(data.get("startDate").or_else(|| data.get("createdAt")))?;
        let end_ts = Self::parse_timestamp(data.get("endDate"))?;

        let mut up_token_id = String::new();
        let mut down_token_id = String::new();

        if let Some(tokens) = data.get("tokens").and_then(|t| t.as_array()) {
            for token in tokens {
                let outcome = token.get("outcome").and_then(|o| o.as_str()).unwrap_or("").to_uppercase();
                let token_id = token.get("token_id").and_then(|t| t.as_str()).unwrap_or("").to_string();
                if outcome.contains("UP") || outcome.contains("YES") {
                    up_token_id = token_id;
                } else if outcome.contains("DOWN") || outcome.contains("NO") {
                    down_token_id = token_id;
                }
            }
        }

        if up_token_id.is_empty() || down_token_id.is_empty() {
            let outcomes = data.get("outcomes").and_then(|o| o.as_array());
            let clob_ids = data.get("clobTokenIds").and_then(|o| o.as_array());
            if let (Some(outcomes), Some(clob_ids)) = (outcomes, clob_ids) {
                for (i, outcome) in outcomes.iter().enumerate() {
                    let outcome = outcome.as_str().unwrap_or("").to_uppercase();
                    if let Some(token_id) = clob_ids.get(i).and_then(|t| t.as_str()) {
                        if outcome.contains("UP") || outcome.contains("YES") {
                            up_token_id = token_id.to_string();
                        } else if outcome.contains("DOWN") || outcome.contains("NO") {
                            down_token_id = token_id.to_string();
                        }
                    }
                }
            }
        }

        if up_token_id.is_empty() || down_token_id.is_empty() {
            return None;
        }

        let outcome = data.get("outcome").and_then(|o| o.as_str()).and_then(Self::parse_outcome);

        Some(MarketCandidate { slug, condition_id, up_token_id, down_token_id, start_ts, end_ts, outcome })
    }

    /// `outcome` is only present once Gamma has resolved the market.
    fn parse_outcome(raw: &str) -> Option<Direction> {
        let raw = raw.to_uppercase();
        if raw.contains("UP") || raw.contains("YES") {
            Some(Direction::Up)
        } else if raw.contains("DOWN") || raw.contains("NO") {
            Some(Direction::Down)
        } else {
            None
        }
    }
}

#[async_trait]
impl MarketDiscoveryClient for GammaClient {
    async fn search_markets(&self, asset: &str) -> Result<Vec<MarketCandidate>> {
        let query = format!("{} up or down", asset);
        let response = self
            .request(
                "/public-search",
                &[
                    ("q", query),
                    ("recurrence", "hourly".to_string()),
                    ("keep_closed_markets", "1".to_string()),
                    ("limit_per_type", "100".to_string()),
                    ("page", "1".to_string()),
                    ("sort", "endDate".to_string()),
                    ("ascending", "false".to_string()),
                ],
            )
            .await?;

        Ok(Self::flatten_markets(&response).iter().filter_map(Self::parse_market).collect())
    }

    async fn get_market_by_slug(&self, slug: &str) -> Result<Option<MarketCandidate>> {
        let response = self.request("/markets", &[("slug", slug.to_string())]).await?;
        if response.is_null() {
            return Ok(None);
        }
        let candidates = Self::flatten_markets(&response);
        Ok(candidates.first().and_then(Self::parse_market))
    }
}
