//! Binance public API candle client, the venue MARTIN reads spot OHLCV from.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;

use crate::errors::MartinError;

use super::retry::{retry_async, RetryConfig};
use super::{Candle, CandleDataClient};

pub struct BinanceCandleClient {
    client: Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl BinanceCandleClient {
    pub fn new(base_url: String) -> Self {
        Self { client: Client::new(), base_url, retry_config: RetryConfig::default() }
    }

    pub fn symbol_for(asset: &str) -> String {
        match asset.to_uppercase().as_str() {
            "BTC" => "BTCUSDT".to_string(),
            "ETH" => "ETHUSDT".to_string(),
            other => format!("{}USDT", other),
        }
    }

    async fn fetch_page(&self, symbol: &str, interval: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let resp = retry_async(&self.retry_config, "binance.klines", || async {
            let r = self
                .client
                .get(&url)
                .query(&[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("startTime", start_ms.to_string()),
                    ("endTime", end_ms.to_string()),
                    ("limit", "1000".to_string()),
                ])
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
            let rows: Vec<Vec<serde_json::Value>> = r.json().await?;
            Ok(rows)
        })
        .await?;

        let mut candles = Vec::with_capacity(resp.len());
        for row in resp {
            if row.len() < 7 {
                continue;
            }
            candles.push(Candle {
                t: row[0].as_i64().unwrap_or(0) / 1000,
                o: row[1].as_str().unwrap_or("0").parse().unwrap_or(0.0),
                h: row[2].as_str().unwrap_or("0").parse().unwrap_or(0.0),
                l: row[3].as_str().unwrap_or("0").parse().unwrap_or(0.0),
                c: row[4].as_str().unwrap_or("0").parse().unwrap_or(0.0),
                v: row[5].as_str().unwrap_or("0").parse().unwrap_or(0.0),
                close_time: row[6].as_i64().unwrap_or(0) / 1000,
            });
        }
        Ok(candles)
    }
}

#[async_trait]
impl CandleDataClient for BinanceCandleClient {
    async fn get_candles(&self, asset: &str, interval: &str, start_ts: i64, end_ts: i64) -> Result<Vec<Candle>> {
        let symbol = Self::symbol_for(asset);
        let mut by_open_time: BTreeMap<i64, Candle> = BTreeMap::new();
        let mut cursor = start_ts;

        while cursor < end_ts {
            let page = self.fetch_page(&symbol, interval, cursor * 1000, end_ts * 1000).await?;
            if page.is_empty() {
                break;
            }
            let last_t = page.last().map(|c| c.t).unwrap_or(cursor);
            for c in page {
                by_open_time.insert(c.t, c);
            }
            if last_t <= cursor {
                break;
            }
            cursor = last_t + 60;
        }

        Ok(by_open_time.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_mapping_matches_known_assets() {
        assert_eq!(BinanceCandleClient::symbol_for("BTC"), "BTCUSDT");
        assert_eq!(BinanceCandleClient::symbol_for("eth"), "ETHUSDT");
        assert_eq!(BinanceCandleClient::symbol_for("SOL"), "SOLUSDT");
    }
}
