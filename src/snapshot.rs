//! TA snapshot cache: per-asset 1m/5m candle snapshots, refreshed independently of any
//! active market window so signal-search can always read fresh context.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use crate::exchange::{Candle, CandleDataClient};
use crate::logging;

#[derive(Debug, Clone)]
pub struct TaSnapshot {
    pub asset: String,
    pub ts: i64,
    pub candles_1m: Vec<Candle>,
    pub candles_5m: Vec<Candle>,
}

impl TaSnapshot {
    pub fn is_stale(&self, current_ts: i64, max_age_seconds: i64) -> bool {
        (current_ts - self.ts) > max_age_seconds
    }
}

/// TTL-based cache-aside store, one snapshot per asset.
pub struct TaSnapshotCache {
    ttl_seconds: i64,
    snapshots: Mutex<HashMap<String, TaSnapshot>>,
}

impl TaSnapshotCache {
    pub fn new(ttl_seconds: i64) -> Self {
        Self { ttl_seconds, snapshots: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached snapshot for `asset`, or `None` if absent or stale.
    pub fn get(&self, asset: &str, current_ts: i64) -> Option<TaSnapshot> {
        let snapshots = self.snapshots.lock().unwrap();
        let snapshot = snapshots.get(asset)?;
        if snapshot.is_stale(current_ts, self.ttl_seconds) {
            return None;
        }
        Some(snapshot.clone())
    }

    pub fn put(&self, snapshot: TaSnapshot) {
        logging::log(
            logging::Level::Debug,
            logging::Domain::Market,
            "ta_snapshot_cached",
            logging::obj(&[
                ("asset", logging::v_str(&snapshot.asset)),
                ("candles_1m_count", serde_json::json!(snapshot.candles_1m.len())),
                ("candles_5m_count", serde_json::json!(snapshot.candles_5m.len())),
            ]),
        );
        self.snapshots.lock().unwrap().insert(snapshot.asset.clone(), snapshot);
    }

    pub fn invalidate(&self, asset: &str) {
        self.snapshots.lock().unwrap().remove(asset);
    }

    pub fn assets(&self) -> Vec<String> {
        self.snapshots.lock().unwrap().keys().cloned().collect()
    }
}

/// Refreshes the snapshot for every configured asset by fetching `warmup_seconds` of
/// 1m and 5m candles. Errors for one asset are logged and do not abort the others.
pub async fn refresh_all(cache: &TaSnapshotCache, candles: &dyn CandleDataClient, assets: &[String], warmup_seconds: i64, current_ts: i64) {
    for asset in assets {
        if let Err(err) = refresh_one(cache, candles, asset, warmup_seconds, current_ts).await {
            logging::log(
                logging::Level::Warn,
                logging::Domain::Market,
                "ta_snapshot_update_error",
                logging::obj(&[("asset", logging::v_str(asset)), ("error", logging::v_str(&err.to_string()))]),
            );
        }
    }
}

async fn refresh_one(cache: &TaSnapshotCache, candles: &dyn CandleDataClient, asset: &str, warmup_seconds: i64, current_ts: i64) -> Result<()> {
    let start_ts = current_ts - warmup_seconds;
    let (candles_1m, candles_5m) = futures::try_join!(candles.get_candles(asset, "1m", start_ts, current_ts), candles.get_candles(asset, "5m", start_ts, current_ts))?;

    cache.put(TaSnapshot { asset: asset.to_string(), ts: current_ts, candles_1m, candles_5m });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeCandles;

    #[async_trait]
    impl CandleDataClient for FakeCandles {
        async fn get_candles(&self, _asset: &str, _interval: &str, _start_ts: i64, _end_ts: i64) -> Result<Vec<Candle>> {
            Ok(vec![Candle { t: 0, o: 1.0, h: 1.0, l: 1.0, c: 1.0, v: 1.0, close_time: 59 }])
        }
    }

    #[test]
    fn stale_snapshot_is_not_returned() {
        let cache = TaSnapshotCache::new(120);
        cache.put(TaSnapshot { asset: "BTC".into(), ts: 1000, candles_1m: vec![], candles_5m: vec![] });
        assert!(cache.get("BTC", 1050).is_some());
        assert!(cache.get("BTC", 1200).is_none());
    }

    #[test]
    fn missing_asset_returns_none() {
        let cache = TaSnapshotCache::new(120);
        assert!(cache.get("ETH", 1000).is_none());
    }

    #[tokio::test]
    async fn refresh_all_populates_cache_for_each_asset() {
        let cache = TaSnapshotCache::new(120);
        let candles = FakeCandles;
        refresh_all(&cache, &candles, &["BTC".to_string(), "ETH".to_string()], 7200, 5000).await;
        assert!(cache.get("BTC", 5000).is_some());
        assert!(cache.get("ETH", 5000).is_some());
    }
}
