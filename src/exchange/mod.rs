//! External collaborator interfaces (§6): market discovery, candle data, price history,
//! and order placement. The core lifecycle only depends on these traits; concrete
//! implementations live in the sibling modules.

pub mod candles;
pub mod discovery;
pub mod orders;
pub mod prices;
pub mod retry;
pub mod signing;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::enums::Direction;

/// A single OHLCV candle. Both `t` and `close_time` are unix seconds after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
    pub close_time: i64,
}

impl Candle {
    pub fn open(&self) -> f64 {
        self.o
    }
    pub fn high(&self) -> f64 {
        self.h
    }
    pub fn low(&self) -> f64 {
        self.l
    }
    pub fn close(&self) -> f64 {
        self.c
    }
    pub fn volume(&self) -> f64 {
        self.v
    }
}

/// A candidate Polymarket-style hourly window surfaced by market discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketCandidate {
    pub slug: String,
    pub condition_id: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub start_ts: i64,
    pub end_ts: i64,
    /// Set once the market has resolved; `None` while still live.
    pub outcome: Option<Direction>,
}

#[async_trait]
pub trait MarketDiscoveryClient: Send + Sync {
    async fn search_markets(&self, asset: &str) -> Result<Vec<MarketCandidate>>;
    async fn get_market_by_slug(&self, slug: &str) -> Result<Option<MarketCandidate>>;
}

#[async_trait]
pub trait CandleDataClient: Send + Sync {
    /// `interval` is `"1m"` or `"5m"`. Candles are ordered ascending by open time,
    /// deduplicated, and cover `[start_ts, end_ts)`.
    async fn get_candles(&self, asset: &str, interval: &str, start_ts: i64, end_ts: i64) -> Result<Vec<Candle>>;
}

#[async_trait]
pub trait PriceHistoryClient: Send + Sync {
    /// Returns `(timestamp_seconds, price)` pairs sorted ascending.
    async fn get_price_history(&self, token_id: &str, start_ts: i64, end_ts: i64) -> Result<Vec<(i64, f64)>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Live,
    Filled,
    Cancelled,
    Expired,
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub filled_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Up => Side::Buy,
            Direction::Down => Side::Buy,
        }
    }
}

#[async_trait]
pub trait OrderClient: Send + Sync {
    async fn place_limit_order(&self, token_id: &str, side: Side, price: f64, size: f64) -> Result<OrderResult>;
    async fn get_order_status(&self, order_id: &str) -> Result<OrderResult>;
    async fn cancel_order(&self, order_id: &str) -> Result<()>;
}
