//! Order execution: paper-mode simulator and live-mode CLOB order placement.

use anyhow::Result;
use uuid::Uuid;

use crate::domain::enums::{Direction, FillStatus};
use crate::domain::models::MarketWindow;
use crate::exchange::{OrderClient, OrderResult, OrderStatus, Side};
use crate::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Paper,
    Live,
}

pub struct PlacedOrder {
    pub order_id: String,
    pub token_id: String,
    pub fill_price: f64,
}

pub struct ExecutionService<'a> {
    mode: ExecutionMode,
    price_cap: f64,
    order_client: Option<&'a dyn OrderClient>,
}

impl<'a> ExecutionService<'a> {
    /// Paper-mode service: no order client required, always synthesizes a fill.
    pub fn paper(price_cap: f64) -> Self {
        Self { mode: ExecutionMode::Paper, price_cap, order_client: None }
    }

    /// Live-mode service, backed by a concrete `OrderClient` (already armed with
    /// a non-EIP-712 `OrderAuth`).
    pub fn live(price_cap: f64, order_client: &'a dyn OrderClient) -> Self {
        Self { mode: ExecutionMode::Live, price_cap, order_client: Some(order_client) }
    }

    pub fn is_paper_mode(&self) -> bool {
        self.mode == ExecutionMode::Paper
    }

    /// Fixed-stake sizing only, per the current policy (no fractional/percent staking).
    pub fn calculate_stake(&self, base_stake_amount: f64) -> f64 {
        base_stake_amount
    }

    pub async fn place_order(&self, window: &MarketWindow, direction: Direction, stake_amount: f64) -> Result<PlacedOrder> {
        let token_id = match direction {
            Direction::Up => window.up_token_id.clone(),
            Direction::Down => window.down_token_id.clone(),
        };

        match self.mode {
            ExecutionMode::Paper => Ok(self.place_paper_order(token_id)),
            ExecutionMode::Live => self.place_live_order(token_id, direction, stake_amount).await,
        }
    }

    fn place_paper_order(&self, token_id: String) -> PlacedOrder {
        let order_id = format!("PAPER_{}", Uuid::new_v4().simple().to_string()[..12].to_uppercase());
        let fill_price = self.price_cap;
        logging::log_order_submit(0, &token_id, fill_price, 0.0);
        PlacedOrder { order_id, token_id, fill_price }
    }

    async fn place_live_order(&self, token_id: String, direction: Direction, stake_amount: f64) -> Result<PlacedOrder> {
        let client = self.order_client.expect("live execution requires an order client");
        let side = Side::from_direction(direction);
        let result: OrderResult = client.place_limit_order(&token_id, side, self.price_cap, stake_amount).await?;
        let fill_price = result.filled_price.unwrap_or(self.price_cap);
        Ok(PlacedOrder { order_id: result.order_id, token_id, fill_price })
    }

    /// Paper orders are always immediately filled; live orders are polled.
    pub async fn check_order_status(&self, order_id: &str) -> Result<(FillStatus, Option<f64>)> {
        match self.mode {
            ExecutionMode::Paper => Ok((FillStatus::Filled, Some(self.price_cap))),
            ExecutionMode::Live => {
                let client = self.order_client.expect("live execution requires an order client");
                let result = client.get_order_status(order_id).await?;
                let status = match result.status {
                    OrderStatus::Filled => FillStatus::Filled,
                    OrderStatus::Partial => FillStatus::Partial,
                    OrderStatus::Cancelled | OrderStatus::Expired => FillStatus::Cancelled,
                    OrderStatus::Live => FillStatus::Pending,
                };
                Ok((status, result.filled_price))
            }
        }
    }

    /// Settles a trade against the window outcome: win iff signal direction matches outcome.
    /// Win pnl = stake * (1 / fill_price - 1); loss pnl = -stake.
    pub fn settle_trade(&self, direction: Direction, fill_price: f64, stake_amount: f64, outcome: Direction) -> (bool, f64) {
        let is_win = direction == outcome;
        let pnl = if is_win { stake_amount * (1.0 / fill_price - 1.0) } else { -stake_amount };
        (is_win, pnl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> MarketWindow {
        MarketWindow {
            id: Some(1),
            asset: "BTC".into(),
            slug: "btc".into(),
            condition_id: "c1".into(),
            up_token_id: "up1".into(),
            down_token_id: "down1".into(),
            start_ts: 0,
            end_ts: 3600,
            outcome: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn paper_order_fills_at_price_cap() {
        let svc = ExecutionService::paper(0.55);
        let placed = svc.place_order(&window(), Direction::Up, 10.0).await.unwrap();
        assert!(placed.order_id.starts_with("PAPER_"));
        assert_eq!(placed.token_id, "up1");
        assert_eq!(placed.fill_price, 0.55);
    }

    #[tokio::test]
    async fn paper_order_status_is_always_filled() {
        let svc = ExecutionService::paper(0.55);
        let (status, price) = svc.check_order_status("PAPER_X").await.unwrap();
        assert_eq!(status, FillStatus::Filled);
        assert_eq!(price, Some(0.55));
    }

    #[test]
    fn settle_win_computes_implied_payout() {
        let svc = ExecutionService::paper(0.5);
        let (is_win, pnl) = svc.settle_trade(Direction::Up, 0.5, 10.0, Direction::Up);
        assert!(is_win);
        assert_eq!(pnl, 10.0);
    }

    #[test]
    fn settle_loss_is_negative_stake() {
        let svc = ExecutionService::paper(0.5);
        let (is_win, pnl) = svc.settle_trade(Direction::Up, 0.5, 10.0, Direction::Down);
        assert!(!is_win);
        assert_eq!(pnl, -10.0);
    }
}
