//! Price-cap validation (§4.3): consecutive-tick counting, strict time ordering.

use anyhow::Result;

use crate::domain::enums::CapStatus;
use crate::domain::models::CapCheck;
use crate::exchange::PriceHistoryClient;
use crate::logging::{self, Domain, Level};

pub struct CapValidator<'a> {
    prices: &'a dyn PriceHistoryClient,
    price_cap: f64,
    min_ticks: i64,
}

impl<'a> CapValidator<'a> {
    pub fn new(prices: &'a dyn PriceHistoryClient, price_cap: f64, min_ticks: i64) -> Self {
        Self { prices, price_cap, min_ticks }
    }

    /// Idempotent: a cap check already in a terminal status (PASS/FAIL/LATE) is
    /// returned unchanged without hitting the network.
    pub async fn check(&self, mut cap_check: CapCheck, current_ts: i64) -> Result<CapCheck> {
        if matches!(cap_check.status, CapStatus::Pass | CapStatus::Fail | CapStatus::Late) {
            return Ok(cap_check);
        }

        let prices = self.prices.get_price_history(&cap_check.token_id, cap_check.confirm_ts, cap_check.end_ts).await?;

        let mut consecutive = 0i64;
        let mut first_pass_ts = None;
        let mut price_at_pass = None;

        for (ts, price) in prices {
            // MG-2: ticks before confirm_ts are always ignored, regardless of arrival order.
            if ts < cap_check.confirm_ts {
                continue;
            }

            if price <= self.price_cap {
                consecutive += 1;
                if consecutive == 1 {
                    first_pass_ts = Some(ts);
                    price_at_pass = Some(price);
                }
                logging::log_cap_check(cap_check.trade_id, "pending", consecutive, price);

                if consecutive >= self.min_ticks {
                    cap_check.status = CapStatus::Pass;
                    cap_check.consecutive_ticks = consecutive;
                    cap_check.first_pass_ts = first_pass_ts;
                    cap_check.price_at_pass = price_at_pass;
                    logging::log_cap_check(cap_check.trade_id, "pass", consecutive, price);
                    return Ok(cap_check);
                }
            } else {
                consecutive = 0;
                first_pass_ts = None;
                price_at_pass = None;
            }
        }

        cap_check.consecutive_ticks = consecutive;
        if let (Some(ts), Some(price)) = (first_pass_ts, price_at_pass) {
            cap_check.first_pass_ts = Some(ts);
            cap_check.price_at_pass = Some(price);
        }

        if current_ts >= cap_check.end_ts {
            cap_check.status = CapStatus::Fail;
            logging::agg_increment("cap_fail");
            logging::log(
                Level::Info,
                Domain::Cap,
                "cap_fail",
                logging::obj(&[
                    ("trade_id", serde_json::json!(cap_check.trade_id)),
                    ("consecutive_ticks", serde_json::json!(consecutive)),
                    ("required", serde_json::json!(self.min_ticks)),
                ]),
            );
        }

        Ok(cap_check)
    }
}
