//! Waiting for an order to reach a terminal state
//!
//! The order is polled on a fixed interval while two deadlines race the polling: the shutdown
//! token and the trade timeout. Either one triggers a cancel request, and the caller gets the
//! last polled state together with the cancel answer.

use std::time::Duration;

use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::errors::{EngineError, Result};
use crate::common::traits::OrderApi;
use crate::common::types::{Order, OrderResult, OrderStatus};

/// Time left to cancel an open order once shutdown is requested
pub const SHUTDOWN_CANCEL_GRACE: Duration = Duration::from_millis(1500);

/// Poll `order_id` until it is filled, fails, times out or shutdown is requested
pub async fn wait_for_order<A>(
    api: &A,
    symbol: &str,
    order_id: i64,
    cancel: &CancellationToken,
    trade_timeout: Duration,
    poll_interval: Duration,
) -> Result<OrderResult>
where
    A: OrderApi + ?Sized,
{
    let deadline = sleep(trade_timeout);
    tokio::pin!(deadline);

    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last: Option<Order> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(symbol, order_id, last_status = ?last.as_ref().map(|o| o.status), "Shutdown while waiting for order, canceling it");
                let cancel_answer = match timeout(SHUTDOWN_CANCEL_GRACE, api.cancel_order(symbol, order_id)).await {
                    Ok(Ok(answer)) => {
                        info!(symbol, order_id, "Canceled order because the engine is stopping");
                        Some(answer)
                    }
                    Ok(Err(e)) => {
                        error!(symbol, order_id, "Failed to cancel order: {}", e);
                        None
                    }
                    Err(_) => {
                        error!(symbol, order_id, "Cancel request did not complete before shutdown");
                        None
                    }
                };
                return Err(EngineError::OrderInterrupted {
                    symbol: symbol.to_string(),
                    order_id,
                    last: Box::new(OrderResult { order: last, cancel: cancel_answer }),
                });
            }
            _ = &mut deadline => {
                error!(symbol, order_id, last_status = ?last.as_ref().map(|o| o.status), "Reached timeout while waiting for order completion, canceling it");
                let cancel_answer = match api.cancel_order(symbol, order_id).await {
                    Ok(answer) => Some(answer),
                    Err(e) => {
                        error!(symbol, order_id, "Failed to cancel order: {}", e);
                        None
                    }
                };
                return Err(EngineError::OrderTimeout {
                    symbol: symbol.to_string(),
                    order_id,
                    last: Box::new(OrderResult { order: last, cancel: cancel_answer }),
                });
            }
            _ = ticker.tick() => {
                let order = match api.get_order(symbol, order_id).await {
                    Ok(order) => order,
                    Err(e) => {
                        warn!(symbol, order_id, "Error while polling order, will retry until timeout: {}", e);
                        continue;
                    }
                };
                let status = order.status;
                match status {
                    OrderStatus::New => debug!(order_id, "Order is new"),
                    OrderStatus::PartiallyFilled => debug!(
                        order_id,
                        "Order is partially filled ({}/{})",
                        order.executed_quantity,
                        order.orig_quantity
                    ),
                    OrderStatus::PendingCancel => debug!(order_id, "Order is pending cancel"),
                    OrderStatus::Filled => {
                        debug!(order_id, "Order is filled");
                        return Ok(OrderResult::filled(order));
                    }
                    OrderStatus::Rejected | OrderStatus::Canceled | OrderStatus::Expired => {
                        error!(order_id, %status, "Order ended without being filled");
                        return Err(EngineError::OrderFailed {
                            symbol: symbol.to_string(),
                            order_id,
                            reason: status.to_string(),
                            last: Box::new(OrderResult { order: Some(order), cancel: None }),
                        });
                    }
                    OrderStatus::Unknown => warn!(order_id, "Unknown order status, will continue to wait"),
                }
                last = Some(order);
            }
        }
    }
}
