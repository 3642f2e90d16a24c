use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{OrderAck, OrderSide};
use crate::{Error, Result};

/// Places market orders on behalf of a session
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck>;
}

/// Executor that fills everything locally and keeps a log of what it filled
///
/// Used for offline replays and dry runs against live prices.
#[derive(Clone, Default)]
pub struct PaperExecutor {
    orders: Arc<Mutex<Vec<OrderAck>>>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders acknowledged so far
    pub fn orders(&self) -> Vec<OrderAck> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(Error::OrderFailure(format!("invalid quantity {}", quantity)));
        }

        let client_order_id = Uuid::new_v4();
        let ack = OrderAck {
            order_id: format!("paper-{}", client_order_id.simple()),
            client_order_id,
            symbol: symbol.to_string(),
            side,
            quantity,
            timestamp: Utc::now(),
        };

        tracing::info!(
            symbol = %symbol,
            side = side.as_str(),
            quantity = %quantity,
            order_id = %ack.order_id,
            "Paper order filled"
        );

        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ack.clone());

        Ok(ack)
    }
}
