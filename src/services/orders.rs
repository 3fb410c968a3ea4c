use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::{Order, OrderNumber, UserId};
use crate::error::{LoyaltyError, Result};
use crate::persistence::OrderStore;
use crate::validation::validate_order_number;

/// Order registration and lookup
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    /// Register an order number for accrual
    ///
    /// # Errors
    /// * `InvalidOrderNumber` - not digits or fails the Luhn check
    /// * `OrderAlreadyRegistered` - the same user already registered it
    /// * `OrderNumberConflict` - another user owns the number
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn register(&self, number: &str, user_id: UserId) -> Result<Order> {
        let number = validate_order_number(number)?;

        let (order, created) = self.orders.create(&Order::new(number, user_id)).await?;
        if created {
            info!(order_number = %order.number, "Order registered");
            return Ok(order);
        }

        if order.user_id == user_id {
            debug!(order_number = %order.number, "Order already registered by this user");
            Err(LoyaltyError::OrderAlreadyRegistered(order.number.to_string()))
        } else {
            warn!(order_number = %order.number, "Order number registered by another user");
            Err(LoyaltyError::OrderNumberConflict(order.number.to_string()))
        }
    }

    /// A user's orders, oldest first
    pub async fn orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.orders.orders_by_user(user_id).await
    }

    pub async fn order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>> {
        self.orders.order_by_number(number).await
    }
}
