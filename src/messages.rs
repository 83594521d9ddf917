// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelopes
//!
//! Plain data carried over the bus. Producers create them per business event,
//! consumers receive them deserialized from JSON.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// A type that can travel over the bus.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Value of the message type property used to route deliveries to consumers
    const MESSAGE_TYPE: &'static str;

    /// Identifier used to correlate logs across producer and consumer.
    fn correlation_id(&self) -> String;
}

/// Command asking the order endpoint to process an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCommand {
    pub order_id: Uuid,
    pub order_amount: Decimal,
    pub order_number: String,
    pub order_date: DateTime<Utc>,
}

impl OrderCommand {
    /// Creates an order with a fresh id, dated now.
    pub fn new(order_amount: Decimal, order_number: &str) -> Self {
        OrderCommand {
            order_id: Uuid::new_v4(),
            order_amount,
            order_number: order_number.to_owned(),
            order_date: Utc::now(),
        }
    }
}

impl Message for OrderCommand {
    const MESSAGE_TYPE: &'static str = "OrderCommand";

    fn correlation_id(&self) -> String {
        self.order_id.to_string()
    }
}

/// Notification fanned out to the consumer group of its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_id: Uuid,
    pub notification_type: String,
    pub notification_content: String,
    pub notification_address: String,
    pub notification_date: DateTime<Utc>,
}

impl Notification {
    /// Creates a notification with a fresh id, dated now.
    ///
    /// # Parameters
    /// * `notification_type` - Selects the consumer group, e.g. `Email`
    /// * `content` - Message body
    /// * `address` - Recipient address
    pub fn new(notification_type: &str, content: &str, address: &str) -> Self {
        Notification {
            notification_id: Uuid::new_v4(),
            notification_type: notification_type.to_owned(),
            notification_content: content.to_owned(),
            notification_address: address.to_owned(),
            notification_date: Utc::now(),
        }
    }
}

impl Message for Notification {
    const MESSAGE_TYPE: &'static str = "Notification";

    fn correlation_id(&self) -> String {
        self.notification_id.to_string()
    }
}
