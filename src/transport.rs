// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Receive Transport
//!
//! The seam between a backend's delivery mechanism and the endpoint
//! dispatcher. Each backend turns its native deliveries into [`Delivery`]
//! values and settles them through a [`Settle`] implementation.

use crate::{errors::ConsumerError, plan::DeliveryLimits};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::{collections::HashMap, fmt};

/// Stream of deliveries from one receive endpoint.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, ConsumerError>>;

/// Name and flow control of a receive endpoint created by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveEndpoint {
    /// Queue name on either backend
    pub name: String,
    pub limits: DeliveryLimits,
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Settle: Send + Sync {
    /// Acknowledges the delivery, removing it from the queue.
    async fn ack(&self) -> Result<(), ConsumerError>;

    /// Rejects the delivery without requeuing it.
    async fn reject(&self) -> Result<(), ConsumerError>;
}

/// One message received from a broker.
pub struct Delivery {
    /// Type name the dispatcher routes on
    pub message_type: String,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub headers: HashMap<String, String>,
    /// Raw JSON payload
    pub data: Vec<u8>,
    settle: Box<dyn Settle>,
}

impl Delivery {
    /// Creates a delivery settled through `settle`.
    ///
    /// # Parameters
    /// * `message_type` - Type name carried by the broker message
    /// * `data` - Payload bytes
    /// * `settle` - Acknowledges or rejects the message with the broker
    ///
    /// # Returns
    /// A delivery without message id, correlation id or headers
    pub fn new(message_type: &str, data: Vec<u8>, settle: impl Settle + 'static) -> Self {
        Delivery {
            message_type: message_type.to_owned(),
            message_id: None,
            correlation_id: None,
            headers: HashMap::new(),
            data,
            settle: Box::new(settle),
        }
    }

    pub fn with_message_id(mut self, id: Option<String>) -> Self {
        self.message_id = id;
        self
    }

    pub fn with_correlation_id(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Acknowledges the delivery with the broker.
    pub async fn ack(&self) -> Result<(), ConsumerError> {
        self.settle.ack().await
    }

    /// Rejects the delivery without requeue.
    pub async fn reject(&self) -> Result<(), ConsumerError> {
        self.settle.reject().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message_type", &self.message_type)
            .field("message_id", &self.message_id)
            .field("correlation_id", &self.correlation_id)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Backend side of a receive endpoint.
///
/// Implementations must allow concurrent settlement of deliveries from the
/// worker pool while the stream is being polled.
#[async_trait]
pub trait ReceiveTransport: Send + Sync {
    /// Starts consuming from the endpoint.
    async fn open(
        &self,
        endpoint: &ReceiveEndpoint,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, ConsumerError>;

    /// Closes the underlying connection once in-flight work is done.
    async fn close(&self) -> Result<(), ConsumerError>;
}
