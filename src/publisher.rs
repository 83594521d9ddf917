// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Producer side of the bus. Notifications are published to the topic with
//! the notification type as routing key and as a `NotificationType` header,
//! which is what the cloud bus subscription filters on. Orders are sent
//! point-to-point to the endpoint named by `EndpointConventionOrderMessage`.
//! Both carry the trace context of the caller in their headers.

use crate::{
    config::{Backend, BusSettings},
    errors::{ConfigError, PublishError},
    messages::{Message, Notification, OrderCommand},
    otel,
    plan::NOTIFICATION_TYPE_PROPERTY,
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{debug, error, info};

/// A serialized message and where it goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishMessage {
    /// Exchange on the cluster broker, entity name on the cloud bus
    pub to: String,
    /// Routing key, empty for direct sends to a queue
    pub key: String,
    pub msg_type: String,
    pub correlation_id: Option<String>,
    pub headers: HashMap<String, String>,
    pub data: Vec<u8>,
}

/// Sends serialized messages to the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one message.
    ///
    /// # Errors
    /// `PublishError::PublishingError` when the broker refuses the message
    async fn publish(&self, msg: &PublishMessage) -> Result<(), PublishError>;
}

/// Whether an address names a queue or an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Queue,
    Exchange,
}

/// Destination of a point-to-point send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    kind: AddressKind,
    name: String,
}

impl EndpointAddress {
    /// Parses `rabbitmq://host/name`, `sb://namespace/name`, `queue:name` or
    /// `exchange:name`. Query strings are ignored.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || {
            error!(address = raw, "invalid endpoint address");
            ConfigError::InvalidEndpointAddress(raw.to_owned())
        };

        let trimmed = raw.trim();
        let without_query = trimmed.split('?').next().unwrap_or(trimmed);

        let (kind, name) = if let Some(rest) = without_query.strip_prefix("rabbitmq://") {
            (AddressKind::Exchange, last_segment(rest))
        } else if let Some(rest) = without_query.strip_prefix("sb://") {
            (AddressKind::Queue, last_segment(rest))
        } else if let Some(rest) = without_query.strip_prefix("queue:") {
            (AddressKind::Queue, Some(rest))
        } else if let Some(rest) = without_query.strip_prefix("exchange:") {
            (AddressKind::Exchange, Some(rest))
        } else {
            return Err(invalid());
        };

        match name.map(str::trim) {
            Some(name) if !name.is_empty() => Ok(EndpointAddress {
                kind,
                name: name.to_owned(),
            }),
            _ => Err(invalid()),
        }
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(to, key)` pair to publish with on the given backend.
    pub fn route(&self, backend: Backend) -> (String, String) {
        match (self.kind, backend) {
            (AddressKind::Queue, Backend::RabbitMq) => (String::new(), self.name.clone()),
            _ => (self.name.clone(), String::new()),
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddressKind::Queue => write!(f, "queue:{}", self.name),
            AddressKind::Exchange => write!(f, "exchange:{}", self.name),
        }
    }
}

// `host/name` and `host/vhost/name` both name `name`; a host alone names nothing.
fn last_segment(rest: &str) -> Option<&str> {
    let (_, path) = rest.split_once('/')?;
    path.trim_end_matches('/').rsplit('/').next()
}

/// Typed publishing over a [`Publisher`].
pub struct MessagePublisher {
    publisher: Arc<dyn Publisher>,
    backend: Backend,
    topic: Option<String>,
    order_destination: Option<EndpointAddress>,
}

impl MessagePublisher {
    /// Creates a publisher for the backend the settings select.
    ///
    /// # Parameters
    /// * `settings` - Supplies the topic and the order endpoint convention
    /// * `publisher` - Broker side publisher, e.g. a [`crate::channel::LapinSession`]
    ///
    /// # Returns
    /// The publisher, or `ConfigError::InvalidEndpointAddress` when the order
    /// endpoint convention cannot be parsed. Missing destinations are only
    /// reported when a message is sent
    pub fn new(settings: &BusSettings, publisher: Arc<dyn Publisher>) -> Result<Self, ConfigError> {
        let backend = Backend::from(settings);
        let topic = match backend {
            Backend::RabbitMq => &settings.bind_topic,
            Backend::ServiceBus => &settings.topic,
        };

        let order_destination = settings
            .endpoint_convention_order_message
            .as_deref()
            .filter(|address| !address.trim().is_empty())
            .map(EndpointAddress::parse)
            .transpose()?;

        debug!(
            backend = backend.name(),
            topic,
            orders = order_destination.as_ref().map(|a| a.to_string()),
            "publisher configured"
        );

        Ok(MessagePublisher {
            publisher,
            backend,
            topic: Some(topic.clone()).filter(|t| !t.trim().is_empty()),
            order_destination,
        })
    }

    /// Publishes a notification to the topic, routed by its type.
    pub async fn publish_notification(
        &self,
        ctx: &Context,
        notification: &Notification,
    ) -> Result<(), PublishError> {
        let Some(topic) = &self.topic else {
            error!("no topic configured for notifications");
            return Err(PublishError::NoDestination(Notification::MESSAGE_TYPE.to_owned()));
        };

        let mut msg = envelope(ctx, notification)?;
        msg.to = topic.clone();
        msg.key = notification.notification_type.clone();
        msg.headers.insert(
            NOTIFICATION_TYPE_PROPERTY.to_owned(),
            notification.notification_type.clone(),
        );

        self.publisher.publish(&msg).await?;

        info!(
            notification_id = %notification.notification_id,
            notification_type = notification.notification_type,
            topic,
            "notification published"
        );

        Ok(())
    }

    /// Sends an order to the configured order endpoint.
    pub async fn send_order(&self, ctx: &Context, order: &OrderCommand) -> Result<(), PublishError> {
        let Some(destination) = &self.order_destination else {
            error!("no endpoint configured for orders");
            return Err(PublishError::NoDestination(OrderCommand::MESSAGE_TYPE.to_owned()));
        };

        let mut msg = envelope(ctx, order)?;
        (msg.to, msg.key) = destination.route(self.backend);

        self.publisher.publish(&msg).await?;

        info!(
            order_id = %order.order_id,
            order_number = order.order_number,
            destination = %destination,
            "order sent"
        );

        Ok(())
    }
}

fn envelope<M: Message>(ctx: &Context, message: &M) -> Result<PublishMessage, PublishError> {
    let data = serde_json::to_vec(message).map_err(|err| {
        error!(error = err.to_string(), "failure to serialize message");
        PublishError::SerializeError(M::MESSAGE_TYPE.to_owned())
    })?;

    let mut headers = HashMap::new();
    otel::inject(ctx, &mut headers);

    Ok(PublishMessage {
        msg_type: M::MESSAGE_TYPE.to_owned(),
        correlation_id: Some(message.correlation_id()),
        headers,
        data,
        ..PublishMessage::default()
    })
}
