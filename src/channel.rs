// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! lapin backed implementations of the cluster broker seams. [`LapinConnector`]
//! walks the cluster members in order and keeps the first connection that
//! succeeds; [`LapinSession`] wraps that connection and one channel, shared by
//! topology declaration, consumption and publishing.

use crate::{
    adapter::rabbitmq::{AmqpConnector, AmqpLink},
    cluster::ConnectionSettings,
    errors::{AdapterError, ConsumerError, PublishError},
    exchange::ExchangeDefinition,
    publisher::{PublishMessage, Publisher},
    queue::{QueueBinding, QueueDefinition},
    topology::AmqpSession,
    transport::{Delivery, DeliveryStream, ReceiveEndpoint, ReceiveTransport, Settle},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Opens lapin connections with cluster failover.
///
/// The connector holds no connection itself; every call to
/// [`LapinConnector::open`] starts a new one.
pub struct LapinConnector {
    connection_name: String,
}

impl LapinConnector {
    /// Creates a connector.
    ///
    /// # Parameters
    /// * `connection_name` - Client provided name shown by the broker's management UI
    ///
    /// # Returns
    /// A new connector
    pub fn new(connection_name: &str) -> Self {
        LapinConnector {
            connection_name: connection_name.to_owned(),
        }
    }

    /// Tries every member in order under the shared login.
    ///
    /// Members whose URI cannot be built are skipped the same way as
    /// unreachable ones.
    ///
    /// # Parameters
    /// * `settings` - Login and ordered members, primary first
    ///
    /// # Returns
    /// A session on the first member that accepted the connection, or
    /// `AdapterError::ConnectionError` naming the last member tried
    pub async fn open(&self, settings: &ConnectionSettings) -> Result<Arc<LapinSession>, AdapterError> {
        let mut last_host = String::new();

        for member in &settings.members {
            debug!(host = member.host, "creating amqp connection...");
            let options = ConnectionProperties::default()
                .with_connection_name(LongString::from(self.connection_name.clone()));

            let uri = match settings.uri(member) {
                Ok(uri) => uri,
                Err(_) => {
                    last_host = member.host.clone();
                    continue;
                }
            };

            match Connection::connect_uri(uri, options).await {
                Ok(conn) => {
                    debug!(host = member.host, "amqp connected");
                    return LapinSession::with_channel(conn).await.map(Arc::new);
                }
                Err(err) => {
                    warn!(
                        error = err.to_string(),
                        host = member.host,
                        "failure to connect, trying next member"
                    );
                    last_host = member.host.clone();
                }
            }
        }

        error!(members = settings.members.len(), "no cluster member reachable");
        Err(AdapterError::ConnectionError(last_host))
    }
}

#[async_trait]
impl AmqpConnector for LapinConnector {
    async fn connect(&self, settings: &ConnectionSettings) -> Result<AmqpLink, AdapterError> {
        let session = self.open(settings).await?;

        Ok(AmqpLink {
            admin: session.clone(),
            transport: session,
        })
    }
}

/// One connection and its channel.
///
/// Serves as [`AmqpSession`] during startup, then as [`ReceiveTransport`] for
/// the endpoint and as [`Publisher`] for outgoing messages.
pub struct LapinSession {
    conn: Connection,
    channel: Channel,
}

impl LapinSession {
    // Opens the single channel every operation of the session runs on.
    async fn with_channel(conn: Connection) -> Result<Self, AdapterError> {
        debug!("creating amqp channel...");
        match conn.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(LapinSession { conn, channel })
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AdapterError::ChannelError)
            }
        }
    }
}

#[async_trait]
impl AmqpSession for LapinSession {
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), AdapterError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to configure qos");
                AdapterError::QoSDeclarationError(err.to_string())
            })
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AdapterError> {
        self.channel
            .exchange_declare(
                def.name(),
                def.exchange_kind().into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), name = def.name(), "error to declare the exchange");
                AdapterError::DeclareExchangeError(def.name().to_owned())
            })
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AdapterError> {
        let args: BTreeMap<ShortString, AMQPValue> = def
            .arguments()
            .into_iter()
            .map(|(key, value)| {
                (
                    ShortString::from(key),
                    AMQPValue::LongString(LongString::from(value)),
                )
            })
            .collect();

        self.channel
            .queue_declare(
                def.name(),
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::from(args),
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), name = def.name(), "error to declare the queue");
                AdapterError::DeclareQueueError(def.name().to_owned())
            })
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AdapterError> {
        self.channel
            .queue_bind(
                binding.queue_name(),
                binding.exchange_name(),
                binding.key(),
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AdapterError::BindingExchangeToQueueError(
                    binding.exchange_name().to_owned(),
                    binding.queue_name().to_owned(),
                )
            })
    }
}

#[async_trait]
impl ReceiveTransport for LapinSession {
    /// Starts a manual-ack consumer on the endpoint queue.
    async fn open(
        &self,
        endpoint: &ReceiveEndpoint,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, ConsumerError> {
        let consumer = self
            .channel
            .basic_consume(
                &endpoint.name,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), queue = endpoint.name, "failure to declare consumer");
                ConsumerError::ConsumerDeclarationError(endpoint.name.clone())
            })?;

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(into_delivery(delivery)),
                Err(err) => Err(ConsumerError::ConsumerError(err.to_string())),
            })
            .boxed())
    }

    /// Closes the channel, then the connection.
    ///
    /// A channel that fails to close is only logged; the connection close
    /// result is what the caller sees.
    async fn close(&self) -> Result<(), ConsumerError> {
        if let Err(err) = self.channel.close(200, "shutdown").await {
            warn!(error = err.to_string(), "failure to close the channel");
        }

        self.conn.close(200, "shutdown").await.map_err(|err| {
            error!(error = err.to_string(), "failure to close the connection");
            ConsumerError::CloseError
        })
    }
}

#[async_trait]
impl Publisher for LapinSession {
    /// Publishes a message to an exchange with a routing key.
    ///
    /// Every message gets the JSON content type, its message type and a fresh
    /// message id. Headers are sent as long strings.
    ///
    /// # Errors
    /// `PublishError::PublishingError` naming the destination
    async fn publish(&self, msg: &PublishMessage) -> Result<(), PublishError> {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        for (key, value) in &msg.headers {
            headers.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }

        let mut props = BasicProperties::default()
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_type(ShortString::from(msg.msg_type.clone()))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(FieldTable::from(headers));
        if let Some(correlation_id) = &msg.correlation_id {
            props = props.with_correlation_id(ShortString::from(correlation_id.clone()));
        }

        let confirm = self
            .channel
            .basic_publish(
                &msg.to,
                &msg.key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.data,
                props,
            )
            .await;

        match confirm {
            Err(err) => {
                error!(error = err.to_string(), to = msg.to, "error publishing message");
                Err(PublishError::PublishingError(msg.to.clone()))
            }
            _ => Ok(()),
        }
    }
}

// Holds the broker delivery, payload taken out, to settle it later.
struct LapinSettle(lapin::message::Delivery);

#[async_trait]
impl Settle for LapinSettle {
    async fn ack(&self) -> Result<(), ConsumerError> {
        self.0
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                ConsumerError::AckMessageError
            })
    }

    async fn reject(&self) -> Result<(), ConsumerError> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                ConsumerError::NackMessageError
            })
    }
}

fn into_delivery(mut delivery: lapin::message::Delivery) -> Delivery {
    let data = std::mem::take(&mut delivery.data);
    let props = &delivery.properties;
    let message_type = props
        .kind()
        .as_ref()
        .map(|kind| kind.to_string())
        .unwrap_or_default();
    let message_id = props.message_id().as_ref().map(|id| id.to_string());
    let correlation_id = props.correlation_id().as_ref().map(|id| id.to_string());
    let headers = props
        .headers()
        .as_ref()
        .map(header_strings)
        .unwrap_or_default();

    Delivery::new(&message_type, data, LapinSettle(delivery))
        .with_message_id(message_id)
        .with_correlation_id(correlation_id)
        .with_headers(headers)
}

// Only string valued headers are kept.
fn header_strings(table: &FieldTable) -> HashMap<String, String> {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(value) => {
                    std::str::from_utf8(value.as_bytes()).ok()?.to_owned()
                }
                AMQPValue::ShortString(value) => value.as_str().to_owned(),
                _ => return None,
            };
            Some((key.as_str().to_owned(), value))
        })
        .collect()
}
