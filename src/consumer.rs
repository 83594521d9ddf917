// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Registration
//!
//! Binds typed consumers to a receive endpoint. Each registration carries a
//! counting admission gate so that no more than `concurrency_limit`
//! invocations of the consumer run at once; further deliveries wait for a
//! free slot. The gate is independent from the endpoint's
//! `max_concurrent_calls`, the smaller of the two bounds end-to-end
//! concurrency.

use crate::{
    dispatcher::ShutdownSignal,
    errors::{ConsumerError, PlanError},
    messages::Message,
    transport::{Delivery, ReceiveEndpoint},
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::{marker::PhantomData, sync::Arc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

/// Everything a consumer gets to see about one delivery.
pub struct ConsumeContext<M> {
    message: M,
    message_id: Option<String>,
    correlation_id: String,
    endpoint: String,
    trace: Context,
    shutdown: ShutdownSignal,
}

impl<M: Message> ConsumeContext<M> {
    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Trace context propagated from the publisher.
    pub fn trace(&self) -> &Context {
        &self.trace
    }

    /// Signal a long running consumer can watch to stop early on shutdown.
    pub fn shutdown(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }
}

/// Application logic for one message type.
///
/// Consumers run concurrently and must not share mutable state without their
/// own synchronization.
#[async_trait]
pub trait Consumer<M: Message>: Send + Sync + 'static {
    /// Handles one decoded message.
    ///
    /// Returning an error logs it and still acknowledges the delivery; no
    /// retry happens at this layer.
    async fn consume(&self, ctx: &ConsumeContext<M>) -> Result<(), ConsumerError>;
}

/// Counting admission gate.
///
/// Clones share the same slots, so a gate handed to several tasks bounds them
/// together.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    slots: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyGate {
    /// Creates a gate with `limit` slots.
    pub fn new(limit: usize) -> Self {
        ConcurrencyGate {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Waits for a free slot; the slot is released when the permit drops.
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit, ConsumerError> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConsumerError::ConsumerError("concurrency gate closed".to_owned()))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[async_trait]
trait DeliveryHandler: Send + Sync {
    async fn handle(
        &self,
        delivery: &Delivery,
        trace: Context,
        shutdown: ShutdownSignal,
    ) -> Result<(), ConsumerError>;
}

struct TypedHandler<M, C> {
    consumer: C,
    consumer_name: &'static str,
    endpoint: String,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, C> DeliveryHandler for TypedHandler<M, C>
where
    M: Message,
    C: Consumer<M>,
{
    async fn handle(
        &self,
        delivery: &Delivery,
        trace: Context,
        shutdown: ShutdownSignal,
    ) -> Result<(), ConsumerError> {
        let message: M = serde_json::from_slice(&delivery.data).map_err(|err| {
            error!(
                error = err.to_string(),
                message_type = M::MESSAGE_TYPE,
                message_id = delivery.message_id.as_deref(),
                "failure to parse payload"
            );
            ConsumerError::ParsePayloadError(M::MESSAGE_TYPE.to_owned())
        })?;

        let ctx = ConsumeContext {
            correlation_id: message.correlation_id(),
            message,
            message_id: delivery.message_id.clone(),
            endpoint: self.endpoint.clone(),
            trace,
            shutdown,
        };

        info!(
            consumer = self.consumer_name,
            correlation_id = ctx.correlation_id,
            endpoint = ctx.endpoint,
            "consuming message"
        );

        match self.consumer.consume(&ctx).await {
            Ok(()) => {
                info!(
                    consumer = self.consumer_name,
                    correlation_id = ctx.correlation_id,
                    "message consumed"
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    consumer = self.consumer_name,
                    correlation_id = ctx.correlation_id,
                    message_id = ctx.message_id.as_deref(),
                    "unable to consume message"
                );
                Err(err)
            }
        }
    }
}

/// A typed consumer attached to a receive endpoint.
pub struct ConsumerRegistration {
    endpoint: String,
    message_type: &'static str,
    consumer_name: &'static str,
    gate: ConcurrencyGate,
    handler: Arc<dyn DeliveryHandler>,
}

impl ConsumerRegistration {
    /// Attaches `consumer` to `endpoint`, admitting at most `concurrency_limit`
    /// concurrent invocations.
    ///
    /// # Parameters
    /// * `endpoint` - Endpoint the consumer is served on
    /// * `consumer` - Handler for messages of type `M`
    /// * `concurrency_limit` - In-process bound on concurrent `consume` calls
    ///
    /// # Returns
    /// The registration, or `PlanError::ZeroLimit` when the limit is zero
    pub fn register<M, C>(
        endpoint: &ReceiveEndpoint,
        consumer: C,
        concurrency_limit: u32,
    ) -> Result<Self, PlanError>
    where
        M: Message,
        C: Consumer<M>,
    {
        if concurrency_limit == 0 {
            error!(endpoint = endpoint.name, "consumer registered without slots");
            return Err(PlanError::ZeroLimit("ConcurrentMessageLimit"));
        }

        let consumer_name = std::any::type_name::<C>();
        debug!(
            endpoint = endpoint.name,
            consumer = consumer_name,
            message_type = M::MESSAGE_TYPE,
            concurrency_limit,
            "registering consumer"
        );

        Ok(ConsumerRegistration {
            endpoint: endpoint.name.clone(),
            message_type: M::MESSAGE_TYPE,
            consumer_name,
            gate: ConcurrencyGate::new(concurrency_limit as usize),
            handler: Arc::new(TypedHandler {
                consumer,
                consumer_name,
                endpoint: endpoint.name.clone(),
                _message: PhantomData,
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn message_type(&self) -> &str {
        self.message_type
    }

    pub fn consumer_name(&self) -> &str {
        self.consumer_name
    }

    pub fn concurrency_limit(&self) -> usize {
        self.gate.limit()
    }

    /// Runs the consumer once a slot of the gate is free.
    pub(crate) async fn invoke(
        &self,
        delivery: &Delivery,
        trace: Context,
        shutdown: ShutdownSignal,
    ) -> Result<(), ConsumerError> {
        let _slot = self.gate.admit().await?;
        self.handler.handle(delivery, trace, shutdown).await
    }
}
