// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Cloud Bus Adapter
//!
//! Declares the receive queue on a managed namespace and, for notification
//! plans, subscribes it to the topic with a content filter instead of a
//! routing key binding. The namespace is reached through a single connection
//! string; clustered broker plans cannot be expressed here.

use super::{unsupported, BackendAdapter, RoutingHandle};
use crate::{
    cluster::ClusterPlan,
    config::Backend,
    connection::ServiceBusNamespace,
    errors::AdapterError,
    exchange::ExchangeKind,
    plan::{DeliveryLimits, TopologyPlan},
    transport::{ReceiveEndpoint, ReceiveTransport},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Filter matching every message of a topic
pub const MATCH_ALL_FILTER: &str = "1=1";

/// Management and receive operations of a managed bus namespace.
///
/// The host application supplies the implementation on top of its cloud SDK.
/// Every method receives the namespace, so one client may serve several.
#[async_trait]
pub trait ServiceBusClient: Send + Sync {
    /// Creates the queue if needed and applies prefetch and concurrent calls.
    ///
    /// # Errors
    /// `AdapterError::DeclareQueueError` when the namespace refuses the queue
    async fn declare_endpoint(
        &self,
        namespace: &ServiceBusNamespace,
        queue: &str,
        limits: DeliveryLimits,
    ) -> Result<(), AdapterError>;

    /// Creates a subscription on `topic` forwarding matching messages to `queue`.
    ///
    /// # Parameters
    /// * `namespace` - Namespace that owns both entities
    /// * `topic` - Topic notifications are published to
    /// * `queue` - Receive queue the subscription forwards to
    /// * `filter` - SQL-like filter evaluated against message properties
    ///
    /// # Errors
    /// `AdapterError::SubscriptionError` naming the queue and the topic
    async fn subscribe(
        &self,
        namespace: &ServiceBusNamespace,
        topic: &str,
        queue: &str,
        filter: &str,
    ) -> Result<(), AdapterError>;

    /// Receiver for the declared queue.
    async fn receiver(
        &self,
        namespace: &ServiceBusNamespace,
        queue: &str,
    ) -> Result<Arc<dyn ReceiveTransport>, AdapterError>;
}

/// [`BackendAdapter`] for the managed cloud bus.
///
/// Only `Managed` plans are accepted; single node and cluster plans fail with
/// `AdapterError::UnsupportedTopology` without calling the client.
pub struct ServiceBusAdapter {
    client: Arc<dyn ServiceBusClient>,
}

impl ServiceBusAdapter {
    /// Creates the adapter.
    ///
    /// # Parameters
    /// * `client` - Namespace client provided by the host application
    ///
    /// # Returns
    /// A new adapter
    pub fn new(client: Arc<dyn ServiceBusClient>) -> Self {
        ServiceBusAdapter { client }
    }
}

#[async_trait]
impl BackendAdapter for ServiceBusAdapter {
    fn backend(&self) -> Backend {
        Backend::ServiceBus
    }

    /// Declares the receive queue and, for topic plans, its subscription.
    ///
    /// A topic plan without a filter subscribes with [`MATCH_ALL_FILTER`].
    /// Direct plans only declare the queue.
    async fn configure(
        &self,
        cluster: &ClusterPlan,
        plan: &TopologyPlan,
    ) -> Result<RoutingHandle, AdapterError> {
        let ClusterPlan::Managed(namespace) = cluster else {
            return Err(unsupported(cluster, self.backend()));
        };

        info!(
            namespace = %namespace,
            queue = plan.queue_name(),
            "configuring service bus endpoint"
        );

        let limits = plan.delivery_limits();
        self.client
            .declare_endpoint(namespace, plan.queue_name(), limits)
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    queue = plan.queue_name(),
                    "failure to declare receive endpoint"
                );
                err
            })?;
        debug!(
            queue = plan.queue_name(),
            prefetch = limits.prefetch_count,
            max_concurrent_calls = limits.max_concurrent_calls,
            "receive endpoint declared"
        );

        if plan.exchange_type() == ExchangeKind::Topic {
            let filter = plan
                .content_filter_expression()
                .unwrap_or(MATCH_ALL_FILTER);

            self.client
                .subscribe(
                    namespace,
                    plan.exchange_or_topic_name(),
                    plan.queue_name(),
                    filter,
                )
                .await
                .map_err(|err| {
                    error!(
                        error = err.to_string(),
                        topic = plan.exchange_or_topic_name(),
                        filter,
                        "failure to subscribe"
                    );
                    err
                })?;
            debug!(
                topic = plan.exchange_or_topic_name(),
                filter, "subscription created"
            );
        }

        let transport = self.client.receiver(namespace, plan.queue_name()).await?;

        info!(queue = plan.queue_name(), "service bus endpoint configured");

        Ok(RoutingHandle::new(
            self.backend(),
            ReceiveEndpoint {
                name: plan.queue_name().to_owned(),
                limits,
            },
            transport,
        ))
    }
}
