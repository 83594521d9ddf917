// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Cluster Broker Adapter
//!
//! Connects to the primary node (falling back to the peers under the same
//! login), applies the channel prefetch and declares the plan's exchange,
//! queue and binding.

use super::{unsupported, BackendAdapter, RoutingHandle};
use crate::{
    cluster::{ClusterPlan, ConnectionSettings},
    config::Backend,
    errors::AdapterError,
    plan::TopologyPlan,
    topology::{AmqpSession, AmqpTopology, Topology},
    transport::{ReceiveEndpoint, ReceiveTransport},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Both halves of an open broker connection.
///
/// Over lapin both point at the same session; they are kept apart so tests can
/// observe declarations and deliveries separately.
pub struct AmqpLink {
    /// Declares topology and sets the prefetch
    pub admin: Arc<dyn AmqpSession>,
    /// Consumes from the endpoint queue once startup is done
    pub transport: Arc<dyn ReceiveTransport>,
}

/// Opens connections to the cluster broker.
#[async_trait]
pub trait AmqpConnector: Send + Sync {
    /// Connects to the first reachable member of `settings`.
    ///
    /// # Errors
    /// `AdapterError::ConnectionError` when no member accepted the connection
    async fn connect(&self, settings: &ConnectionSettings) -> Result<AmqpLink, AdapterError>;
}

/// [`BackendAdapter`] for the cluster broker.
///
/// Accepts `Single` and `Cluster` plans. A `Managed` namespace is rejected with
/// `AdapterError::UnsupportedTopology` before anything is contacted.
pub struct RabbitMqAdapter {
    connector: Arc<dyn AmqpConnector>,
}

impl RabbitMqAdapter {
    /// Creates the adapter.
    ///
    /// # Parameters
    /// * `connector` - Opens the broker connection, usually a [`crate::channel::LapinConnector`]
    ///
    /// # Returns
    /// A new adapter
    pub fn new(connector: Arc<dyn AmqpConnector>) -> Self {
        RabbitMqAdapter { connector }
    }
}

#[async_trait]
impl BackendAdapter for RabbitMqAdapter {
    fn backend(&self) -> Backend {
        Backend::RabbitMq
    }

    /// Connects, sets the prefetch and installs the plan's topology.
    ///
    /// The prefetch is applied before any declaration so the consumer opened
    /// later inherits it. A content filter on the plan is logged and ignored;
    /// routing on this backend is by binding key only.
    async fn configure(
        &self,
        cluster: &ClusterPlan,
        plan: &TopologyPlan,
    ) -> Result<RoutingHandle, AdapterError> {
        let Some(settings) = cluster.amqp_settings() else {
            return Err(unsupported(cluster, self.backend()));
        };

        info!(
            cluster = %cluster,
            members = settings.members.len(),
            queue = plan.queue_name(),
            "configuring rabbitmq endpoint"
        );

        if let Some(filter) = plan.content_filter_expression() {
            warn!(filter, "content filters are not supported, binding by routing key");
        }

        let link = self.connector.connect(&settings).await?;

        let limits = plan.delivery_limits();
        link.admin
            .set_prefetch(limits.prefetch_count)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to configure qos");
                err
            })?;
        debug!(prefetch = limits.prefetch_count, "qos configured");

        let exchange = plan.exchange_definition();
        let queue = plan.queue_definition();
        let binding = plan.queue_binding();

        AmqpTopology::new(link.admin.clone())
            .exchange(&exchange)
            .queue(&queue)
            .queue_binding(&binding)
            .install()
            .await?;

        info!(
            exchange = exchange.name(),
            queue = queue.name(),
            routing_key = binding.key(),
            "rabbitmq endpoint configured"
        );

        Ok(RoutingHandle::new(
            self.backend(),
            ReceiveEndpoint {
                name: plan.queue_name().to_owned(),
                limits,
            },
            link.transport,
        ))
    }
}
