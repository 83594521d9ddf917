// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Backend Adapters
//!
//! One [`BackendAdapter`] per broker backend turns a [`ClusterPlan`] and a
//! [`TopologyPlan`] into broker side effects and hands back a
//! [`RoutingHandle`] the endpoint dispatcher consumes from. The backend is
//! chosen once at startup; nothing else in the crate branches on it.

pub mod rabbitmq;
pub mod service_bus;

use crate::{
    cluster::ClusterPlan,
    config::Backend,
    errors::AdapterError,
    plan::TopologyPlan,
    transport::{ReceiveEndpoint, ReceiveTransport},
};
use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tracing::error;

/// Configures a backend for one topology plan.
///
/// Every failure is fatal at startup, adapters never retry.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// The backend this adapter talks to.
    fn backend(&self) -> Backend;

    /// Applies the topology plan on the broker reached through `cluster`.
    ///
    /// # Parameters
    /// * `cluster` - How the broker is reached
    /// * `plan` - Exchange or topic, queue, routing and limits to declare
    ///
    /// # Returns
    /// A handle on the configured endpoint, or the [`AdapterError`] of the
    /// first failing step. `UnsupportedTopology` is returned when the cluster
    /// plan does not fit the backend
    async fn configure(
        &self,
        cluster: &ClusterPlan,
        plan: &TopologyPlan,
    ) -> Result<RoutingHandle, AdapterError>;
}

/// A configured receive endpoint, ready to be consumed from.
#[derive(Clone)]
pub struct RoutingHandle {
    backend: Backend,
    endpoint: ReceiveEndpoint,
    transport: Arc<dyn ReceiveTransport>,
}

impl RoutingHandle {
    /// Bundles a configured endpoint with the transport serving it.
    pub fn new(
        backend: Backend,
        endpoint: ReceiveEndpoint,
        transport: Arc<dyn ReceiveTransport>,
    ) -> Self {
        RoutingHandle {
            backend,
            endpoint,
            transport,
        }
    }

    /// Backend that configured the endpoint.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn endpoint(&self) -> &ReceiveEndpoint {
        &self.endpoint
    }

    /// Shared handle on the transport.
    pub fn transport(&self) -> Arc<dyn ReceiveTransport> {
        self.transport.clone()
    }

    pub fn into_parts(self) -> (Backend, ReceiveEndpoint, Arc<dyn ReceiveTransport>) {
        (self.backend, self.endpoint, self.transport)
    }
}

impl fmt::Debug for RoutingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingHandle")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

pub(crate) fn unsupported(cluster: &ClusterPlan, backend: Backend) -> AdapterError {
    error!(
        topology = cluster.kind(),
        backend = backend.name(),
        "topology cannot be expressed on this backend"
    );
    AdapterError::UnsupportedTopology(cluster.kind().to_owned(), backend.name().to_owned())
}
