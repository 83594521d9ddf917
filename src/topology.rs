// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Cluster Broker Topology
//!
//! Collects exchange, queue and binding definitions and declares them on an
//! [`AmqpSession`]. Installation always runs in dependency order: exchanges,
//! then queues, then bindings, stopping at the first failure.
//!
//! The main components are:
//! - `AmqpSession` trait: the declaration calls a broker channel must offer
//! - `Topology` trait: builder interface for registering definitions
//! - `AmqpTopology`: the registry that installs definitions on a session

use crate::{
    errors::AdapterError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Declaration side of an open channel to the cluster broker.
///
/// Implemented over lapin by [`crate::channel::LapinSession`]. Every call is
/// idempotent on the broker as long as the definition does not change.
#[async_trait]
pub trait AmqpSession: Send + Sync {
    /// Sets the channel prefetch.
    ///
    /// # Parameters
    /// * `prefetch_count` - Unacknowledged deliveries the broker may push
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), AdapterError>;

    /// Declares an exchange.
    ///
    /// # Errors
    /// `AdapterError::DeclareExchangeError` when the broker refuses it
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AdapterError>;

    /// Declares a queue with the arguments of its durability policy.
    ///
    /// # Errors
    /// `AdapterError::DeclareQueueError` when the broker refuses it, for
    /// instance when the queue already exists with other arguments
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AdapterError>;

    /// Binds a queue to an exchange with the binding routing key.
    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AdapterError>;
}

/// Trait defining the interface for topology management.
///
/// Definitions are borrowed for `'tp`, so the registry never outlives the
/// plan that owns them.
#[async_trait]
pub trait Topology<'tp> {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: &'tp ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: &'tp QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: &'tp QueueBinding) -> Self;

    /// Declares everything registered so far.
    ///
    /// Exchanges go first, then queues, then bindings.
    async fn install(&self) -> Result<(), AdapterError>;
}

/// Cluster broker implementation of the [`Topology`] trait.
///
/// Keeps the registered definitions in insertion order and installs them on
/// the wrapped session.
pub struct AmqpTopology<'tp> {
    session: Arc<dyn AmqpSession>,
    pub(crate) exchanges: Vec<&'tp ExchangeDefinition>,
    pub(crate) queues: Vec<&'tp QueueDefinition>,
    pub(crate) queues_binding: Vec<&'tp QueueBinding>,
}

impl<'tp> AmqpTopology<'tp> {
    /// Creates an empty topology.
    ///
    /// # Parameters
    /// * `session` - The open broker channel declarations are sent to
    ///
    /// # Returns
    /// A topology with no exchanges, queues or bindings
    pub fn new(session: Arc<dyn AmqpSession>) -> AmqpTopology<'tp> {
        AmqpTopology {
            session,
            exchanges: vec![],
            queues: vec![],
            queues_binding: vec![],
        }
    }
}

#[async_trait]
impl<'tp> Topology<'tp> for AmqpTopology<'tp> {
    /// Adds an exchange definition to the topology.
    ///
    /// # Parameters
    /// * `def` - An exchange definition
    ///
    /// # Returns
    /// Self for method chaining
    fn exchange(mut self, def: &'tp ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// A queue registered twice under the same name is declared once.
    fn queue(mut self, def: &'tp QueueDefinition) -> Self {
        if !self.queues.iter().any(|q| q.name() == def.name()) {
            self.queues.push(def);
        }
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    ///
    /// # Parameters
    /// * `binding` - A queue binding
    ///
    /// # Returns
    /// Self for method chaining
    fn queue_binding(mut self, binding: &'tp QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology on the broker.
    ///
    /// # Returns
    /// Ok when every declaration succeeded, otherwise the error of the first
    /// failing step; later steps are not attempted
    async fn install(&self) -> Result<(), AdapterError> {
        self.install_exchanges().await?;
        self.install_queues().await?;
        self.binding_queues().await
    }
}

impl<'tp> AmqpTopology<'tp> {
    async fn install_exchanges(&self) -> Result<(), AdapterError> {
        for exch in &self.exchanges {
            debug!(
                name = exch.name(),
                kind = %exch.exchange_kind(),
                "creating exchange"
            );

            self.session.declare_exchange(exch).await.map_err(|err| {
                error!(
                    error = err.to_string(),
                    name = exch.name(),
                    "error to declare the exchange"
                );
                err
            })?;

            debug!("exchange: {} was created", exch.name());
        }

        Ok(())
    }

    async fn install_queues(&self) -> Result<(), AdapterError> {
        for def in &self.queues {
            debug!(
                name = def.name(),
                policy = ?def.durability_policy(),
                "creating queue"
            );

            self.session.declare_queue(def).await.map_err(|err| {
                error!(error = err.to_string(), name = def.name(), "error to declare the queue");
                err
            })?;

            debug!("queue: {} was created", def.name());
        }

        Ok(())
    }

    async fn binding_queues(&self) -> Result<(), AdapterError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name(),
                binding.exchange_name(),
                binding.key()
            );

            self.session.bind_queue(binding).await.map_err(|err| {
                error!(
                    error = err.to_string(),
                    queue = binding.queue_name(),
                    exchange = binding.exchange_name(),
                    "error to bind queue to exchange"
                );
                err
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{exchange::ExchangeKind, queue::DurabilityPolicy};
    use mockall::{mock, Sequence};

    mock! {
        pub Session {}

        #[async_trait]
        impl AmqpSession for Session {
            async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), AdapterError>;
            async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AdapterError>;
            async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AdapterError>;
            async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AdapterError>;
        }
    }

    #[tokio::test]
    async fn installs_in_dependency_order() {
        let mut session = MockSession::new();
        let mut seq = Sequence::new();

        session
            .expect_declare_exchange()
            .withf(|def| def.name() == "notifications" && def.exchange_kind() == ExchangeKind::Topic)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        session
            .expect_declare_queue()
            .withf(|def| {
                def.name() == "email" && def.durability_policy() == DurabilityPolicy::Quorum
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        session
            .expect_bind_queue()
            .withf(|b| {
                b.queue_name() == "email" && b.exchange_name() == "notifications" && b.key() == "Email"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let exchange = ExchangeDefinition::new("notifications")
            .kind(ExchangeKind::Topic)
            .durable();
        let queue = QueueDefinition::new("email").policy(DurabilityPolicy::Quorum);
        let binding = QueueBinding::new("email")
            .exchange("notifications")
            .routing_key("Email");

        AmqpTopology::new(Arc::new(session))
            .exchange(&exchange)
            .queue(&queue)
            .queue_binding(&binding)
            .install()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let mut session = MockSession::new();

        session.expect_declare_exchange().returning(|_| Ok(()));
        session
            .expect_declare_queue()
            .returning(|def| Err(AdapterError::DeclareQueueError(def.name().to_owned())));
        session.expect_bind_queue().never();

        let exchange = ExchangeDefinition::new("order");
        let queue = QueueDefinition::new("order");
        let binding = QueueBinding::new("order").exchange("order");

        let result = AmqpTopology::new(Arc::new(session))
            .exchange(&exchange)
            .queue(&queue)
            .queue_binding(&binding)
            .install()
            .await;

        assert_eq!(result, Err(AdapterError::DeclareQueueError("order".to_owned())));
    }

    #[test]
    fn duplicate_queue_is_registered_once() {
        let queue = QueueDefinition::new("order");
        let topology = AmqpTopology::new(Arc::new(MockSession::new()))
            .queue(&queue)
            .queue(&queue);

        assert_eq!(topology.queues.len(), 1);
    }
}
