// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Types describing the queue a receive endpoint consumes from and how it is
//! bound to its exchange. The durability policy turns into declaration
//! arguments on the cluster broker.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Declaration argument selecting the queue implementation
pub const AMQP_ARGS_QUEUE_TYPE: &str = "x-queue-type";
/// Declaration argument selecting the classic queue storage mode
pub const AMQP_ARGS_QUEUE_MODE: &str = "x-queue-mode";

/// Storage and replication policy applied when the queue is declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum DurabilityPolicy {
    /// Replicated queue for high availability, requires a durable queue
    #[default]
    Quorum,
    /// Classic queue that keeps messages on disk as early as possible
    Lazy,
    /// Plain classic queue
    Standard,
}

impl DurabilityPolicy {
    /// Declaration arguments for this policy.
    pub fn arguments(&self) -> BTreeMap<&'static str, &'static str> {
        let mut args = BTreeMap::new();
        match self {
            DurabilityPolicy::Quorum => {
                args.insert(AMQP_ARGS_QUEUE_TYPE, "quorum");
            }
            DurabilityPolicy::Lazy => {
                args.insert(AMQP_ARGS_QUEUE_MODE, "lazy");
            }
            DurabilityPolicy::Standard => {}
        }
        args
    }
}

/// Definition of a queue to declare on the cluster broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) policy: DurabilityPolicy,
}

impl QueueDefinition {
    /// Creates a non-durable standard queue definition.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue definition with default settings
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            policy: DurabilityPolicy::Standard,
        }
    }

    /// Makes the queue survive broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Applies a durability policy.
    ///
    /// Quorum queues are always durable.
    ///
    /// # Parameters
    /// * `policy` - The durability policy
    ///
    /// # Returns
    /// Self for method chaining
    pub fn policy(mut self, policy: DurabilityPolicy) -> Self {
        self.policy = policy;
        if policy == DurabilityPolicy::Quorum {
            self.durable = true;
        }
        self
    }

    /// The queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn durability_policy(&self) -> DurabilityPolicy {
        self.policy
    }

    /// Declaration arguments derived from the durability policy.
    pub fn arguments(&self) -> BTreeMap<&'static str, &'static str> {
        self.policy.arguments()
    }
}

/// Binds a queue to an exchange with a routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding for the given queue; exchange and routing key start empty.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange the queue is bound to.
    ///
    /// # Parameters
    /// * `exchange` - The name of the exchange
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the binding routing key.
    ///
    /// # Parameters
    /// * `key` - Routing key, a notification type for topic exchanges
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}
