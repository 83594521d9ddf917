// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges are the routing mechanism of the cluster broker: publishers send
//! to an exchange and the exchange distributes to the bound queues. On the
//! cloud bus the same role is played by a topic.

use std::fmt;

/// Exchange types a topology plan may request.
///
/// - Direct: routes on an exact routing key match, used for point-to-point endpoints
/// - Fanout: broadcasts to every bound queue regardless of the routing key
/// - Topic: routes on routing key pattern matching, used for notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Direct => f.write_str("direct"),
            ExchangeKind::Fanout => f.write_str("fanout"),
            ExchangeKind::Topic => f.write_str("topic"),
        }
    }
}

/// Definition of an exchange to declare on the cluster broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) durable: bool,
}

impl ExchangeDefinition {
    /// Creates a non-durable direct exchange definition.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    ///
    /// # Returns
    /// A new exchange definition with default settings
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            durable: false,
        }
    }

    /// Sets the exchange type.
    ///
    /// # Parameters
    /// * `kind` - The exchange type
    ///
    /// # Returns
    /// Self for method chaining
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes the exchange survive broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// The exchange name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The exchange type.
    pub fn exchange_kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }
}
