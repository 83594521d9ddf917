// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Message Bus Layer
//!
//! Every stage of startup has its own error enum so a failure can be traced
//! back to the step that produced it: parsing the connection string
//! ([`ParseError`]), building the topology plan ([`PlanError`]), talking to the
//! backend ([`AdapterError`]) and reading the settings ([`ConfigError`]).
//! [`ConsumerError`] and [`PublishError`] cover the runtime side, and
//! [`BusError`] wraps whichever startup stage failed.

use thiserror::Error;

/// Errors produced while parsing a broker connection string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The `amqp://` scheme was absent or nothing followed it
    #[error("connection string must start with `amqp://` and name at least one node")]
    MissingScheme,

    /// A node segment had no `user:password@` part or one of them was empty
    #[error("couldn't parse username and password from node `{0}`")]
    MissingCredentials(String),

    /// A node segment had credentials but no host
    #[error("node `{0}` has an empty host")]
    EmptyHost(String),

    /// A cloud bus connection string had no `Endpoint=` entry
    #[error("service bus connection string has no `Endpoint` entry")]
    MissingEndpoint,
}

/// Errors produced while building a [`crate::plan::TopologyPlan`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Topic routing needs a routing key
    #[error("topic routing requires a non-empty routing key")]
    EmptyRoutingKey,

    /// A queue, exchange or topic name was empty
    #[error("`{0}` must not be empty")]
    EmptyName(&'static str),

    /// A QoS limit was configured as zero
    #[error("`{0}` must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Errors produced while a backend adapter configures the broker.
///
/// All of them are fatal at startup: the process must not serve traffic with a
/// partially declared topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The cluster plan cannot be expressed on the selected backend
    #[error("topology `{0}` is not supported by the {1} backend")]
    UnsupportedTopology(String, String),

    /// Error establishing a connection to the broker
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// A cluster member carried a port that is not a number
    #[error("member `{0}` has an invalid port `{1}`")]
    InvalidPort(String, String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error creating a topic subscription on the cloud bus
    #[error("failure to subscribe `{0}` to topic `{1}`")]
    SubscriptionError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),
}

/// Errors produced while consuming messages from a receive endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// The transport refused to start a consumer on the endpoint
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// The delivery stream reported an error
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error parsing a message payload
    #[error("failure to parse payload of `{0}`")]
    ParsePayloadError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// The business handler reported a failure
    #[error("handler failure: {0}")]
    HandlerError(String),

    /// The handler panicked while processing a delivery
    #[error("handler panicked while processing `{0}`")]
    HandlerPanicked(String),

    /// A registration targets a different endpoint than the dispatcher serves
    #[error("consumer registered for endpoint `{0}` but dispatcher serves `{1}`")]
    EndpointMismatch(String, String),

    /// Error closing the connection after shutdown
    #[error("failure to close the connection")]
    CloseError,
}

/// Errors produced while loading [`crate::config::BusSettings`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The settings file is missing or is not a JSON document
    #[error("failure to read settings `{0}`")]
    ReadError(String),

    /// The settings document was not valid
    #[error("failure to parse settings: {0}")]
    InvalidSettings(String),

    /// An environment override had the wrong shape
    #[error("invalid environment override: {0}")]
    InvalidOverride(String),

    /// The named connection string is not configured
    #[error("connection string `{0}` is not provided in the settings")]
    MissingConnectionString(String),

    /// The endpoint convention address could not be understood
    #[error("invalid endpoint address `{0}`")]
    InvalidEndpointAddress(String),
}

/// Errors produced while publishing a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The message could not be serialized
    #[error("failure to serialize `{0}`")]
    SerializeError(String),

    /// The broker refused the publication
    #[error("failure to publish to `{0}`")]
    PublishingError(String),

    /// No topic or endpoint is configured for the message type
    #[error("no destination configured for `{0}`")]
    NoDestination(String),
}

/// Errors produced while wiring a receive endpoint at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    /// The adapter does not serve the backend the settings select
    #[error("settings select the {0} backend but the adapter serves {1}")]
    BackendMismatch(String, String),
}
