// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod adapter;
pub mod bus;
pub mod channel;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod messages;
pub mod plan;
pub mod publisher;
pub mod queue;
pub mod topology;
pub mod transport;
