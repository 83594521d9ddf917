// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Endpoint Dispatcher
//!
//! Serves one receive endpoint with a pool of concurrent workers. Deliveries
//! are routed to the consumer registered for their message type.
//!
//! The pool admits at most `max_concurrent_calls` deliveries at once and each
//! consumer's own gate admits at most its `concurrency_limit`, so the
//! effective bound is the smaller of the two. No ordering is guaranteed once
//! either bound is above one; an endpoint that needs ordered processing must
//! be configured with a concurrency of one.
//!
//! Delivery outcomes:
//! - unknown message type: acknowledged and dropped
//! - undecodable payload: rejected without requeue
//! - handler failure: logged and acknowledged, this layer never retries
//! - handler panic: logged and rejected without requeue, the pool keeps running

use crate::{
    adapter::RoutingHandle,
    consumer::ConsumerRegistration,
    errors::ConsumerError,
    otel,
    transport::{Delivery, ReceiveEndpoint, ReceiveTransport},
};
use futures_util::{FutureExt, StreamExt};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    trace::{Span, Status},
};
use std::{
    borrow::Cow, collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Duration,
};
use tokio::{
    sync::{watch, Semaphore},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

/// Owner side of the process shutdown signal.
///
/// Triggering is one way; a triggered signal never resets.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Creates an untriggered signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Shutdown { tx }
    }

    /// Hands out a view of the signal.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Tells every holder of a signal to stop.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable view of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered. Never resolves if the owner is
    /// dropped without triggering.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Worker pool serving one receive endpoint.
///
/// Deliveries are pulled only while an endpoint slot is free, so at most
/// `max_concurrent_calls` are in flight. Each one is routed by message type to
/// its [`ConsumerRegistration`], whose gate bounds the handler further.
pub struct EndpointDispatcher {
    endpoint: ReceiveEndpoint,
    transport: Arc<dyn ReceiveTransport>,
    consumer_tag: String,
    shutdown_timeout: Duration,
    registrations: HashMap<String, Arc<ConsumerRegistration>>,
}

impl EndpointDispatcher {
    /// Creates a dispatcher without consumers.
    ///
    /// # Parameters
    /// * `handle` - Endpoint and transport returned by the adapter
    /// * `shutdown_timeout` - Time in-flight handlers get after shutdown
    ///
    /// # Returns
    /// A dispatcher with a unique consumer tag derived from the endpoint name
    pub fn new(handle: RoutingHandle, shutdown_timeout: Duration) -> Self {
        let (_, endpoint, transport) = handle.into_parts();

        EndpointDispatcher {
            consumer_tag: format!("{}-{}", endpoint.name, uuid::Uuid::new_v4()),
            endpoint,
            transport,
            shutdown_timeout,
            registrations: HashMap::default(),
        }
    }

    /// Adds a consumer; a later registration for the same message type replaces the earlier one.
    pub fn register(mut self, registration: ConsumerRegistration) -> Result<Self, ConsumerError> {
        if registration.endpoint() != self.endpoint.name {
            error!(
                registered = registration.endpoint(),
                served = self.endpoint.name,
                "consumer registered for another endpoint"
            );
            return Err(ConsumerError::EndpointMismatch(
                registration.endpoint().to_owned(),
                self.endpoint.name.clone(),
            ));
        }

        self.registrations.insert(
            registration.message_type().to_owned(),
            Arc::new(registration),
        );

        Ok(self)
    }

    pub fn endpoint(&self) -> &ReceiveEndpoint {
        &self.endpoint
    }

    /// Upper bound on concurrent invocations of the consumer for `message_type`.
    pub fn effective_concurrency(&self, message_type: &str) -> Option<usize> {
        self.registrations.get(message_type).map(|registration| {
            registration
                .concurrency_limit()
                .min(self.endpoint.limits.max_concurrent_calls as usize)
        })
    }

    /// Consumes until the delivery stream ends or shutdown is triggered.
    ///
    /// On exit no new delivery is pulled, in-flight handlers get up to the
    /// shutdown timeout to finish and are aborted afterwards, then the
    /// transport is closed.
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), ConsumerError> {
        let mut deliveries = self
            .transport
            .open(&self.endpoint, &self.consumer_tag)
            .await?;

        info!(
            endpoint = self.endpoint.name,
            max_concurrent_calls = self.endpoint.limits.max_concurrent_calls,
            prefetch = self.endpoint.limits.prefetch_count,
            "endpoint started"
        );

        let tracer = Arc::new(global::tracer("endpoint dispatcher"));
        let slots = Arc::new(Semaphore::new(
            self.endpoint.limits.max_concurrent_calls as usize,
        ));
        let mut in_flight = JoinSet::new();

        loop {
            let slot = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                slot = slots.clone().acquire_owned() => slot.map_err(|_| {
                    ConsumerError::ConsumerError("dispatch slots closed".to_owned())
                })?,
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    error!(error = err.to_string(), "errors consume msg");
                    continue;
                }
                None => {
                    debug!(endpoint = self.endpoint.name, "delivery stream ended");
                    break;
                }
            };

            let registration = self.registrations.get(&delivery.message_type).cloned();
            let tracer = tracer.clone();
            let signal = shutdown.clone();
            in_flight.spawn(async move {
                dispatch(&tracer, delivery, registration, signal).await;
                drop(slot);
            });

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(err) = joined {
                    error!(error = err.to_string(), "worker task failure");
                }
            }
        }

        drop(deliveries);
        self.drain(in_flight).await;

        info!(endpoint = self.endpoint.name, "endpoint stopped");
        self.transport.close().await
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }

        info!(
            in_flight = in_flight.len(),
            "waiting for in-flight deliveries"
        );

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(err) = joined {
                    error!(error = err.to_string(), "worker task failure");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                "shutdown timeout elapsed, cancelling in-flight deliveries"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }
}

async fn dispatch(
    tracer: &BoxedTracer,
    delivery: Delivery,
    registration: Option<Arc<ConsumerRegistration>>,
    shutdown: ShutdownSignal,
) {
    let (ctx, mut span) = otel::new_span(&delivery.headers, tracer, &delivery.message_type);

    debug!(
        message_type = delivery.message_type,
        message_id = delivery.message_id.as_deref(),
        correlation_id = delivery.correlation_id.as_deref(),
        "received"
    );

    let Some(registration) = registration else {
        let msg = "removing message from queue - reason: unsupported msg type";
        span.record_error(&ConsumerError::ConsumerError(msg.to_owned()));
        span.set_status(Status::Error {
            description: Cow::from(msg),
        });
        warn!(message_type = delivery.message_type, "{}", msg);

        settle(delivery.ack().await, &mut span);
        return;
    };

    let outcome = AssertUnwindSafe(registration.invoke(&delivery, ctx, shutdown))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {
            debug!("message successfully processed");
            span.set_status(Status::Ok);
            settle(delivery.ack().await, &mut span);
        }
        Ok(Err(err @ ConsumerError::ParsePayloadError(_))) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("failure to parse payload"),
            });
            settle(delivery.reject().await, &mut span);
        }
        Ok(Err(err)) => {
            // Redelivery is the transport's business; the message is dropped here.
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("handler failure"),
            });
            settle(delivery.ack().await, &mut span);
        }
        Err(_) => {
            let err = ConsumerError::HandlerPanicked(delivery.message_type.clone());
            error!(
                message_type = delivery.message_type,
                message_id = delivery.message_id.as_deref(),
                correlation_id = delivery.correlation_id.as_deref(),
                "handler panicked"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("handler panicked"),
            });
            settle(delivery.reject().await, &mut span);
        }
    }
}

fn settle(result: Result<(), ConsumerError>, span: &mut BoxedSpan) {
    if let Err(err) = result {
        error!(error = err.to_string(), "error whiling settle msg");
        span.record_error(&err);
        span.set_status(Status::Error {
            description: Cow::from("error to settle msg"),
        });
    }
}
