// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Plans
//!
//! A [`TopologyPlan`] is the backend agnostic description of one routing unit:
//! where messages are published, which queue receives them, how the queue is
//! bound (routing key or content filter) and how fast the broker may push
//! deliveries to the process.
//!
//! Two kinds of plans exist:
//! - notification plans fan typed notifications out through a topic and select
//!   the consumer group by notification type
//! - order plans are point-to-point: one named endpoint per consumer group

use crate::{
    config::{Backend, BusSettings},
    errors::PlanError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{DurabilityPolicy, QueueBinding, QueueDefinition},
};
use tracing::{debug, error};

/// Application property the cloud bus filters notifications on
pub const NOTIFICATION_TYPE_PROPERTY: &str = "NotificationType";

/// Broker to client flow control for one receive endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryLimits {
    /// Unacknowledged deliveries the channel or link may hold
    pub prefetch_count: u16,
    /// Deliveries the endpoint dispatches concurrently
    pub max_concurrent_calls: u32,
}

/// Immutable description of one routing unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    exchange_or_topic_name: String,
    exchange_type: ExchangeKind,
    queue_name: String,
    binding_routing_key: String,
    content_filter_expression: Option<String>,
    durability_policy: DurabilityPolicy,
    delivery_limits: DeliveryLimits,
}

impl TopologyPlan {
    /// Plan routing notifications of one type to the configured queue.
    ///
    /// The cluster broker publishes to the `BindTopic` exchange and binds with
    /// the notification type as routing key. The cloud bus publishes to the
    /// `Topic` topic and subscribes with a filter on the notification type.
    pub fn for_notifications(
        settings: &BusSettings,
        backend: Backend,
        notification_type: &str,
    ) -> Result<TopologyPlan, PlanError> {
        if notification_type.trim().is_empty() {
            error!("notification plan without routing key");
            return Err(PlanError::EmptyRoutingKey);
        }

        let (exchange, exchange_setting, filter) = match backend {
            Backend::RabbitMq => (&settings.bind_topic, "BindTopic", None),
            Backend::ServiceBus => (
                &settings.topic,
                "Topic",
                Some(notification_filter(notification_type)),
            ),
        };

        let plan = TopologyPlan {
            exchange_or_topic_name: required(exchange, exchange_setting)?,
            exchange_type: ExchangeKind::Topic,
            queue_name: required(&settings.queue, "Queue")?,
            binding_routing_key: notification_type.to_owned(),
            content_filter_expression: filter,
            durability_policy: settings.durability_policy,
            delivery_limits: limits(settings)?,
        };

        debug!(
            exchange = plan.exchange_or_topic_name,
            queue = plan.queue_name,
            routing_key = plan.binding_routing_key,
            "notification plan built"
        );

        Ok(plan)
    }

    /// Point-to-point plan for a named order endpoint.
    pub fn for_orders(settings: &BusSettings, endpoint_name: &str) -> Result<TopologyPlan, PlanError> {
        let name = required(endpoint_name, "endpoint")?;

        let plan = TopologyPlan {
            exchange_or_topic_name: name.clone(),
            exchange_type: ExchangeKind::Direct,
            queue_name: name,
            binding_routing_key: String::new(),
            content_filter_expression: None,
            durability_policy: settings.durability_policy,
            delivery_limits: limits(settings)?,
        };

        debug!(endpoint = plan.queue_name, "order plan built");

        Ok(plan)
    }

    /// Exchange on the cluster broker, topic on the cloud bus.
    pub fn exchange_or_topic_name(&self) -> &str {
        &self.exchange_or_topic_name
    }

    pub fn exchange_type(&self) -> ExchangeKind {
        self.exchange_type
    }

    /// Receive endpoint the consumers read from.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Routing key of the binding, empty for match all.
    pub fn binding_routing_key(&self) -> &str {
        &self.binding_routing_key
    }

    /// Subscription filter, only set for cloud bus notification plans.
    pub fn content_filter_expression(&self) -> Option<&str> {
        self.content_filter_expression.as_deref()
    }

    pub fn durability_policy(&self) -> DurabilityPolicy {
        self.durability_policy
    }

    pub fn delivery_limits(&self) -> DeliveryLimits {
        self.delivery_limits
    }

    /// Exchange the cluster broker declares for this plan.
    pub fn exchange_definition(&self) -> ExchangeDefinition {
        ExchangeDefinition::new(&self.exchange_or_topic_name)
            .kind(self.exchange_type)
            .durable()
    }

    /// Queue the cluster broker declares for this plan.
    pub fn queue_definition(&self) -> QueueDefinition {
        QueueDefinition::new(&self.queue_name)
            .durable()
            .policy(self.durability_policy)
    }

    /// Binding between the plan's queue and exchange.
    pub fn queue_binding(&self) -> QueueBinding {
        QueueBinding::new(&self.queue_name)
            .exchange(&self.exchange_or_topic_name)
            .routing_key(&self.binding_routing_key)
    }
}

/// Cloud bus filter selecting one notification type.
pub fn notification_filter(notification_type: &str) -> String {
    format!(
        "{} = '{}'",
        NOTIFICATION_TYPE_PROPERTY,
        notification_type.replace('\'', "''")
    )
}

/// Endpoint name derived from a consumer type name.
///
/// The `Consumer` suffix is dropped and the rest is kebab-cased, so
/// `OrderConsumer` becomes `order` and `PushNotificationConsumer` becomes
/// `push-notification`. Wrapped types such as `Arc<OrderConsumer>` are named
/// after the innermost type.
pub fn endpoint_name_for(consumer_type: &str) -> String {
    let inner = consumer_type.rsplit('<').next().unwrap_or(consumer_type);
    let inner = inner.split(['>', ',']).next().unwrap_or(inner).trim();
    let short = inner.rsplit("::").next().unwrap_or(inner);
    let short = match short.strip_suffix("Consumer") {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => short,
    };

    let mut name = String::with_capacity(short.len() + 4);
    let mut previous_lower = false;
    for ch in short.chars() {
        if ch.is_ascii_uppercase() {
            if previous_lower {
                name.push('-');
            }
            name.push(ch.to_ascii_lowercase());
            previous_lower = false;
        } else if ch == '_' {
            name.push('-');
            previous_lower = false;
        } else {
            name.push(ch);
            previous_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    name
}

fn required(value: &str, setting: &'static str) -> Result<String, PlanError> {
    let value = value.trim();
    if value.is_empty() {
        error!(setting, "missing topology name");
        return Err(PlanError::EmptyName(setting));
    }
    Ok(value.to_owned())
}

fn limits(settings: &BusSettings) -> Result<DeliveryLimits, PlanError> {
    let limits = &settings.consumer_limits;
    if limits.prefetch_count == 0 {
        return Err(PlanError::ZeroLimit("PrefetchCount"));
    }
    if limits.max_concurrent_calls == 0 {
        return Err(PlanError::ZeroLimit("MaxConcurrentCalls"));
    }

    Ok(DeliveryLimits {
        prefetch_count: limits.prefetch_count,
        max_concurrent_calls: limits.max_concurrent_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::AMQP_ARGS_QUEUE_TYPE;

    fn settings() -> BusSettings {
        BusSettings {
            queue: "email-notifications".to_owned(),
            topic: "notification-topic".to_owned(),
            bind_topic: "notifications".to_owned(),
            ..BusSettings::default()
        }
    }

    #[test]
    fn email_plan_for_service_bus_carries_filter() {
        let plan = TopologyPlan::for_notifications(&settings(), Backend::ServiceBus, "Email").unwrap();

        assert_eq!(plan.binding_routing_key(), "Email");
        assert_eq!(
            plan.content_filter_expression(),
            Some("NotificationType = 'Email'")
        );
        assert_eq!(plan.exchange_or_topic_name(), "notification-topic");
        assert_eq!(plan.exchange_type(), ExchangeKind::Topic);
    }

    #[test]
    fn email_plan_for_rabbitmq_binds_with_routing_key() {
        let plan = TopologyPlan::for_notifications(&settings(), Backend::RabbitMq, "Email").unwrap();

        assert_eq!(plan.binding_routing_key(), "Email");
        assert_eq!(plan.content_filter_expression(), None);
        assert_eq!(plan.exchange_or_topic_name(), "notifications");
        assert_eq!(plan.queue_name(), "email-notifications");

        let binding = plan.queue_binding();
        assert_eq!(binding.exchange_name(), "notifications");
        assert_eq!(binding.key(), "Email");

        let exchange = plan.exchange_definition();
        assert_eq!(exchange.exchange_kind(), ExchangeKind::Topic);
        assert!(exchange.is_durable());

        let queue = plan.queue_definition();
        assert!(queue.is_durable());
        assert_eq!(queue.arguments().get(AMQP_ARGS_QUEUE_TYPE), Some(&"quorum"));
    }

    #[test]
    fn empty_routing_key_is_rejected() {
        assert_eq!(
            TopologyPlan::for_notifications(&settings(), Backend::RabbitMq, ""),
            Err(PlanError::EmptyRoutingKey)
        );
        assert_eq!(
            TopologyPlan::for_notifications(&settings(), Backend::ServiceBus, "  "),
            Err(PlanError::EmptyRoutingKey)
        );
    }

    #[test]
    fn missing_names_are_rejected() {
        let mut cfg = settings();
        cfg.bind_topic.clear();
        assert_eq!(
            TopologyPlan::for_notifications(&cfg, Backend::RabbitMq, "Push"),
            Err(PlanError::EmptyName("BindTopic"))
        );

        let mut cfg = settings();
        cfg.queue.clear();
        assert_eq!(
            TopologyPlan::for_notifications(&cfg, Backend::ServiceBus, "Push"),
            Err(PlanError::EmptyName("Queue"))
        );
    }

    #[test]
    fn default_limits_are_applied() {
        let plan = TopologyPlan::for_orders(&settings(), "order").unwrap();

        assert_eq!(
            plan.delivery_limits(),
            DeliveryLimits {
                prefetch_count: 4,
                max_concurrent_calls: 3
            }
        );
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut cfg = settings();
        cfg.consumer_limits.max_concurrent_calls = 0;

        assert_eq!(
            TopologyPlan::for_orders(&cfg, "order"),
            Err(PlanError::ZeroLimit("MaxConcurrentCalls"))
        );
    }

    #[test]
    fn order_plan_is_point_to_point() {
        let plan = TopologyPlan::for_orders(&settings(), "order").unwrap();

        assert_eq!(plan.exchange_type(), ExchangeKind::Direct);
        assert_eq!(plan.queue_name(), "order");
        assert_eq!(plan.exchange_or_topic_name(), "order");
        assert_eq!(plan.binding_routing_key(), "");
        assert_eq!(plan.content_filter_expression(), None);
    }

    #[test]
    fn filter_escapes_quotes() {
        assert_eq!(notification_filter("O'Brien"), "NotificationType = 'O''Brien'");
    }

    #[test]
    fn endpoint_names_are_kebab_case() {
        assert_eq!(endpoint_name_for("OrderConsumer"), "order");
        assert_eq!(endpoint_name_for("PushNotificationConsumer"), "push-notification");
        assert_eq!(endpoint_name_for("app::consumers::EmailConsumer"), "email");
        assert_eq!(endpoint_name_for("Consumer"), "consumer");
        assert_eq!(endpoint_name_for("SmsV2Handler"), "sms-v2-handler");
        assert_eq!(
            endpoint_name_for("alloc::sync::Arc<app::OrderConsumer>"),
            "order"
        );
    }
}
