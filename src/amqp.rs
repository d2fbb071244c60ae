// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Destination Binding
//!
//! This module implements the [`Destination`] contract over a shared lapin
//! channel. Publishing maps application properties onto AMQP header values
//! and injects the current trace context; receiving polls `basic_get` under
//! a bounded wait and turns each delivery into a leased [`Message`] whose
//! lock token wraps the broker's delivery tag.
//!
//! The broker has no first-class dead-letter verb for an individual leased
//! message, so the explicit dead-letter settlement republishes the payload to
//! the `-dlq` sub-queue with the reason/description headers and then acks the
//! original — the same move the broker itself performs on delivery-limit
//! overflow.

use crate::{
    config::{Config, DestinationName},
    destination::{dead_letter_name, Destination},
    errors::RedriveError,
    message::{
        LockToken, Message, OutgoingMessage, PropertyValue, DEAD_LETTER_DESCRIPTION_PROPERTY,
        DEAD_LETTER_REASON_PROPERTY,
    },
    otel::AmqpTracePropagator,
};
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::{global, trace::Span, Context};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::error;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header the broker maintains with the number of previous deliveries
pub const AMQP_HEADERS_DELIVERY_COUNT: &str = "x-delivery-count";
/// Header the broker stamps when it moves a message to a dead-letter queue
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Reason field inside an x-death entry
pub const AMQP_HEADERS_X_DEATH_REASON: &str = "reason";

/// Interval between `basic_get` polls while a batch wait is open
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Payload parked while its delivery is leased, keyed by lock token.
struct PendingDelivery {
    properties: BasicProperties,
    body: Vec<u8>,
}

/// AMQP implementation of the [`Destination`] contract.
///
/// One instance per logical destination; the underlying channel is shared,
/// and settlement calls are keyed by each message's own delivery tag, so the
/// handle supports concurrent use without external locking.
pub struct AmqpDestination {
    channel: Arc<Channel>,
    exchange: String,
    routing_key: String,
    queue: String,
    target: String,
    pending: Mutex<HashMap<LockToken, PendingDelivery>>,
}

impl AmqpDestination {
    /// A plain queue destination.
    pub fn queue(channel: Arc<Channel>, name: &str) -> AmqpDestination {
        AmqpDestination {
            channel,
            exchange: String::new(),
            routing_key: name.to_owned(),
            queue: name.to_owned(),
            target: name.to_owned(),
            pending: Mutex::new(HashMap::default()),
        }
    }

    /// A topic+subscription destination: publishes go to the topic exchange,
    /// receives come from the subscription's bound queue.
    pub fn subscription(
        channel: Arc<Channel>,
        topic: &str,
        subscription: &str,
    ) -> AmqpDestination {
        AmqpDestination {
            channel,
            exchange: topic.to_owned(),
            routing_key: String::new(),
            queue: format!("{topic}.{subscription}"),
            target: topic.to_owned(),
            pending: Mutex::new(HashMap::default()),
        }
    }

    /// The read/settle view of this destination's dead-letter sub-queue.
    pub fn dead_letter_view(&self) -> AmqpDestination {
        let dlq = dead_letter_name(&self.queue);
        AmqpDestination {
            channel: self.channel.clone(),
            exchange: String::new(),
            routing_key: dlq.clone(),
            queue: dlq.clone(),
            target: dlq,
            pending: Mutex::new(HashMap::default()),
        }
    }

    /// Builds the pipeline's three destinations — live, its dead-letter
    /// view, and quarantine — from the configuration.
    pub fn from_config(
        channel: &Arc<Channel>,
        cfg: &Config,
    ) -> (
        Arc<AmqpDestination>,
        Arc<AmqpDestination>,
        Arc<AmqpDestination>,
    ) {
        let live = match &cfg.live {
            DestinationName::Queue { queue } => AmqpDestination::queue(channel.clone(), queue),
            DestinationName::Subscription {
                topic,
                subscription,
            } => AmqpDestination::subscription(channel.clone(), topic, subscription),
        };
        let dead_letter = live.dead_letter_view();
        let quarantine = AmqpDestination::queue(channel.clone(), &cfg.quarantine);

        (Arc::new(live), Arc::new(dead_letter), Arc::new(quarantine))
    }

    async fn lease(&self, delivery: Delivery) -> Message {
        let tracer = global::tracer("amqp receiver");
        let (_ctx, mut span) = crate::otel::consumer_span(&delivery.properties, &tracer, &self.queue);

        let headers = delivery.properties.headers().clone().unwrap_or_default();
        let (dead_letter_reason, dead_letter_description) = dead_letter_headers(&headers);

        let mut properties = HashMap::default();
        for (key, value) in headers.inner() {
            if is_broker_header(key.as_str()) {
                continue;
            }
            if let Some(value) = app_property(value) {
                properties.insert(key.as_str().to_owned(), value);
            }
        }

        let id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_owned())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_owned());
        let token = LockToken::new(delivery.delivery_tag);

        let message = Message {
            id,
            correlation_id,
            body: delivery.data.clone(),
            properties,
            delivery_count: delivery_count(&headers),
            dead_letter_reason,
            dead_letter_description,
            lock_token: token,
        };

        self.pending.lock().await.insert(
            token,
            PendingDelivery {
                properties: delivery.properties,
                body: delivery.data,
            },
        );

        span.end();
        message
    }

    async fn take_pending(&self, token: LockToken) -> Result<PendingDelivery, RedriveError> {
        self.pending
            .lock()
            .await
            .remove(&token)
            .ok_or(RedriveError::LeaseExpiredError)
    }

    async fn ack(&self, token: LockToken) -> Result<(), RedriveError> {
        match self
            .channel
            .basic_ack(token.raw(), BasicAckOptions { multiple: false })
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(RedriveError::LeaseExpiredError)
            }
        }
    }
}

#[async_trait]
impl Destination for AmqpDestination {
    async fn send(&self, message: OutgoingMessage) -> Result<(), RedriveError> {
        let mut headers = amqp_headers(&message.properties);

        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(
                &Context::current(),
                &mut AmqpTracePropagator::new(&mut headers),
            )
        });

        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_message_id(ShortString::from(message.id.clone()))
            .with_headers(FieldTable::from(headers));
        if let Some(correlation_id) = &message.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.clone()));
        }

        match self
            .channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    destination = %self.target,
                    "error publishing message"
                );
                Err(RedriveError::PublishError(self.target.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn receive_batch(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Message>, RedriveError> {
        let deadline = Instant::now() + max_wait;
        let mut batch = Vec::new();

        while batch.len() < max_count {
            let fetched = match self
                .channel
                .basic_get(&self.queue, BasicGetOptions { no_ack: false })
                .await
            {
                Ok(fetched) => fetched,
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        queue = %self.queue,
                        "error receiving message"
                    );
                    return Err(RedriveError::ReceiveError(self.queue.clone()));
                }
            };

            match fetched {
                Some(fetched) => batch.push(self.lease(fetched.delivery).await),
                None => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        Ok(batch)
    }

    async fn complete(&self, token: LockToken) -> Result<(), RedriveError> {
        self.take_pending(token).await?;
        self.ack(token).await
    }

    async fn abandon(&self, token: LockToken) -> Result<(), RedriveError> {
        self.take_pending(token).await?;

        match self
            .channel
            .basic_nack(
                token.raw(),
                BasicNackOptions {
                    multiple: false,
                    requeue: true,
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error whiling nack msg");
                Err(RedriveError::LeaseExpiredError)
            }
        }
    }

    async fn dead_letter(
        &self,
        token: LockToken,
        reason: String,
        description: String,
    ) -> Result<(), RedriveError> {
        let pending = self.take_pending(token).await?;

        let mut headers = pending
            .properties
            .headers()
            .clone()
            .unwrap_or_default()
            .inner()
            .clone();
        headers.insert(
            ShortString::from(DEAD_LETTER_REASON_PROPERTY),
            AMQPValue::LongString(LongString::from(reason)),
        );
        headers.insert(
            ShortString::from(DEAD_LETTER_DESCRIPTION_PROPERTY),
            AMQPValue::LongString(LongString::from(description)),
        );
        let properties = pending
            .properties
            .clone()
            .with_headers(FieldTable::from(headers));

        let dlq = dead_letter_name(&self.queue);
        if let Err(err) = self
            .channel
            .basic_publish(
                "",
                &dlq,
                BasicPublishOptions::default(),
                &pending.body,
                properties,
            )
            .await
        {
            error!(error = err.to_string(), queue = %dlq, "error whiling sending to dlq");
            self.pending.lock().await.insert(token, pending);
            return Err(RedriveError::PublishError(dlq));
        }

        self.ack(token).await
    }
}

/// Converts application properties to AMQP header values.
fn amqp_headers(properties: &HashMap<String, PropertyValue>) -> BTreeMap<ShortString, AMQPValue> {
    let mut btree = BTreeMap::default();

    for (key, value) in properties {
        let amqp_value = match value {
            PropertyValue::Bool(v) => AMQPValue::Boolean(*v),
            PropertyValue::Int(v) => AMQPValue::LongLongInt(*v),
            PropertyValue::Float(v) => AMQPValue::Double(*v),
            PropertyValue::String(v) => AMQPValue::LongString(LongString::from(v.clone())),
        };

        btree.insert(ShortString::from(key.clone()), amqp_value);
    }

    btree
}

/// Converts an AMQP header value back to a scalar application property.
fn app_property(value: &AMQPValue) -> Option<PropertyValue> {
    match value {
        AMQPValue::Boolean(v) => Some(PropertyValue::Bool(*v)),
        AMQPValue::ShortShortInt(v) => Some(PropertyValue::Int(i64::from(*v))),
        AMQPValue::ShortShortUInt(v) => Some(PropertyValue::Int(i64::from(*v))),
        AMQPValue::ShortInt(v) => Some(PropertyValue::Int(i64::from(*v))),
        AMQPValue::ShortUInt(v) => Some(PropertyValue::Int(i64::from(*v))),
        AMQPValue::LongInt(v) => Some(PropertyValue::Int(i64::from(*v))),
        AMQPValue::LongUInt(v) => Some(PropertyValue::Int(i64::from(*v))),
        AMQPValue::LongLongInt(v) => Some(PropertyValue::Int(*v)),
        AMQPValue::Float(v) => Some(PropertyValue::Float(f64::from(*v))),
        AMQPValue::Double(v) => Some(PropertyValue::Float(*v)),
        AMQPValue::ShortString(v) => Some(PropertyValue::String(v.as_str().to_owned())),
        AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes())
            .map(|s| PropertyValue::String(s.to_owned()))
            .ok(),
        _ => None,
    }
}

/// Headers owned by the broker or the trace propagator; they never surface
/// as application properties.
fn is_broker_header(key: &str) -> bool {
    key.starts_with("x-") || key == "traceparent" || key == "tracestate"
}

/// Number of leases taken on the message, including the current one.
fn delivery_count(headers: &FieldTable) -> u32 {
    let prior = match headers.inner().get(AMQP_HEADERS_DELIVERY_COUNT) {
        Some(AMQPValue::LongLongInt(v)) => *v as u32,
        Some(AMQPValue::LongInt(v)) => *v as u32,
        Some(AMQPValue::LongUInt(v)) => *v,
        _ => 0,
    };

    prior + 1
}

/// Dead-letter reason/description, from the explicit settlement headers or
/// from the broker-stamped x-death entry.
fn dead_letter_headers(headers: &FieldTable) -> (Option<String>, Option<String>) {
    let inner = headers.inner();

    let reason = header_string(inner.get(DEAD_LETTER_REASON_PROPERTY));
    if reason.is_some() {
        return (
            reason,
            header_string(inner.get(DEAD_LETTER_DESCRIPTION_PROPERTY)),
        );
    }

    let broker_reason = match inner.get(AMQP_HEADERS_X_DEATH) {
        Some(value) => match value.as_array() {
            Some(arr) => match arr.as_slice().first() {
                Some(value) => match value.as_field_table() {
                    Some(table) => header_string(table.inner().get(AMQP_HEADERS_X_DEATH_REASON)),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        },
        _ => None,
    };

    (broker_reason, None)
}

fn header_string(value: Option<&AMQPValue>) -> Option<String> {
    match value {
        Some(AMQPValue::LongString(v)) => {
            std::str::from_utf8(v.as_bytes()).map(str::to_owned).ok()
        }
        Some(AMQPValue::ShortString(v)) => Some(v.as_str().to_owned()),
        _ => None,
    }
}
