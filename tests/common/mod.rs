// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker double with peek-lock leases, per-queue delivery
//! limits, and broker-side auto-dead-lettering on limit overflow.

use async_trait::async_trait;
use redrive::destination::{dead_letter_name, Destination};
use redrive::errors::RedriveError;
use redrive::message::{LockToken, Message, OutgoingMessage, PropertyValue};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reason the broker stamps when its delivery-limit policy moves a message
pub const MAX_DELIVERY_REASON: &str = "MaxDeliveryCountExceeded";

/// Message at rest inside the broker.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
    pub properties: HashMap<String, PropertyValue>,
    pub delivery_count: u32,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_description: Option<String>,
}

struct Lease {
    queue: String,
    message: StoredMessage,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    leases: HashMap<LockToken, Lease>,
    delivery_limits: HashMap<String, u32>,
    abandons: HashMap<String, u32>,
    next_token: u64,
}

pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Arc<InMemoryBroker> {
        Arc::new(InMemoryBroker {
            state: Mutex::new(BrokerState::default()),
        })
    }

    pub fn destination(self: &Arc<Self>, queue: &str) -> Arc<InMemoryDestination> {
        Arc::new(InMemoryDestination {
            broker: self.clone(),
            queue: queue.to_owned(),
        })
    }

    /// Maximum deliveries before the broker moves the message to the queue's
    /// dead-letter sub-queue on the next lease attempt.
    pub fn set_delivery_limit(&self, queue: &str, limit: u32) {
        self.state
            .lock()
            .unwrap()
            .delivery_limits
            .insert(queue.to_owned(), limit);
    }

    pub fn messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.messages(queue).is_empty()
    }

    /// Number of leases released back to the queue by application logic.
    pub fn abandons(&self, queue: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .abandons
            .get(queue)
            .copied()
            .unwrap_or(0)
    }
}

pub struct InMemoryDestination {
    broker: Arc<InMemoryBroker>,
    queue: String,
}

#[async_trait]
impl Destination for InMemoryDestination {
    async fn send(&self, message: OutgoingMessage) -> Result<(), RedriveError> {
        let mut state = self.broker.state.lock().unwrap();
        state
            .queues
            .entry(self.queue.clone())
            .or_default()
            .push_back(StoredMessage {
                id: message.id,
                correlation_id: message.correlation_id,
                body: message.body,
                properties: message.properties,
                delivery_count: 0,
                dead_letter_reason: None,
                dead_letter_description: None,
            });
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_count: usize,
        _max_wait: Duration,
    ) -> Result<Vec<Message>, RedriveError> {
        let mut state = self.broker.state.lock().unwrap();
        let mut batch = Vec::new();

        while batch.len() < max_count {
            let Some(mut stored) = state
                .queues
                .entry(self.queue.clone())
                .or_default()
                .pop_front()
            else {
                break;
            };

            stored.delivery_count += 1;

            if let Some(limit) = state.delivery_limits.get(&self.queue).copied() {
                if stored.delivery_count > limit {
                    stored.delivery_count = 0;
                    stored.dead_letter_reason = Some(MAX_DELIVERY_REASON.to_owned());
                    stored.dead_letter_description =
                        Some(format!("delivery count exceeded the limit of {limit}"));
                    let dlq = dead_letter_name(&self.queue);
                    state.queues.entry(dlq).or_default().push_back(stored);
                    continue;
                }
            }

            state.next_token += 1;
            let token = LockToken::new(state.next_token);

            batch.push(Message {
                id: stored.id.clone(),
                correlation_id: stored.correlation_id.clone(),
                body: stored.body.clone(),
                properties: stored.properties.clone(),
                delivery_count: stored.delivery_count,
                dead_letter_reason: stored.dead_letter_reason.clone(),
                dead_letter_description: stored.dead_letter_description.clone(),
                lock_token: token,
            });

            state.leases.insert(
                token,
                Lease {
                    queue: self.queue.clone(),
                    message: stored,
                },
            );
        }

        Ok(batch)
    }

    async fn complete(&self, token: LockToken) -> Result<(), RedriveError> {
        let mut state = self.broker.state.lock().unwrap();
        state
            .leases
            .remove(&token)
            .map(|_| ())
            .ok_or(RedriveError::LeaseExpiredError)
    }

    async fn abandon(&self, token: LockToken) -> Result<(), RedriveError> {
        let mut state = self.broker.state.lock().unwrap();
        let lease = state
            .leases
            .remove(&token)
            .ok_or(RedriveError::LeaseExpiredError)?;

        *state.abandons.entry(lease.queue.clone()).or_default() += 1;
        state
            .queues
            .entry(lease.queue)
            .or_default()
            .push_back(lease.message);
        Ok(())
    }

    async fn dead_letter(
        &self,
        token: LockToken,
        reason: String,
        description: String,
    ) -> Result<(), RedriveError> {
        let mut state = self.broker.state.lock().unwrap();
        let mut lease = state
            .leases
            .remove(&token)
            .ok_or(RedriveError::LeaseExpiredError)?;

        lease.message.delivery_count = 0;
        lease.message.dead_letter_reason = Some(reason);
        lease.message.dead_letter_description = Some(description);
        state
            .queues
            .entry(dead_letter_name(&lease.queue))
            .or_default()
            .push_back(lease.message);
        Ok(())
    }
}
