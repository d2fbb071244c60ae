// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Model
//!
//! This module provides the unit of work moved through the pipeline: the
//! leased [`Message`] read from a source, the [`OutgoingMessage`] shape used
//! for publishing, the scalar application-property values, and the opaque
//! lease capability ([`LockToken`]) every settlement call is keyed by.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Application property carrying the dead-letter reason on messages that were
/// moved to a dead-letter sub-queue
pub const DEAD_LETTER_REASON_PROPERTY: &str = "deadLetterReason";
/// Application property carrying the dead-letter description
pub const DEAD_LETTER_DESCRIPTION_PROPERTY: &str = "deadLetterDescription";

/// Opaque capability proving current lease ownership of a received message.
///
/// The token is attached to each received [`Message`] and passed by value to
/// every settlement call; it becomes invalid once the lease expires or the
/// message is settled. It is never shared between messages, so concurrent
/// workers never contend over the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(u64);

impl LockToken {
    pub fn new(raw: u64) -> LockToken {
        LockToken(raw)
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

/// Scalar value of an application property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "{v}"),
        }
    }
}

/// A message leased from a source destination.
///
/// Ownership of the underlying record stays with the broker; this value is a
/// snapshot plus the lease capability. The `dead_letter_reason` and
/// `dead_letter_description` fields are populated only on messages read from
/// a dead-letter sub-queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
    pub properties: HashMap<String, PropertyValue>,
    /// Broker-maintained count of leases taken on this message, including
    /// the current one
    pub delivery_count: u32,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_description: Option<String>,
    pub lock_token: LockToken,
}

/// The publish-side message shape: no lease, no delivery bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub id: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
    pub properties: HashMap<String, PropertyValue>,
}

impl OutgoingMessage {
    pub fn new(id: &str, body: Vec<u8>) -> OutgoingMessage {
        OutgoingMessage {
            id: id.to_owned(),
            correlation_id: None,
            body,
            properties: HashMap::default(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_property(mut self, key: &str, value: PropertyValue) -> Self {
        self.properties.insert(key.to_owned(), value);
        self
    }

    pub fn with_properties(mut self, properties: &HashMap<String, PropertyValue>) -> Self {
        for (key, value) in properties {
            self.properties.insert(key.clone(), value.clone());
        }
        self
    }
}

/// Conventional JSON body carried by pipeline messages.
///
/// `kind` is the classification tag and the field that makes a payload
/// reconstructible; `amount` is the required numeric field the classifier
/// validates and the repair engine defaults. Unknown fields are preserved
/// verbatim across a repair round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Payload {
    pub fn parse(body: &[u8]) -> Result<Payload, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip_preserves_extra_fields() {
        let body = br#"{"kind":"Good","amount":19.99,"currency":"EUR"}"#;
        let payload = Payload::parse(body).unwrap();

        assert_eq!(payload.kind, "Good");
        assert_eq!(payload.amount, Some(19.99));
        assert_eq!(
            payload.extra.get("currency"),
            Some(&serde_json::Value::String("EUR".to_owned()))
        );

        let reparsed = Payload::parse(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed, payload);
    }

    #[test]
    fn payload_without_kind_is_rejected() {
        assert!(Payload::parse(br#"{"amount":1.0}"#).is_err());
    }
}
