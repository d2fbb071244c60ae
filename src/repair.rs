// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Repair Engine
//!
//! This module provides the deterministic, side-effect-free transform applied
//! to dead-lettered messages before replay: parse the body, keep the
//! classification tag and every recoverable field, substitute the documented
//! default for a missing or invalid required field, and stamp the result with
//! a repair marker and a UTC repair timestamp.
//!
//! Repair never panics past this boundary; a payload that cannot be parsed,
//! or that lacks its classification tag, is not safely reconstructible and is
//! reported as a `RepairError` so it flows to quarantine instead of being
//! guessed at.

use crate::{
    errors::RedriveError,
    message::{Message, Payload, PropertyValue},
};
use chrono::Utc;
use std::collections::HashMap;

/// Application property marking a replayed message as repaired
pub const REPAIR_MARKER_PROPERTY: &str = "isRepaired";
/// Application property carrying the UTC repair timestamp
pub const REPAIR_TIMESTAMP_PROPERTY: &str = "repairedAt";

/// Placeholder substituted for a missing or non-positive `amount`
pub const DEFAULT_AMOUNT: f64 = 9.99;

/// A corrected payload plus the properties the repair stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairedMessage {
    pub body: Vec<u8>,
    pub properties: HashMap<String, PropertyValue>,
}

/// Attempts to produce a corrected payload for a dead-lettered message.
///
/// Idempotent up to the timestamp: repairing an already-repaired payload
/// leaves every field untouched and only re-stamps `repairedAt`.
pub fn repair(message: &Message) -> Result<RepairedMessage, RedriveError> {
    let mut payload = Payload::parse(&message.body)
        .map_err(|err| RedriveError::RepairError(err.to_string()))?;

    match payload.amount {
        Some(amount) if amount > 0.0 => {}
        _ => payload.amount = Some(DEFAULT_AMOUNT),
    }

    let body = payload
        .to_bytes()
        .map_err(|err| RedriveError::RepairError(err.to_string()))?;

    let mut properties = HashMap::default();
    properties.insert(
        REPAIR_MARKER_PROPERTY.to_owned(),
        PropertyValue::Bool(true),
    );
    properties.insert(
        REPAIR_TIMESTAMP_PROPERTY.to_owned(),
        PropertyValue::String(Utc::now().to_rfc3339()),
    );

    Ok(RepairedMessage { body, properties })
}
