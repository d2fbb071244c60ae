// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Classifier
//!
//! This module provides the disposition decision for messages received from
//! a live destination. Classification is a pure function of body content and
//! delivery count: it never mutates or settles the message.

use crate::{
    errors::RedriveError,
    message::{Message, Payload},
};
use tracing::debug;

/// Dead-letter reason attached to messages with invalid content
pub const VALIDATION_ERROR_REASON: &str = "ValidationError";

/// Payload kind simulating a transient processing failure
pub const TRANSIENT_KIND: &str = "Retry";

/// Default number of delivery attempts the classifier budgets before
/// deferring to the broker's delivery-limit policy
pub const DEFAULT_RETRY_THRESHOLD: u32 = 3;

/// What to do with a leased message.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Acknowledge and remove from the source
    Complete,
    /// Release the lease for redelivery
    Retry,
    /// Move to the dead-letter sub-queue
    DeadLetter { reason: String, description: String },
}

/// Content-driven classifier for live-destination messages.
#[derive(Debug, Clone)]
pub struct Classifier {
    retry_threshold: u32,
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier::new(DEFAULT_RETRY_THRESHOLD)
    }
}

impl Classifier {
    pub fn new(retry_threshold: u32) -> Classifier {
        Classifier { retry_threshold }
    }

    /// Decides a disposition for the message.
    ///
    /// A parseable payload with a positive `amount` completes. An unparseable
    /// body or a missing/non-positive `amount` dead-letters with reason
    /// [`VALIDATION_ERROR_REASON`]. The transient kind retries both below and
    /// at the threshold: once the retry budget is spent the message is still
    /// released, and the broker's own maximum-delivery-count policy performs
    /// the move to the dead-letter sub-queue. Dead-lettering exhausted
    /// retries here would race that policy.
    pub fn classify(&self, message: &Message) -> Disposition {
        match self.validate(message) {
            Ok(()) => Disposition::Complete,
            Err(RedriveError::TransientProcessingError) => {
                if message.delivery_count >= self.retry_threshold {
                    debug!(
                        id = %message.id,
                        count = message.delivery_count,
                        "retry budget spent, deferring to the broker delivery limit"
                    );
                }
                Disposition::Retry
            }
            Err(err) => Disposition::DeadLetter {
                reason: VALIDATION_ERROR_REASON.to_owned(),
                description: err.to_string(),
            },
        }
    }

    fn validate(&self, message: &Message) -> Result<(), RedriveError> {
        let payload = Payload::parse(&message.body)
            .map_err(|err| RedriveError::ValidationError(format!("body is not valid json: {err}")))?;

        if payload.kind == TRANSIENT_KIND {
            return Err(RedriveError::TransientProcessingError);
        }

        match payload.amount {
            Some(amount) if amount > 0.0 => Ok(()),
            Some(amount) => Err(RedriveError::ValidationError(format!(
                "non-positive amount `{amount}`"
            ))),
            None => Err(RedriveError::ValidationError(
                "missing required field `amount`".to_owned(),
            )),
        }
    }
}
