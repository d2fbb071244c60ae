// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Destination Contract
//!
//! This module provides the collaborator trait the pipeline core is written
//! against: a logical queue or topic+subscription exposing publish, bounded
//! batch receive, and the three settlement primitives keyed by a message's
//! lock token. The AMQP binding implements it for RabbitMQ; tests implement
//! it in memory.

use crate::{
    errors::RedriveError,
    message::{LockToken, Message, OutgoingMessage},
};
use async_trait::async_trait;
use std::time::Duration;

/// Suffix of the dead-letter sub-queue associated with a live destination
pub const DEAD_LETTER_SUFFIX: &str = "-dlq";

/// Name of the dead-letter sub-queue associated with the given source.
pub fn dead_letter_name(source: &str) -> String {
    format!("{source}{DEAD_LETTER_SUFFIX}")
}

/// A logical send/receive/settle target: a queue, or a topic+subscription
/// pair, or the dead-letter view of either.
///
/// Implementations are internally synchronized: one handle is shared across
/// concurrent workers, and settlement calls are keyed by each message's own
/// lock token so no two workers ever contend over the same lease.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Destination: Send + Sync {
    /// Publishes a message to the destination.
    ///
    /// Fails with `PublishError` on transport or broker rejection.
    async fn send(&self, message: OutgoingMessage) -> Result<(), RedriveError>;

    /// Receives up to `max_count` leased messages, waiting at most
    /// `max_wait`.
    ///
    /// Returns fewer than `max_count` (including zero) when no more messages
    /// are immediately available; never blocks past `max_wait`.
    async fn receive_batch(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Message>, RedriveError>;

    /// Acknowledges removal of the leased message from the source; the
    /// message will not be redelivered.
    async fn complete(&self, token: LockToken) -> Result<(), RedriveError>;

    /// Releases the lease without acknowledgment; the message becomes
    /// eligible for immediate redelivery with an incremented delivery count.
    async fn abandon(&self, token: LockToken) -> Result<(), RedriveError>;

    /// Moves the leased message to the source's dead-letter sub-queue with
    /// the supplied reason/description pair; it will not be redelivered on
    /// the live destination.
    async fn dead_letter(
        &self,
        token: LockToken,
        reason: String,
        description: String,
    ) -> Result<(), RedriveError>;
}
