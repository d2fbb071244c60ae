// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Redrive Pipeline
//!
//! This module provides the error taxonomy for the whole pipeline: content
//! validation, lease handling, repair, atomic replay, and the AMQP transport.
//! Every per-message error is caught at the handler boundary; only the
//! connection-level variants are allowed to terminate a process.

use thiserror::Error;

/// Represents errors that can occur while draining, settling, repairing, or
/// replaying messages.
///
/// The variants double as the pipeline's failure taxonomy: `ValidationError`
/// drives dead-lettering, `TransientProcessingError` drives abandon/retry,
/// `RepairError` and `ReplayCommitError` drive quarantine, and
/// `LeaseExpiredError` is logged with no compensating action since the broker
/// already reclaimed the message.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RedriveError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the broker
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Invalid or incomplete configuration surface
    #[error("invalid configuration `{0}`")]
    ConfigError(String),

    /// Error publishing a message to the named destination
    #[error("failure to publish to `{0}`")]
    PublishError(String),

    /// Error receiving a batch from the named source
    #[error("failure to receive from `{0}`")]
    ReceiveError(String),

    /// The lock token is no longer valid: the lease expired or the message
    /// was already settled by a concurrent attempt
    #[error("message lease is no longer valid")]
    LeaseExpiredError,

    /// Message content is invalid; terminal for the message on the live side
    #[error("message content invalid: {0}")]
    ValidationError(String),

    /// Simulated or real transient fault; the message is released for
    /// redelivery
    #[error("transient processing failure")]
    TransientProcessingError,

    /// The dead-lettered payload is not safely reconstructible
    #[error("failure to repair payload: {0}")]
    RepairError(String),

    /// The replay publish could not commit; the message routes to quarantine
    #[error("replay could not commit: {0}")]
    ReplayCommitError(String),
}
