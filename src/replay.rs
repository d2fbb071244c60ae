// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Atomic Replay Coordinator
//!
//! This module performs the two-phase "publish repaired message to the live
//! destination, then complete the dead-letter entry" operation, with the
//! quarantine sink as the escape path when repair or the commit fails.
//!
//! The broker offers no cross-queue transaction, so the coordinator runs the
//! documented compensation protocol instead: the publish is tagged with a
//! deterministic replay token derived from the original message id, the
//! dead-letter entry is completed only after the publish lands, and a
//! redelivered entry republishes under the same token — the acknowledge step
//! is the only step that is ever retried, never a second distinct publish.

use crate::{
    destination::Destination,
    errors::RedriveError,
    message::{
        Message, OutgoingMessage, PropertyValue, DEAD_LETTER_REASON_PROPERTY,
    },
    repair::repair,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Application property tagging a quarantined message with the id of the
/// dead-lettered original
pub const ORIGINAL_MESSAGE_ID_PROPERTY: &str = "originalMessageId";
/// Application property carrying the repair/replay error that sent a message
/// to quarantine
pub const REPLAY_ERROR_PROPERTY: &str = "replayError";
/// Application property carrying the idempotency key of a replay publish
pub const REPLAY_TOKEN_PROPERTY: &str = "replayToken";

/// Terminal outcome for a dead-lettered message: exactly one of these holds,
/// and the message is absent from the dead-letter sub-queue afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Repaired and re-published to the live destination
    Replayed,
    /// Forwarded, unrepaired, to the quarantine destination
    Quarantined,
}

/// Coordinates repair, replay publish, dead-letter completion, and the
/// quarantine fallback across three shared destinations.
pub struct ReplayCoordinator {
    live: Arc<dyn Destination>,
    dead_letter: Arc<dyn Destination>,
    quarantine: Arc<dyn Destination>,
}

impl ReplayCoordinator {
    pub fn new(
        live: Arc<dyn Destination>,
        dead_letter: Arc<dyn Destination>,
        quarantine: Arc<dyn Destination>,
    ) -> ReplayCoordinator {
        ReplayCoordinator {
            live,
            dead_letter,
            quarantine,
        }
    }

    /// Repairs and replays a dead-lettered message, or routes it to
    /// quarantine.
    ///
    /// A quarantine-publish failure is the one case that returns an error:
    /// the dead-letter entry is left unsettled so its lease expires and the
    /// entry is redelivered for another pass.
    pub async fn replay(&self, message: &Message) -> Result<ReplayOutcome, RedriveError> {
        let repaired = match repair(message) {
            Ok(repaired) => repaired,
            Err(err) => {
                warn!(id = %message.id, error = %err, "payload is not reconstructible");
                return self.quarantine(message, &err).await;
            }
        };

        let outgoing = OutgoingMessage::new(&message.id, repaired.body)
            .with_correlation_id(message.correlation_id.clone())
            .with_properties(&message.properties)
            .with_properties(&repaired.properties)
            .with_property(
                REPLAY_TOKEN_PROPERTY,
                PropertyValue::String(replay_token(&message.id)),
            );

        if let Err(err) = self.live.send(outgoing).await {
            let commit_err = RedriveError::ReplayCommitError(err.to_string());
            error!(id = %message.id, error = %commit_err, "replay publish rejected");
            return self.quarantine(message, &commit_err).await;
        }

        match self.dead_letter.complete(message.lock_token).await {
            Ok(()) => {
                info!(id = %message.id, "message repaired and replayed");
                Ok(ReplayOutcome::Replayed)
            }
            Err(err) => {
                // The publish is durable. The redelivered entry republishes
                // under the same replay token, so only the acknowledge step
                // repeats.
                warn!(
                    id = %message.id,
                    error = %err,
                    "replayed but the dead-letter entry could not be settled"
                );
                Ok(ReplayOutcome::Replayed)
            }
        }
    }

    /// Forwards the original, unrepaired body to the quarantine destination,
    /// then completes the dead-letter entry.
    async fn quarantine(
        &self,
        message: &Message,
        cause: &RedriveError,
    ) -> Result<ReplayOutcome, RedriveError> {
        let outgoing = OutgoingMessage::new(
            &Uuid::new_v4().to_string(),
            message.body.clone(),
        )
        .with_correlation_id(message.correlation_id.clone())
        .with_properties(&message.properties)
        .with_property(
            ORIGINAL_MESSAGE_ID_PROPERTY,
            PropertyValue::String(message.id.clone()),
        )
        .with_property(
            DEAD_LETTER_REASON_PROPERTY,
            PropertyValue::String(message.dead_letter_reason.clone().unwrap_or_default()),
        )
        .with_property(
            REPLAY_ERROR_PROPERTY,
            PropertyValue::String(cause.to_string()),
        )
        .with_property(
            REPLAY_TOKEN_PROPERTY,
            PropertyValue::String(replay_token(&message.id)),
        );

        if let Err(err) = self.quarantine.send(outgoing).await {
            error!(
                id = %message.id,
                count = message.delivery_count,
                error = %err,
                "quarantine publish failed, lease left to expire for redelivery"
            );
            return Err(err);
        }

        if let Err(err) = self.dead_letter.complete(message.lock_token).await {
            warn!(
                id = %message.id,
                error = %err,
                "quarantined but the dead-letter entry could not be settled"
            );
        }

        info!(id = %message.id, reason = %cause, "message quarantined");
        Ok(ReplayOutcome::Quarantined)
    }
}

/// Deterministic idempotency key for every publish attempt of the same
/// dead-lettered message.
fn replay_token(message_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, message_id.as_bytes()).to_string()
}
