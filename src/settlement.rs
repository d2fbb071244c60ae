// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Settlement Dispatcher
//!
//! This module executes a classification decision against the leased message:
//! acknowledge, release for redelivery, or move to the dead-letter sub-queue.
//! A stale lock token surfaces as `LeaseExpiredError`; the caller logs it and
//! continues the batch, because the broker redelivers on its own schedule.

use crate::{
    classifier::Disposition,
    destination::Destination,
    errors::RedriveError,
    message::Message,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// How a message left its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Completed,
    Abandoned,
    DeadLettered,
}

/// Executes dispositions against a shared source destination, keyed by each
/// message's own lock token.
pub struct SettlementDispatcher {
    source: Arc<dyn Destination>,
}

impl SettlementDispatcher {
    pub fn new(source: Arc<dyn Destination>) -> SettlementDispatcher {
        SettlementDispatcher { source }
    }

    /// Settles the message according to the disposition.
    ///
    /// `Complete` guarantees no redelivery; `Retry` releases the lease so the
    /// broker redelivers with an incremented delivery count; `DeadLetter`
    /// moves the message to the dead-letter sub-queue with the supplied
    /// reason/description pair.
    pub async fn settle(
        &self,
        message: &Message,
        disposition: Disposition,
    ) -> Result<SettlementOutcome, RedriveError> {
        match disposition {
            Disposition::Complete => {
                self.source.complete(message.lock_token).await?;
                debug!(id = %message.id, "message completed");
                Ok(SettlementOutcome::Completed)
            }
            Disposition::Retry => {
                warn!(
                    id = %message.id,
                    count = message.delivery_count,
                    cause = %RedriveError::TransientProcessingError,
                    "releasing message for redelivery"
                );
                self.source.abandon(message.lock_token).await?;
                Ok(SettlementOutcome::Abandoned)
            }
            Disposition::DeadLetter { reason, description } => {
                warn!(id = %message.id, reason = %reason, "dead-lettering message");
                self.source
                    .dead_letter(message.lock_token, reason, description)
                    .await?;
                Ok(SettlementOutcome::DeadLettered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MockDestination;
    use crate::message::LockToken;
    use mockall::predicate::eq;
    use std::collections::HashMap;

    fn message() -> Message {
        Message {
            id: "settle-001".to_owned(),
            correlation_id: None,
            body: b"{}".to_vec(),
            properties: HashMap::default(),
            delivery_count: 1,
            dead_letter_reason: None,
            dead_letter_description: None,
            lock_token: LockToken::new(7),
        }
    }

    #[tokio::test]
    async fn complete_acknowledges_the_message() {
        let mut source = MockDestination::new();
        source
            .expect_complete()
            .with(eq(LockToken::new(7)))
            .times(1)
            .returning(|_| Ok(()));

        let dispatcher = SettlementDispatcher::new(Arc::new(source));
        let outcome = dispatcher
            .settle(&message(), Disposition::Complete)
            .await
            .unwrap();

        assert_eq!(outcome, SettlementOutcome::Completed);
    }

    #[tokio::test]
    async fn retry_releases_the_lease() {
        let mut source = MockDestination::new();
        source
            .expect_abandon()
            .with(eq(LockToken::new(7)))
            .times(1)
            .returning(|_| Ok(()));

        let dispatcher = SettlementDispatcher::new(Arc::new(source));
        let outcome = dispatcher
            .settle(&message(), Disposition::Retry)
            .await
            .unwrap();

        assert_eq!(outcome, SettlementOutcome::Abandoned);
    }

    #[tokio::test]
    async fn dead_letter_forwards_reason_and_description() {
        let mut source = MockDestination::new();
        source
            .expect_dead_letter()
            .withf(|token, reason, description| {
                *token == LockToken::new(7)
                    && reason.as_str() == "ValidationError"
                    && description.contains("amount")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let dispatcher = SettlementDispatcher::new(Arc::new(source));
        let disposition = Disposition::DeadLetter {
            reason: "ValidationError".to_owned(),
            description: "missing required field `amount`".to_owned(),
        };
        let outcome = dispatcher.settle(&message(), disposition).await.unwrap();

        assert_eq!(outcome, SettlementOutcome::DeadLettered);
    }

    #[tokio::test]
    async fn stale_lease_is_reported_not_swallowed() {
        let mut source = MockDestination::new();
        source
            .expect_complete()
            .returning(|_| Err(RedriveError::LeaseExpiredError));

        let dispatcher = SettlementDispatcher::new(Arc::new(source));
        let result = dispatcher.settle(&message(), Disposition::Complete).await;

        assert_eq!(result, Err(RedriveError::LeaseExpiredError));
    }
}
