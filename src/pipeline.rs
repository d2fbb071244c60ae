// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Pipeline Assembly
//!
//! This module wires the components into the two per-message handlers — the
//! live path (classify, then settle) and the redrive path (repair, then
//! atomically replay or quarantine) — and into a [`Pipeline`] owning one
//! drain loop per source.

use crate::{
    classifier::Classifier,
    config::Config,
    destination::Destination,
    drain::{DrainLoop, DrainOptions, MessageHandler},
    errors::RedriveError,
    message::Message,
    replay::ReplayCoordinator,
    settlement::SettlementDispatcher,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Classify → settle, applied to every live-destination message.
pub struct LiveHandler {
    classifier: Classifier,
    dispatcher: SettlementDispatcher,
}

impl LiveHandler {
    pub fn new(classifier: Classifier, dispatcher: SettlementDispatcher) -> LiveHandler {
        LiveHandler {
            classifier,
            dispatcher,
        }
    }
}

#[async_trait]
impl MessageHandler for LiveHandler {
    async fn handle(&self, message: Message) -> Result<(), RedriveError> {
        let disposition = self.classifier.classify(&message);
        debug!(id = %message.id, ?disposition, "message classified");

        self.dispatcher.settle(&message, disposition).await?;
        Ok(())
    }
}

/// Repair → replay-or-quarantine, applied to every dead-letter-sourced
/// message.
pub struct RedriveHandler {
    coordinator: ReplayCoordinator,
}

impl RedriveHandler {
    pub fn new(coordinator: ReplayCoordinator) -> RedriveHandler {
        RedriveHandler { coordinator }
    }
}

#[async_trait]
impl MessageHandler for RedriveHandler {
    async fn handle(&self, message: Message) -> Result<(), RedriveError> {
        let outcome = self.coordinator.replay(&message).await?;
        debug!(id = %message.id, ?outcome, "dead-lettered message settled");
        Ok(())
    }
}

/// Counts from one full pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassSummary {
    /// Messages pulled from the live destination
    pub live_processed: usize,
    /// Messages pulled from the dead-letter sub-queue
    pub redriven: usize,
}

/// The whole pipeline: a live drain loop feeding the classifier/dispatcher
/// and a dead-letter drain loop feeding the repair/replay coordinator.
pub struct Pipeline {
    live_loop: DrainLoop,
    redrive_loop: DrainLoop,
}

impl Pipeline {
    pub fn new(
        cfg: &Config,
        live: Arc<dyn Destination>,
        dead_letter: Arc<dyn Destination>,
        quarantine: Arc<dyn Destination>,
    ) -> Pipeline {
        let options = DrainOptions::from(cfg);

        let live_handler = Arc::new(LiveHandler::new(
            Classifier::new(cfg.retry_threshold),
            SettlementDispatcher::new(live.clone()),
        ));
        let redrive_handler = Arc::new(RedriveHandler::new(ReplayCoordinator::new(
            live.clone(),
            dead_letter.clone(),
            quarantine,
        )));

        Pipeline {
            live_loop: DrainLoop::new(live, live_handler, options.clone()),
            redrive_loop: DrainLoop::new(dead_letter, redrive_handler, options),
        }
    }

    /// Drains the live destination, then the dead-letter sub-queue, once.
    pub async fn run_once(&self) -> Result<PassSummary, RedriveError> {
        let live_processed = self.live_loop.drain().await?;
        let redriven = self.redrive_loop.drain().await?;

        Ok(PassSummary {
            live_processed,
            redriven,
        })
    }

    /// Drains only the dead-letter sub-queue, for repair-and-replay passes
    /// scheduled independently of live consumption.
    pub async fn redrive_once(&self) -> Result<usize, RedriveError> {
        self.redrive_loop.drain().await
    }
}
