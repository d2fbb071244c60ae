// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Drain and Processor Loops
//!
//! This module provides the two control shells that feed messages into the
//! pipeline: a pull/drain loop that terminates when its source runs dry, and
//! a push-style processor that runs until externally stopped. Both are thin
//! wrappers over one bounded worker pool, and neither lets a single message's
//! failure abort the loop — a handler error is logged and the lease is left
//! to expire for natural redelivery.

use crate::{destination::Destination, errors::RedriveError, message::Message};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info};

/// Per-message processing logic plugged into a loop.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), RedriveError>;
}

/// Batch and concurrency limits for one source.
#[derive(Debug, Clone)]
pub struct DrainOptions {
    /// Upper bound on messages requested per batch
    pub prefetch: usize,
    /// Upper bound on concurrently in-flight messages
    pub max_concurrent: usize,
    /// Upper bound on the wait for a batch
    pub max_wait: Duration,
}

impl Default for DrainOptions {
    fn default() -> Self {
        DrainOptions {
            prefetch: 10,
            max_concurrent: 4,
            max_wait: Duration::from_secs(2),
        }
    }
}

/// Bounded worker pool shared by both loop shapes.
///
/// Messages from one batch run in parallel with no ordering guarantee;
/// each batch is joined before the next receive, which is also what makes
/// the processor's stop a graceful drain.
struct WorkerPool {
    handler: Arc<dyn MessageHandler>,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    fn new(handler: Arc<dyn MessageHandler>, max_concurrent: usize) -> WorkerPool {
        WorkerPool {
            handler,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    async fn dispatch(&self, batch: Vec<Message>) -> usize {
        let mut workers = Vec::with_capacity(batch.len());

        for message in batch {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };
            let handler = self.handler.clone();

            workers.push(tokio::spawn(async move {
                let id = message.id.clone();
                if let Err(err) = handler.handle(message).await {
                    error!(
                        id = %id,
                        error = %err,
                        "message handling failed, lease left to expire"
                    );
                }
                drop(permit);
            }));
        }

        let dispatched = workers.len();
        for joined in join_all(workers).await {
            if joined.is_err() {
                error!("worker task panicked");
            }
        }

        dispatched
    }
}

/// Pull-style loop: repeatedly requests bounded batches and terminates the
/// pass when an empty batch comes back.
pub struct DrainLoop {
    source: Arc<dyn Destination>,
    pool: WorkerPool,
    options: DrainOptions,
}

impl DrainLoop {
    pub fn new(
        source: Arc<dyn Destination>,
        handler: Arc<dyn MessageHandler>,
        options: DrainOptions,
    ) -> DrainLoop {
        let pool = WorkerPool::new(handler, options.max_concurrent);
        DrainLoop {
            source,
            pool,
            options,
        }
    }

    /// Drains the source until it reports an empty batch; returns the number
    /// of messages handed to the pool.
    ///
    /// Only a receive failure — a connection-level fault — escapes the loop.
    pub async fn drain(&self) -> Result<usize, RedriveError> {
        let mut processed = 0;

        loop {
            let batch = self
                .source
                .receive_batch(self.options.prefetch, self.options.max_wait)
                .await?;

            if batch.is_empty() {
                break;
            }

            processed += self.pool.dispatch(batch).await;
        }

        debug!(processed, "drain pass complete");
        Ok(processed)
    }
}

/// Stops a running [`Processor`], letting in-flight messages finish.
pub struct StopHandle {
    stop: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Push-style loop: keeps receiving until stopped through its
/// [`StopHandle`]. New batches stop being accepted on the stop signal while
/// the current batch drains.
pub struct Processor {
    source: Arc<dyn Destination>,
    pool: WorkerPool,
    options: DrainOptions,
    stopped: watch::Receiver<bool>,
}

impl Processor {
    pub fn new(
        source: Arc<dyn Destination>,
        handler: Arc<dyn MessageHandler>,
        options: DrainOptions,
    ) -> (Processor, StopHandle) {
        let (stop, stopped) = watch::channel(false);
        let pool = WorkerPool::new(handler, options.max_concurrent);

        (
            Processor {
                source,
                pool,
                options,
                stopped,
            },
            StopHandle { stop },
        )
    }

    /// Runs until stopped. Empty batches are tolerated; only a receive
    /// failure escapes.
    pub async fn run(mut self) -> Result<(), RedriveError> {
        loop {
            if *self.stopped.borrow() {
                break;
            }

            tokio::select! {
                changed = self.stopped.changed() => {
                    if changed.is_err() || *self.stopped.borrow_and_update() {
                        break;
                    }
                }
                received = self.source.receive_batch(self.options.prefetch, self.options.max_wait) => {
                    let batch = received?;
                    if !batch.is_empty() {
                        self.pool.dispatch(batch).await;
                    }
                }
            }
        }

        info!("processor stopped, in-flight messages settled");
        Ok(())
    }
}
