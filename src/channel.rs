// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of the AMQP connection and channel the
//! destinations share. The endpoint arrives as an opaque, already-formed URI;
//! assembling or storing credentials is out of scope here.

use crate::{config::Config, errors::RedriveError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Connection name reported to the broker
const CONNECTION_NAME: &str = "redrive";

/// Creates the AMQP connection and a channel on it, both wrapped in `Arc`
/// for sharing across destinations and workers.
///
/// A failure here is connection-level: unlike per-message errors, it is
/// allowed to terminate the process.
pub async fn new_amqp_channel(
    cfg: &Config,
) -> Result<(Arc<Connection>, Arc<Channel>), RedriveError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(CONNECTION_NAME));

    let conn = match Connection::connect(&cfg.endpoint, options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(RedriveError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(RedriveError::ChannelError)
        }
    }
}
