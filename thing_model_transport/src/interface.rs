// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Traits defining the functionality a device client requires from a transport.

use async_trait::async_trait;
use bytes::Bytes;

use crate::control_packet::{Message, QoS};
use crate::error::TransportError;

/// Publish, subscribe and unsubscribe functionality
///
/// The trait is object safe so that a client can hold any binding behind an `Arc<dyn PubSub>`
/// without knowing which concrete transport is underneath.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish `payload` on `topic`.
    ///
    /// Returns once the transport has accepted the message for delivery.
    async fn publish(&self, topic: String, qos: QoS, payload: Bytes) -> Result<(), TransportError>;

    /// Subscribe to a topic filter.
    ///
    /// Messages matching the filter are delivered through the transport's [`PubReceiver`].
    /// Transports without a downstream channel (e.g. plain HTTP) may accept this as a no-op.
    async fn subscribe(&self, topic_filter: String, qos: QoS) -> Result<(), TransportError>;

    /// Unsubscribe from one or more topic filters.
    async fn unsubscribe(&self, topic_filters: Vec<String>) -> Result<(), TransportError>;
}

/// Functionality for receiving inbound messages
#[async_trait]
pub trait PubReceiver: Send {
    /// Receives the next inbound message.
    ///
    /// Return None if there will be no more inbound messages.
    async fn recv(&mut self) -> Option<Message>;
}
