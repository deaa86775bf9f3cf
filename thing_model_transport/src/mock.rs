// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! In-memory mocks for the traits defined in the interface module.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{error::SendError, unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::control_packet::{Message, QoS};
use crate::error::TransportError;
use crate::interface::{PubReceiver, PubSub};
use crate::topic::{TopicFilter, TopicName};

/// An operation performed on a [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// A publish
    Publish {
        /// Topic name published to
        topic: String,
        /// Quality of Service requested
        qos: QoS,
        /// Body published
        payload: Bytes,
    },
    /// A subscribe
    Subscribe {
        /// Topic filter subscribed to
        topic_filter: String,
        /// Quality of Service requested
        qos: QoS,
    },
    /// An unsubscribe
    Unsubscribe {
        /// Topic filters unsubscribed from
        topic_filters: Vec<String>,
    },
}

#[derive(Default)]
struct MockState {
    operations: Vec<Operation>,
    fail_next: Option<String>,
}

/// Mock implementation of a transport.
///
/// Records every operation in the order it was performed, across all clones.
/// Topic names and filters are validated the same way a real binding would.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Return a new mocked transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next operation to fail with [`TransportError::Rejected`] carrying `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.lock().fail_next = Some(reason.into());
    }

    /// All operations performed so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    /// All publishes performed so far, in order, as `(topic, payload)` pairs.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.lock()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Publish { topic, payload, .. } => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// All topic filters subscribed to so far, in order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Subscribe { topic_filter, .. } => Some(topic_filter.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget every recorded operation.
    pub fn clear(&self) {
        self.lock().operations.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panic while holding the lock only happens inside a failing test
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, operation: Operation) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(reason) = state.fail_next.take() {
            log::debug!("[mock] rejecting {operation:?}: {reason}");
            return Err(TransportError::Rejected(reason));
        }
        log::trace!("[mock] {operation:?}");
        state.operations.push(operation);
        Ok(())
    }
}

#[async_trait]
impl PubSub for MockTransport {
    async fn publish(&self, topic: String, qos: QoS, payload: Bytes) -> Result<(), TransportError> {
        TopicName::from_str(&topic).map_err(TransportError::InvalidTopicName)?;
        self.record(Operation::Publish {
            topic,
            qos,
            payload,
        })
    }

    async fn subscribe(&self, topic_filter: String, qos: QoS) -> Result<(), TransportError> {
        TopicFilter::from_str(&topic_filter).map_err(TransportError::InvalidTopicFilter)?;
        self.record(Operation::Subscribe { topic_filter, qos })
    }

    async fn unsubscribe(&self, topic_filters: Vec<String>) -> Result<(), TransportError> {
        for topic_filter in &topic_filters {
            TopicFilter::from_str(topic_filter).map_err(TransportError::InvalidTopicFilter)?;
        }
        self.record(Operation::Unsubscribe { topic_filters })
    }
}

/// Mock implementation of an inbound message stream
pub struct MockReceiver {
    rx: UnboundedReceiver<Message>,
}

impl MockReceiver {
    /// Return a new mocked receiver along with a message injector.
    #[must_use]
    pub fn new() -> (Self, MessageInjector) {
        let (tx, rx) = unbounded_channel();
        (Self { rx }, MessageInjector { tx })
    }
}

#[async_trait]
impl PubReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Used to inject messages into the [`MockReceiver`].
#[derive(Clone)]
pub struct MessageInjector {
    tx: UnboundedSender<Message>,
}

impl MessageInjector {
    /// Inject a message into the [`MockReceiver`].
    ///
    /// # Errors
    /// Returns a [`SendError`] if the message could not be injected
    /// (i.e. the receiver has been dropped).
    pub fn inject(&self, message: Message) -> Result<(), SendError<Message>> {
        self.tx.send(message)
    }

    /// Inject a message built from a topic and payload, delivered at [`QoS::AtLeastOnce`].
    ///
    /// # Errors
    /// Returns a [`SendError`] if the message could not be injected
    pub fn inject_publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), SendError<Message>> {
        self.inject(Message::new(topic, QoS::AtLeastOnce, payload))
    }
}
