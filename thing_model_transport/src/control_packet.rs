// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Structures representing the messages exchanged with a transport.

use bytes::Bytes;

/// Quality of Service
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// Fire and forget
    AtMostOnce = 0,
    /// Acknowledged delivery, possibly duplicated
    #[default]
    AtLeastOnce = 1,
    /// Assured single delivery
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(other),
        }
    }
}

/// An inbound message delivered by a transport
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Topic name the message was published on
    pub topic: String,
    /// Quality of Service the message was delivered with
    pub qos: QoS,
    /// Raw message body
    pub payload: Bytes,
}

impl Message {
    /// Create a new [`Message`]
    ///
    /// # Arguments
    /// * `topic` - Topic name the message was published on
    /// * `qos` - Quality of Service it was delivered with
    /// * `payload` - Message body
    pub fn new(topic: impl Into<String>, qos: QoS, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            payload: payload.into(),
        }
    }
}
