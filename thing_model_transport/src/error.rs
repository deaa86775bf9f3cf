// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Common error types

use thiserror::Error;

use crate::topic::TopicParseError;

/// Error executing a publish, subscribe or unsubscribe on a transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transport is detached from its connection. Cannot send requests.
    #[error("transport is detached from its connection")]
    Detached,
    /// Invalid topic name provided
    #[error("invalid topic name: {0}")]
    InvalidTopicName(TopicParseError),
    /// Invalid topic filter provided
    #[error("invalid topic filter: {0}")]
    InvalidTopicFilter(TopicParseError),
    /// The remote end or the underlying client rejected the operation
    #[error("operation rejected: {0}")]
    Rejected(String),
}
