// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Topic-based publish/subscribe transport abstraction for thing model device clients.
//!
//! The traits in [`interface`] are the only surface a device client needs from an underlying
//! transport (message broker, constrained-application protocol or plain HTTP). Concrete
//! bindings implement them; [`mock`] provides an in-memory implementation for tests.

pub use crate::control_packet::{Message, QoS};

pub mod control_packet;
pub mod error;
pub mod interface;
pub mod mock;
pub mod topic;
