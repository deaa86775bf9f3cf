// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Request/reply correlation and topic-based dispatch for thing model device clients.
//!
//! A [`Client`] turns outbound thing model calls into correlated, awaitable exchanges over any
//! [`PubSub`](thing_model_transport::interface::PubSub) transport, and turns inbound topic
//! messages into typed events delivered to an [`EventCallback`].

#![warn(missing_docs)]

pub mod cache;
pub mod callback;
pub mod client;
pub mod device;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod options;
pub mod pool;
pub mod request_id;
pub mod uri;

pub use crate::callback::{EventCallback, NopCallback};
pub use crate::client::Client;
pub use crate::error::{CodeError, DmError, DmErrorKind};
pub use crate::options::{ClientOptions, ClientOptionsBuilder, TransportKind};

#[macro_use]
extern crate derive_builder;
