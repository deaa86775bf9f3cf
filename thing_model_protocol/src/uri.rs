// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Construction and parsing of thing model topics.
//!
//! Topic patterns are written with `{name}` tokens. `{productKey}` and `{deviceName}` are filled
//! from the device identity; every other token is filled from the extra identifiers in the order
//! they appear.

use crate::error::{DmError, DmErrorKind};

/// Separator between topic levels
pub const SEPARATOR: char = '/';
/// Suffix appended to a request topic to form its reply topic
pub const REPLY_SUFFIX: &str = "_reply";
/// Single-level wildcard, usable as an identifier when building subscribe filters
pub const WILDCARD_ONE: &str = "+";

/// Prefix for system topics addressed to a device
pub const SYS_PREFIX: &str = "/sys/{productKey}/{deviceName}/";
/// Prefix for network time topics
pub const EXT_NTP_PREFIX: &str = "/ext/ntp/{productKey}/{deviceName}/";
/// Prefix for extended RRPC topics
pub const EXT_RRPC_PREFIX: &str = "/ext/rrpc/";

/// Property post
pub const THING_EVENT_PROPERTY_POST: &str = "thing/event/property/post";
/// Event post, one identifier: the event
pub const THING_EVENT_POST: &str = "thing/event/{identifier}/post";
/// Gateway batch property post
pub const THING_EVENT_PROPERTY_PACK_POST: &str = "thing/event/property/pack/post";
/// Device info update
pub const THING_DEVICEINFO_UPDATE: &str = "thing/deviceinfo/update";
/// Device info delete
pub const THING_DEVICEINFO_DELETE: &str = "thing/deviceinfo/delete";
/// TSL template retrieval
pub const THING_DSLTEMPLATE_GET: &str = "thing/dsltemplate/get";
/// Dynamic TSL retrieval
pub const THING_DYNAMICTSL_GET: &str = "thing/dynamicTsl/get";
/// Desired property get
pub const THING_PROPERTY_DESIRED_GET: &str = "thing/property/desired/get";
/// Desired property delete
pub const THING_PROPERTY_DESIRED_DELETE: &str = "thing/property/desired/delete";
/// Downstream property set
pub const THING_SERVICE_PROPERTY_SET: &str = "thing/service/property/set";
/// Downstream service invocation, one identifier: the service
pub const THING_SERVICE: &str = "thing/service/{identifier}";
/// Service identifier under which a property set arrives
pub const PROPERTY_SET_SERVICE: &str = "property/set";
/// RRPC request, one identifier: the message id
pub const RRPC_REQUEST: &str = "rrpc/request/{messageId}";
/// RRPC response, one identifier: the message id
pub const RRPC_RESPONSE: &str = "rrpc/response/{messageId}";
/// Network time request, under [`EXT_NTP_PREFIX`]
pub const NTP_REQUEST: &str = "request";
/// Network time response, under [`EXT_NTP_PREFIX`]
pub const NTP_RESPONSE: &str = "response";

/// Build a topic from `prefix` and `path`, filling tokens with the device identity and `extra`.
///
/// Returns an empty string when both `prefix` and `path` are empty. Tokens left without a
/// matching extra identifier are kept verbatim.
///
/// # Arguments
/// * `prefix` - Topic family prefix, e.g. [`SYS_PREFIX`]
/// * `path` - Path below the prefix, e.g. [`THING_EVENT_POST`]
/// * `product_key` - Fills `{productKey}`
/// * `device_name` - Fills `{deviceName}`
/// * `extra` - Fills the remaining tokens, in order
#[must_use]
pub fn build(
    prefix: &str,
    path: &str,
    product_key: &str,
    device_name: &str,
    extra: &[&str],
) -> String {
    if prefix.is_empty() && path.is_empty() {
        return String::new();
    }
    let pattern = format!("{prefix}{path}");
    let mut topic = String::with_capacity(pattern.len() + product_key.len() + device_name.len());
    let mut extra = extra.iter();
    let mut rest = pattern.as_str();

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        topic.push_str(&rest[..start]);
        let token = &rest[start..=start + len];
        match token {
            "{productKey}" => topic.push_str(product_key),
            "{deviceName}" => topic.push_str(device_name),
            _ => match extra.next() {
                Some(value) => topic.push_str(value),
                None => topic.push_str(token),
            },
        }
        rest = &rest[start + len + 1..];
    }
    topic.push_str(rest);
    topic
}

/// Build a system topic for the given device.
#[must_use]
pub fn sys_topic(path: &str, product_key: &str, device_name: &str, extra: &[&str]) -> String {
    build(SYS_PREFIX, path, product_key, device_name, extra)
}

/// Derive the reply topic of a request topic.
#[must_use]
pub fn reply_topic(request_topic: &str) -> String {
    format!("{request_topic}{REPLY_SUFFIX}")
}

/// Split a topic into its levels, dropping the empty level before a leading separator.
#[must_use]
pub fn split(topic: &str) -> Vec<&str> {
    topic
        .strip_prefix(SEPARATOR)
        .unwrap_or(topic)
        .split(SEPARATOR)
        .collect()
}

/// Extended RRPC topic wrapping `topic` for the RRPC message `message_id`.
#[must_use]
pub fn ext_rrpc(message_id: &str, topic: &str) -> String {
    format!("{EXT_RRPC_PREFIX}{message_id}/{topic}")
}

/// Extended RRPC filter matching `topic` for any message id.
#[must_use]
pub fn ext_rrpc_wildcard_one(topic: &str) -> String {
    ext_rrpc(WILDCARD_ONE, topic)
}

/// Levels of an inbound topic, read relative to a service offset.
///
/// The offset is the number of levels preceding the topic family marker (`sys`, `ext`), so the
/// same accessors work for self-addressed topics and for topics carrying an extra routing prefix.
#[derive(Debug)]
pub struct TopicLevels<'a> {
    levels: Vec<&'a str>,
    offset: usize,
}

impl<'a> TopicLevels<'a> {
    /// Split `topic`, requiring at least `offset + min_levels` levels.
    ///
    /// # Arguments
    /// * `topic` - Inbound topic name
    /// * `offset` - Levels preceding the topic family marker
    /// * `min_levels` - Levels the caller reads, counted from the offset
    ///
    /// # Errors
    /// [`DmError`] of kind [`InvalidUri`](DmErrorKind::InvalidUri) if the topic is too short
    pub fn parse(topic: &'a str, offset: usize, min_levels: usize) -> Result<Self, DmError> {
        let levels = split(topic);
        if levels.len() < offset + min_levels {
            return Err(DmErrorKind::InvalidUri(topic.to_string()).into());
        }
        Ok(Self { levels, offset })
    }

    /// Level `n` counted from the offset. Empty if out of range.
    #[must_use]
    pub fn level(&self, n: usize) -> &'a str {
        self.levels.get(self.offset + n).copied().unwrap_or_default()
    }

    /// Product key of a system topic
    #[must_use]
    pub fn product_key(&self) -> &'a str {
        self.level(1)
    }

    /// Device name of a system topic
    #[must_use]
    pub fn device_name(&self) -> &'a str {
        self.level(2)
    }

    /// Number of levels in the topic
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Returns true if the topic had no levels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
