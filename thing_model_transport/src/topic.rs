// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Topic names, topic filters and wildcard matching.
//!
//! Zero-length levels are legal in both, so `/sys/pk/dn` has an empty first level.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Topic level separator
pub const LEVEL_SEPARATOR: char = '/';
/// Multi-level wildcard
pub const MULTI_LEVEL_WILDCARD: &str = "#";
/// Single-level wildcard
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Reasons a string is rejected as a topic name or topic filter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopicParseError {
    /// Nothing to parse
    #[error("topic is empty")]
    Empty,
    /// A topic name used `+` or `#`
    #[error("topic name {0:?} contains a wildcard")]
    WildcardInTopicName(String),
    /// A filter level mixed a wildcard with other characters
    #[error("topic filter {0:?} has a wildcard sharing a level")]
    WildcardNotAlone(String),
    /// A filter had levels after `#`
    #[error("topic filter {0:?} continues after a multi-level wildcard")]
    WildcardNotLast(String),
}

/// Concrete topic a message is published on. Never contains wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    topic_name: String,
}

impl TopicName {
    /// The topic as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.topic_name
    }

    /// Iterate over the levels of the topic name, including zero-length levels
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.topic_name.split(LEVEL_SEPARATOR)
    }

    /// Whether a subscription to `topic_filter` receives this topic
    ///
    /// # Arguments
    /// * `topic_filter` - The subscription pattern to match against
    #[must_use]
    pub fn matches_topic_filter(&self, topic_filter: &TopicFilter) -> bool {
        topic_matches(self, topic_filter)
    }

    /// Whether `topic_name` would parse
    #[must_use]
    pub fn is_valid_topic_name(topic_name: &str) -> bool {
        check_topic_name(topic_name).is_ok()
    }
}

fn check_topic_name(topic_name: &str) -> Result<(), TopicParseError> {
    if topic_name.is_empty() {
        return Err(TopicParseError::Empty);
    }
    // adjacent separators are a zero-length level, which extended RRPC topics use
    match topic_name.find(['#', '+']) {
        Some(_) => Err(TopicParseError::WildcardInTopicName(topic_name.to_string())),
        None => Ok(()),
    }
}

impl FromStr for TopicName {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_topic_name(s)?;
        Ok(Self {
            topic_name: s.to_owned(),
        })
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic_name)
    }
}

/// Subscription pattern, possibly with `+` (one level) and `#` (any remaining levels)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    topic_filter: String,
    levels: Vec<String>,
}

impl TopicFilter {
    /// The filter as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.topic_filter
    }

    /// Whether `topic_name` is delivered to a subscription on this filter
    ///
    /// # Arguments
    /// * `topic_name` - The concrete topic to test
    #[must_use]
    pub fn matches_topic_name(&self, topic_name: &TopicName) -> bool {
        topic_matches(topic_name, self)
    }

    /// Whether `topic_filter` would parse
    #[must_use]
    pub fn is_valid_topic_filter(topic_filter: &str) -> bool {
        check_topic_filter(topic_filter).is_ok()
    }
}

fn check_topic_filter(topic_filter: &str) -> Result<(), TopicParseError> {
    if topic_filter.is_empty() {
        return Err(TopicParseError::Empty);
    }
    let mut levels = topic_filter.split(LEVEL_SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        let has_wildcard = level.contains(['#', '+']);
        if has_wildcard && level.len() > 1 {
            return Err(TopicParseError::WildcardNotAlone(topic_filter.to_owned()));
        }
        if level == MULTI_LEVEL_WILDCARD && levels.peek().is_some() {
            return Err(TopicParseError::WildcardNotLast(topic_filter.to_owned()));
        }
    }
    Ok(())
}

impl FromStr for TopicFilter {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_topic_filter(s)?;
        Ok(Self {
            levels: s.split(LEVEL_SEPARATOR).map(str::to_owned).collect(),
            topic_filter: s.to_owned(),
        })
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic_filter)
    }
}

/// Level-by-level match of `topic_name` against `topic_filter`.
///
/// `a/#` matches `a` itself as well as everything below it.
#[must_use]
pub fn topic_matches(topic_name: &TopicName, topic_filter: &TopicFilter) -> bool {
    let mut name_levels = topic_name.levels();
    for filter_level in &topic_filter.levels {
        if filter_level == MULTI_LEVEL_WILDCARD {
            return true;
        }
        match name_levels.next() {
            Some(_) if filter_level == SINGLE_LEVEL_WILDCARD => {}
            Some(name_level) if name_level == filter_level => {}
            _ => return false,
        }
    }
    name_levels.next().is_none()
}
