// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Configuration for a thing model [`Client`](crate::Client).

use std::env::{self, VarError};
use std::str::FromStr;
use std::time::Duration;

use thing_model_transport::QoS;

/// Kind of transport a client runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Message broker
    #[default]
    Mqtt,
    /// Constrained application protocol
    Coap,
    /// Plain HTTP, fire and forget. Requests are never correlated.
    Http,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mqtt" => Ok(TransportKind::Mqtt),
            "coap" => Ok(TransportKind::Coap),
            "http" => Ok(TransportKind::Http),
            other => Err(format!("unknown transport kind: {other}")),
        }
    }
}

/// Options for a [`Client`](crate::Client)
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct ClientOptions {
    /// Transport the client runs over
    #[builder(default)]
    pub(crate) transport_kind: TransportKind,
    /// Track pending requests so they can be awaited and time out
    #[builder(default = "true")]
    pub(crate) enable_cache: bool,
    /// Time-to-live of a pending request
    #[builder(default = "Duration::from_secs(10)")]
    pub(crate) cache_expiration: Duration,
    /// Interval between sweeps for expired requests
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) cache_cleanup_interval: Duration,
    /// Wait timeout used when a caller does not supply one
    #[builder(default = "Duration::from_secs(10)")]
    pub(crate) default_wait_timeout: Duration,
    /// Levels preceding the topic family marker in inbound topics
    #[builder(default = "0")]
    pub(crate) service_offset: usize,
    /// Act as a gateway for sub-devices
    #[builder(default = "false")]
    pub(crate) gateway: bool,
    /// Enable network time sync
    #[builder(default = "false")]
    pub(crate) enable_ntp: bool,
    /// Enable desired property operations
    #[builder(default = "false")]
    pub(crate) enable_desired: bool,
    /// Device reports raw (non-JSON) model data, disabling JSON property posts
    #[builder(default = "false")]
    pub(crate) raw_model: bool,
    /// Quality of service for publishes and subscriptions
    #[builder(default)]
    pub(crate) qos: QoS,
}

impl ClientOptions {
    /// Whether requests are correlated with their responses
    #[must_use]
    pub fn correlation_enabled(&self) -> bool {
        self.enable_cache && self.transport_kind != TransportKind::Http
    }

    /// Wait timeout used when a caller does not supply one
    #[must_use]
    pub fn default_wait_timeout(&self) -> Duration {
        self.default_wait_timeout
    }

    /// Whether the client acts as a gateway
    #[must_use]
    pub fn gateway(&self) -> bool {
        self.gateway
    }
}

impl ClientOptionsBuilder {
    /// Initialize the [`ClientOptionsBuilder`] from environment variables.
    ///
    /// Recognized variables are `THING_MODEL_TRANSPORT` (`mqtt`, `coap` or `http`),
    /// `THING_MODEL_ENABLE_CACHE`, `THING_MODEL_CACHE_EXPIRATION_MS`,
    /// `THING_MODEL_CACHE_CLEANUP_INTERVAL_MS`, `THING_MODEL_WAIT_TIMEOUT_MS`,
    /// `THING_MODEL_SERVICE_OFFSET`, `THING_MODEL_GATEWAY`, `THING_MODEL_ENABLE_NTP`,
    /// `THING_MODEL_ENABLE_DESIRED` and `THING_MODEL_RAW_MODEL`. Unset variables leave the default in
    /// place.
    ///
    /// # Errors
    /// Returns a `String` describing the error if any of the environment variables are invalid.
    pub fn from_environment() -> Result<Self, String> {
        let transport_kind = string_from_environment("THING_MODEL_TRANSPORT")?
            .map(|v| v.parse::<TransportKind>())
            .transpose()
            .map_err(|e| format!("THING_MODEL_TRANSPORT: {e}"))?;
        let enable_cache = bool_from_environment("THING_MODEL_ENABLE_CACHE")?;
        let cache_expiration = millis_from_environment("THING_MODEL_CACHE_EXPIRATION_MS")?;
        let cache_cleanup_interval =
            millis_from_environment("THING_MODEL_CACHE_CLEANUP_INTERVAL_MS")?;
        let default_wait_timeout = millis_from_environment("THING_MODEL_WAIT_TIMEOUT_MS")?;
        let service_offset = string_from_environment("THING_MODEL_SERVICE_OFFSET")?
            .map(|v| v.parse::<usize>())
            .transpose()
            .map_err(|e| format!("THING_MODEL_SERVICE_OFFSET: {e}"))?;
        let gateway = bool_from_environment("THING_MODEL_GATEWAY")?;
        let enable_ntp = bool_from_environment("THING_MODEL_ENABLE_NTP")?;
        let enable_desired = bool_from_environment("THING_MODEL_ENABLE_DESIRED")?;
        let raw_model = bool_from_environment("THING_MODEL_RAW_MODEL")?;

        // NOTE: Do not error. The values are usable, but a caching client on a transport that
        // never correlates requests is almost certainly a misconfiguration.
        if transport_kind == Some(TransportKind::Http) && enable_cache == Some(true) {
            log::warn!(
                "THING_MODEL_ENABLE_CACHE is set but THING_MODEL_TRANSPORT is http; requests will not be correlated"
            );
        }
        if raw_model == Some(true) && gateway == Some(true) {
            log::warn!("THING_MODEL_RAW_MODEL and THING_MODEL_GATEWAY are both set in environment");
        }

        Ok(Self {
            transport_kind,
            enable_cache,
            cache_expiration,
            cache_cleanup_interval,
            default_wait_timeout,
            service_offset,
            gateway,
            enable_ntp,
            enable_desired,
            raw_model,
            qos: None,
        })
    }

    /// Validate the options.
    ///
    /// # Errors
    /// Returns a `String` describing the error if any duration is zero.
    fn validate(&self) -> Result<(), String> {
        if self.cache_expiration == Some(Duration::ZERO) {
            return Err("cache_expiration must be greater than zero".to_string());
        }
        if self.cache_cleanup_interval == Some(Duration::ZERO) {
            return Err("cache_cleanup_interval must be greater than zero".to_string());
        }
        if self.default_wait_timeout == Some(Duration::ZERO) {
            return Err("default_wait_timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

fn string_from_environment(key: &str) -> Result<Option<String>, String> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(format!("{key}: not valid unicode")),
    }
}

fn bool_from_environment(key: &str) -> Result<Option<bool>, String> {
    string_from_environment(key)?
        .map(|v| v.parse::<bool>())
        .transpose()
        .map_err(|e| format!("{key}: {e}"))
}

fn millis_from_environment(key: &str) -> Result<Option<Duration>, String> {
    string_from_environment(key)?
        .map(|v| v.parse::<u64>().map(Duration::from_millis))
        .transpose()
        .map_err(|e| format!("{key}: {e}"))
}
