// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Routing of inbound messages to the handlers registered for their topic filters.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thing_model_transport::error::TransportError;
use thing_model_transport::topic::{TopicFilter, TopicName};

use crate::client::Client;
use crate::device::DeviceInfo;
use crate::envelope::{NtpResponse, Response};
use crate::error::{CodeError, DmError, DmErrorKind};
use crate::uri::{self, TopicLevels};

/// Processes messages arriving on one topic filter.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a message received on `topic`.
    async fn handle(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), DmError>;
}

/// Registry of topic filters and their handlers.
#[derive(Default)]
pub struct Dispatcher {
    routes: DashMap<String, (TopicFilter, Arc<dyn Handler>)>,
}

impl Dispatcher {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages matching `topic_filter` to `handler`, replacing any previous handler for
    /// the same filter.
    ///
    /// # Errors
    /// [`DmError`] of kind [`Transport`](DmErrorKind::Transport) if the filter is malformed
    pub fn register(&self, topic_filter: &str, handler: Arc<dyn Handler>) -> Result<(), DmError> {
        let filter = TopicFilter::from_str(topic_filter)
            .map_err(|e| DmErrorKind::from(TransportError::InvalidTopicFilter(e)))?;
        self.routes
            .insert(topic_filter.to_string(), (filter, handler));
        Ok(())
    }

    /// Stop routing messages for `topic_filter`. Returns true if it was registered.
    pub fn unregister(&self, topic_filter: &str) -> bool {
        self.routes.remove(topic_filter).is_some()
    }

    /// Number of registered filters
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no filters are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Run every handler whose filter matches `topic`, returning how many ran.
    ///
    /// All matching handlers run even if one fails.
    ///
    /// # Errors
    /// The first error returned by a handler, or [`DmError`] of kind
    /// [`InvalidUri`](DmErrorKind::InvalidUri) if `topic` is not a valid topic name
    pub async fn dispatch(
        &self,
        client: &Client,
        topic: &str,
        payload: &[u8],
    ) -> Result<usize, DmError> {
        let topic_name =
            TopicName::from_str(topic).map_err(|e| DmErrorKind::InvalidUri(e.to_string()))?;
        // collect first so no shard lock is held across a handler
        let handlers: Vec<Arc<dyn Handler>> = self
            .routes
            .iter()
            .filter(|route| route.value().0.matches_topic_name(&topic_name))
            .map(|route| route.value().1.clone())
            .collect();
        if handlers.is_empty() {
            log::debug!("[dispatch] no handler for {topic}");
            return Ok(0);
        }

        let mut first_error = None;
        for handler in &handlers {
            if let Err(e) = handler.handle(client, topic, payload).await {
                log::warn!("[dispatch] handler for {topic} failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(handlers.len()),
        }
    }
}

/// Subscription filters and handlers for a device.
///
/// `primary` selects the topics only the client's own device subscribes to.
pub(crate) fn device_routes(
    client: &Client,
    info: &DeviceInfo,
    primary: bool,
) -> Vec<(String, Arc<dyn Handler>)> {
    let options = client.options();
    let (pk, dn) = (info.product_key(), info.device_name());
    let sys = |path: &str, extra: &[&str]| uri::sys_topic(path, pk, dn, extra);
    let none: &[&str] = &[];
    let wildcard: &[&str] = &[uri::WILDCARD_ONE];

    let mut routes = vec![
        route(
            uri::reply_topic(&sys(uri::THING_EVENT_POST, wildcard)),
            EventPostReply,
        ),
        route(
            uri::reply_topic(&sys(uri::THING_DEVICEINFO_UPDATE, none)),
            DeviceInfoUpdateReply,
        ),
        route(
            uri::reply_topic(&sys(uri::THING_DEVICEINFO_DELETE, none)),
            DeviceInfoDeleteReply,
        ),
        route(
            uri::reply_topic(&sys(uri::THING_DSLTEMPLATE_GET, none)),
            DslTemplateGetReply,
        ),
        route(
            uri::reply_topic(&sys(uri::THING_DYNAMICTSL_GET, none)),
            DynamicTslGetReply,
        ),
        route(sys(uri::THING_SERVICE_PROPERTY_SET, none), ServicePropertySet),
        route(sys(uri::THING_SERVICE, wildcard), ServiceRequest),
        route(sys(uri::RRPC_REQUEST, wildcard), RrpcRequest),
    ];
    if options.enable_desired {
        routes.push(route(
            uri::reply_topic(&sys(uri::THING_PROPERTY_DESIRED_GET, none)),
            DesiredPropertyGetReply,
        ));
        routes.push(route(
            uri::reply_topic(&sys(uri::THING_PROPERTY_DESIRED_DELETE, none)),
            DesiredPropertyDeleteReply,
        ));
    }
    if primary && options.gateway {
        routes.push(route(
            uri::reply_topic(&sys(uri::THING_EVENT_PROPERTY_PACK_POST, none)),
            PropertyPackPostReply,
        ));
    }
    if primary && options.enable_ntp {
        routes.push(route(
            uri::build(uri::EXT_NTP_PREFIX, uri::NTP_RESPONSE, pk, dn, &[]),
            NtpResponseHandler,
        ));
    }
    routes
}

fn route(topic_filter: String, handler: impl Handler + 'static) -> (String, Arc<dyn Handler>) {
    (topic_filter, Arc::new(handler))
}

/// Parse a reply topic and envelope, completing the pending request it answers.
fn complete_reply<'a>(
    client: &Client,
    topic: &'a str,
    payload: &[u8],
    min_levels: usize,
) -> Result<(TopicLevels<'a>, Response, Option<CodeError>), DmError> {
    let levels = TopicLevels::parse(topic, client.options().service_offset, min_levels)?;
    let response = Response::from_slice(payload)?;
    let err = response.error();
    client.mark_done(response.id, err.clone());
    Ok((levels, response, err))
}

/// Reply to a property post or an event post.
///
/// `/sys/{productKey}/{deviceName}/thing/event/{identifier}/post_reply`
pub struct EventPostReply;

#[async_trait]
impl Handler for EventPostReply {
    async fn handle(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), DmError> {
        let (levels, response, err) = complete_reply(client, topic, payload, 7)?;
        let event_id = levels.level(5);
        log::debug!(
            "downstream thing <event>: {event_id} post reply, @{}",
            response.id
        );
        if event_id == "property" {
            client
                .callback()
                .property_post_reply(
                    client,
                    err,
                    levels.product_key(),
                    levels.device_name(),
                    &response.data,
                )
                .await
        } else {
            client
                .callback()
                .event_post_reply(
                    client,
                    err,
                    event_id,
                    levels.product_key(),
                    levels.device_name(),
                    &response.data,
                )
                .await
        }
    }
}

/// Reply to a gateway batch property post.
///
/// `/sys/{productKey}/{deviceName}/thing/event/property/pack/post_reply`
pub struct PropertyPackPostReply;

#[async_trait]
impl Handler for PropertyPackPostReply {
    async fn handle(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), DmError> {
        let (levels, response, err) = complete_reply(client, topic, payload, 8)?;
        log::debug!(
            "downstream thing <event>: property pack post reply, @{}",
            response.id
        );
        client
            .callback()
            .property_pack_post_reply(
                client,
                err,
                levels.product_key(),
                levels.device_name(),
                &response.data,
            )
            .await
    }
}

// Replies whose topic carries nothing beyond the device identity share one shape.
macro_rules! reply_handler {
    ($(#[$doc:meta])* $name:ident, $min_levels:expr, $label:literal, $callback:ident) => {
        $(#[$doc])*
        pub struct $name;

        #[async_trait]
        impl Handler for $name {
            async fn handle(
                &self,
                client: &Client,
                topic: &str,
                payload: &[u8],
            ) -> Result<(), DmError> {
                let (levels, response, err) = complete_reply(client, topic, payload, $min_levels)?;
                log::debug!(concat!("downstream thing <", $label, ">: reply, @{}"), response.id);
                client
                    .callback()
                    .$callback(
                        client,
                        err,
                        levels.product_key(),
                        levels.device_name(),
                        &response.data,
                    )
                    .await
            }
        }
    };
}

reply_handler!(
    /// Reply to a device info update.
    ///
    /// `/sys/{productKey}/{deviceName}/thing/deviceinfo/update_reply`
    DeviceInfoUpdateReply,
    6,
    "deviceinfo update",
    device_info_update_reply
);
reply_handler!(
    /// Reply to a device info delete.
    ///
    /// `/sys/{productKey}/{deviceName}/thing/deviceinfo/delete_reply`
    DeviceInfoDeleteReply,
    6,
    "deviceinfo delete",
    device_info_delete_reply
);
reply_handler!(
    /// Reply to a TSL template request.
    ///
    /// `/sys/{productKey}/{deviceName}/thing/dsltemplate/get_reply`
    DslTemplateGetReply,
    6,
    "dsl template",
    dsl_template_get_reply
);
reply_handler!(
    /// Reply to a dynamic TSL request.
    ///
    /// `/sys/{productKey}/{deviceName}/thing/dynamicTsl/get_reply`
    DynamicTslGetReply,
    6,
    "dynamic tsl",
    dynamic_tsl_get_reply
);
reply_handler!(
    /// Reply to a desired property get.
    ///
    /// `/sys/{productKey}/{deviceName}/thing/property/desired/get_reply`
    DesiredPropertyGetReply,
    7,
    "desired property get",
    desired_property_get_reply
);
reply_handler!(
    /// Reply to a desired property delete.
    ///
    /// `/sys/{productKey}/{deviceName}/thing/property/desired/delete_reply`
    DesiredPropertyDeleteReply,
    7,
    "desired property delete",
    desired_property_delete_reply
);

/// Network time response.
///
/// `/ext/ntp/{productKey}/{deviceName}/response`
pub struct NtpResponseHandler;

#[async_trait]
impl Handler for NtpResponseHandler {
    async fn handle(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), DmError> {
        let levels = TopicLevels::parse(topic, client.options().service_offset, 5)?;
        let response: NtpResponse = serde_json::from_slice(payload).map_err(DmErrorKind::from)?;
        let exact = response
            .estimate_millis(Utc::now().timestamp_millis())
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| {
                DmErrorKind::InvalidParameter(format!("server time out of range: {response:?}"))
            })?;
        log::debug!("downstream ext <ntp>: response, {exact}");
        client
            .callback()
            .ntp_response(client, exact, levels.level(2), levels.level(3))
            .await
    }
}

/// Downstream property set.
///
/// `/sys/{productKey}/{deviceName}/thing/service/property/set`
pub struct ServicePropertySet;

#[async_trait]
impl Handler for ServicePropertySet {
    async fn handle(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), DmError> {
        let levels = TopicLevels::parse(topic, client.options().service_offset, 7)?;
        log::debug!("downstream thing <service>: property set request");
        client
            .callback()
            .service_property_set(client, levels.product_key(), levels.device_name(), payload)
            .await
    }
}

/// Downstream service invocation.
///
/// `/sys/{productKey}/{deviceName}/thing/service/{identifier}`
pub struct ServiceRequest;

#[async_trait]
impl Handler for ServiceRequest {
    async fn handle(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), DmError> {
        let levels = TopicLevels::parse(topic, client.options().service_offset, 6)?;
        let service_id = levels.level(5);
        log::debug!("downstream thing <service>: {service_id} request");
        client
            .callback()
            .service_request(
                client,
                service_id,
                levels.product_key(),
                levels.device_name(),
                payload,
            )
            .await
    }
}

/// Synchronous RRPC request.
///
/// `/sys/{productKey}/{deviceName}/rrpc/request/{messageId}`
pub struct RrpcRequest;

#[async_trait]
impl Handler for RrpcRequest {
    async fn handle(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), DmError> {
        let levels = TopicLevels::parse(topic, client.options().service_offset, 6)?;
        let message_id = levels.level(5);
        log::debug!("downstream sys <rrpc>: request {message_id}");
        client
            .callback()
            .rrpc_request(
                client,
                message_id,
                levels.product_key(),
                levels.device_name(),
                payload,
            )
            .await
    }
}
