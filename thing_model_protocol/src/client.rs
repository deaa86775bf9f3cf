// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Thing model client: outbound requests, correlation and inbound dispatch.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use thing_model_transport::interface::{PubReceiver, PubSub};

use crate::cache::PendingRequestCache;
use crate::callback::EventCallback;
use crate::device::{DeviceInfo, DeviceRegistry, SELF_DEVICE};
use crate::dispatcher::{self, Dispatcher};
use crate::envelope::{self, NtpRequest, Reply, Request};
use crate::error::{CodeError, DmError, DmErrorKind};
use crate::options::ClientOptions;
use crate::pool::MessageKind;
use crate::request_id;
use crate::uri;

struct ClientInner {
    transport: Arc<dyn PubSub>,
    options: ClientOptions,
    cache: PendingRequestCache,
    devices: DeviceRegistry,
    dispatcher: Dispatcher,
    callback: Arc<dyn EventCallback>,
}

/// Device-side thing model client.
///
/// Cloning is cheap; every clone shares the same pending requests, devices and subscriptions.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client for the device `own`, publishing through `transport` and delivering
    /// events to `callback`.
    ///
    /// Must be called from within a tokio runtime. Nothing is subscribed until
    /// [`connect`](Self::connect) is called, and nothing is dispatched until inbound messages are
    /// fed to [`run`](Self::run) or [`handle_message`](Self::handle_message).
    ///
    /// # Arguments
    /// * `transport` - Publishes requests and manages subscriptions
    /// * `own` - Identity of the client's own device, registered at index 0
    /// * `options` - Feature switches and cache timing
    /// * `callback` - Receives replies, downstream requests and timeout events
    pub fn new(
        transport: impl PubSub + 'static,
        own: DeviceInfo,
        options: ClientOptions,
        callback: impl EventCallback + 'static,
    ) -> Self {
        let (cache, timeout_rx) = if options.correlation_enabled() {
            let (cache, rx) =
                PendingRequestCache::new(options.cache_expiration, options.cache_cleanup_interval);
            (cache, Some(rx))
        } else {
            (PendingRequestCache::disabled(), None)
        };

        let inner = Arc::new(ClientInner {
            transport: Arc::new(transport),
            options,
            cache,
            devices: DeviceRegistry::new(own),
            dispatcher: Dispatcher::new(),
            callback: Arc::new(callback),
        });

        if let Some(mut timeout_rx) = timeout_rx {
            // Weak, so the forwarding task does not keep the client alive
            let weak_inner = Arc::downgrade(&inner);
            tokio::spawn(async move {
                while let Some(timeout) = timeout_rx.recv().await {
                    let Some(inner) = weak_inner.upgrade() else {
                        break;
                    };
                    log::warn!(
                        "[@{}] {:?} from device {}: {}",
                        timeout.id,
                        timeout.kind,
                        timeout.device_index,
                        DmError::from(DmErrorKind::RequestWaitResponseTimeout)
                    );
                    let client = Client { inner };
                    if let Err(e) = client
                        .callback()
                        .request_wait_response_timeout(&client, timeout)
                        .await
                    {
                        log::error!("[@{}] request timeout callback failed: {e}", timeout.id);
                    }
                }
                log::debug!("request timeout forwarding stopped");
            });
        }

        Self { inner }
    }

    /// Options the client was created with
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Callback receiving this client's events
    #[must_use]
    pub fn callback(&self) -> &dyn EventCallback {
        self.inner.callback.as_ref()
    }

    /// Identity of the device at `index`.
    ///
    /// # Errors
    /// [`DmError`] of kind [`NotFound`](DmErrorKind::NotFound) if no device has that index
    pub fn device(&self, index: usize) -> Result<DeviceInfo, DmError> {
        self.inner.devices.get(index)
    }

    /// Register a sub-device behind this gateway, returning its index.
    ///
    /// Call [`subscribe_device`](Self::subscribe_device) to start receiving its messages.
    ///
    /// # Errors
    /// [`DmError`] of kind [`FeatureNotSupported`](DmErrorKind::FeatureNotSupported) outside gateway mode
    ///
    /// [`DmError`] of kind [`InvalidParameter`](DmErrorKind::InvalidParameter) if either part of the
    /// identity is empty
    pub fn add_sub_device(
        &self,
        product_key: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Result<usize, DmError> {
        if !self.inner.options.gateway {
            return Err(DmErrorKind::FeatureNotSupported("sub-devices require gateway mode").into());
        }
        Ok(self
            .inner
            .devices
            .add(DeviceInfo::new(product_key, device_name)?))
    }

    /// Forget the sub-device at `index`.
    ///
    /// # Errors
    /// [`DmError`] of kind [`FeatureNotSupported`](DmErrorKind::FeatureNotSupported) outside gateway mode
    ///
    /// [`DmError`] of kind [`NotFound`](DmErrorKind::NotFound) if no sub-device has that index
    ///
    /// [`DmError`] of kind [`InvalidParameter`](DmErrorKind::InvalidParameter) for the client's own device
    pub fn remove_sub_device(&self, index: usize) -> Result<DeviceInfo, DmError> {
        if !self.inner.options.gateway {
            return Err(DmErrorKind::FeatureNotSupported("sub-devices require gateway mode").into());
        }
        self.inner.devices.remove(index)
    }

    /// Register request `id` as pending for `device_index`.
    ///
    /// Does nothing when correlation is disabled.
    pub fn insert(&self, id: u64, device_index: usize, kind: MessageKind) {
        self.inner.cache.insert(id, device_index, kind);
    }

    /// Index of the device that issued pending request `id`
    #[must_use]
    pub fn lookup_owner(&self, id: u64) -> Option<usize> {
        self.inner.cache.lookup_owner(id)
    }

    /// Wait for pending request `id` to complete, for `timeout` or the configured default.
    ///
    /// # Errors
    /// See [`PendingRequestCache::wait`]
    pub async fn wait(&self, id: u64, timeout: Option<Duration>) -> Result<(), DmError> {
        let timeout = timeout.unwrap_or(self.inner.options.default_wait_timeout);
        self.inner.cache.wait(id, timeout).await
    }

    /// Complete pending request `id` with `error` (`None` for success).
    pub fn mark_done(&self, id: u64, error: Option<CodeError>) {
        self.inner.cache.mark_done(id, error);
    }

    /// Forget pending request `id` without reporting a timeout.
    pub fn remove(&self, id: u64) -> bool {
        self.inner.cache.remove(id)
    }

    /// Number of requests currently tracked
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.cache.len()
    }

    /// Post property values.
    ///
    /// Returns the request id.
    ///
    /// # Errors
    /// [`DmError`] of kind [`FeatureNotSupported`](DmErrorKind::FeatureNotSupported) in raw model mode
    ///
    /// [`DmError`] of kind [`NotFound`](DmErrorKind::NotFound) if no device has index `device_index`
    ///
    /// [`DmError`] of kind [`Encoding`](DmErrorKind::Encoding) if `params` cannot be serialized
    ///
    /// [`DmError`] of kind [`Transport`](DmErrorKind::Transport) if the publish fails
    pub async fn property_post<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
    ) -> Result<u64, DmError> {
        if self.inner.options.raw_model {
            return Err(DmErrorKind::FeatureNotSupported("property post in raw model mode").into());
        }
        let id = self
            .send_request(
                device_index,
                MessageKind::PropertyPost,
                uri::THING_EVENT_PROPERTY_POST,
                &[],
                envelope::METHOD_EVENT_PROPERTY_POST,
                params,
            )
            .await?;
        log::debug!("upstream thing <event>: property post, @{id}");
        Ok(id)
    }

    /// Post property values and wait for the reply.
    ///
    /// # Errors
    /// As [`property_post`](Self::property_post) and [`wait`](Self::wait)
    pub async fn property_post_and_wait<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.property_post(device_index, params).await?;
        self.wait_response(id, timeout).await
    }

    /// Post event `event_id`.
    ///
    /// Returns the request id.
    ///
    /// # Errors
    /// [`DmError`] of kind [`InvalidParameter`](DmErrorKind::InvalidParameter) if `event_id` is empty
    ///
    /// Otherwise as [`property_post`](Self::property_post)
    pub async fn event_post<P: Serialize + Send>(
        &self,
        device_index: usize,
        event_id: &str,
        params: P,
    ) -> Result<u64, DmError> {
        if event_id.is_empty() {
            return Err(DmErrorKind::InvalidParameter("event id must not be empty".to_string()).into());
        }
        let id = self
            .send_request(
                device_index,
                MessageKind::EventPost,
                uri::THING_EVENT_POST,
                &[event_id],
                &envelope::event_post_method(event_id),
                params,
            )
            .await?;
        log::debug!("upstream thing <event>: {event_id} post, @{id}");
        Ok(id)
    }

    /// Post event `event_id` and wait for the reply.
    ///
    /// # Errors
    /// As [`event_post`](Self::event_post) and [`wait`](Self::wait)
    pub async fn event_post_and_wait<P: Serialize + Send>(
        &self,
        device_index: usize,
        event_id: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.event_post(device_index, event_id, params).await?;
        self.wait_response(id, timeout).await
    }

    /// Post properties and events for the gateway and its sub-devices in one batch.
    ///
    /// # Errors
    /// [`DmError`] of kind [`FeatureNotSupported`](DmErrorKind::FeatureNotSupported) outside gateway mode
    ///
    /// Otherwise as [`property_post`](Self::property_post)
    pub async fn property_pack_post<P: Serialize + Send>(&self, params: P) -> Result<u64, DmError> {
        if !self.inner.options.gateway {
            return Err(DmErrorKind::FeatureNotSupported("pack post requires gateway mode").into());
        }
        let id = self
            .send_request(
                SELF_DEVICE,
                MessageKind::PropertyPackPost,
                uri::THING_EVENT_PROPERTY_PACK_POST,
                &[],
                envelope::METHOD_EVENT_PROPERTY_PACK_POST,
                params,
            )
            .await?;
        log::debug!("upstream thing <event>: property pack post, @{id}");
        Ok(id)
    }

    /// Batch post and wait for the reply.
    ///
    /// # Errors
    /// As [`property_pack_post`](Self::property_pack_post) and [`wait`](Self::wait)
    pub async fn property_pack_post_and_wait<P: Serialize + Send>(
        &self,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.property_pack_post(params).await?;
        self.wait_response(id, timeout).await
    }

    /// Update device info labels.
    ///
    /// # Errors
    /// As [`property_post`](Self::property_post), without the raw model restriction
    pub async fn device_info_update<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
    ) -> Result<u64, DmError> {
        let id = self
            .send_request(
                device_index,
                MessageKind::DeviceInfoUpdate,
                uri::THING_DEVICEINFO_UPDATE,
                &[],
                envelope::METHOD_DEVICEINFO_UPDATE,
                params,
            )
            .await?;
        log::debug!("upstream thing <deviceinfo>: update, @{id}");
        Ok(id)
    }

    /// Update device info labels and wait for the reply.
    ///
    /// # Errors
    /// As [`device_info_update`](Self::device_info_update) and [`wait`](Self::wait)
    pub async fn device_info_update_and_wait<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.device_info_update(device_index, params).await?;
        self.wait_response(id, timeout).await
    }

    /// Delete device info labels.
    ///
    /// # Errors
    /// As [`device_info_update`](Self::device_info_update)
    pub async fn device_info_delete<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
    ) -> Result<u64, DmError> {
        let id = self
            .send_request(
                device_index,
                MessageKind::DeviceInfoDelete,
                uri::THING_DEVICEINFO_DELETE,
                &[],
                envelope::METHOD_DEVICEINFO_DELETE,
                params,
            )
            .await?;
        log::debug!("upstream thing <deviceinfo>: delete, @{id}");
        Ok(id)
    }

    /// Delete device info labels and wait for the reply.
    ///
    /// # Errors
    /// As [`device_info_delete`](Self::device_info_delete) and [`wait`](Self::wait)
    pub async fn device_info_delete_and_wait<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.device_info_delete(device_index, params).await?;
        self.wait_response(id, timeout).await
    }

    /// Request the device's TSL template. It arrives through
    /// [`EventCallback::dsl_template_get_reply`].
    ///
    /// # Errors
    /// As [`device_info_update`](Self::device_info_update)
    pub async fn dsl_template_get(&self, device_index: usize) -> Result<u64, DmError> {
        let id = self
            .send_request(
                device_index,
                MessageKind::DslTemplateGet,
                uri::THING_DSLTEMPLATE_GET,
                &[],
                envelope::METHOD_DSLTEMPLATE_GET,
                json!({}),
            )
            .await?;
        log::debug!("upstream thing <dsl template>: get, @{id}");
        Ok(id)
    }

    /// Request the TSL template and wait for the reply.
    ///
    /// # Errors
    /// As [`dsl_template_get`](Self::dsl_template_get) and [`wait`](Self::wait)
    pub async fn dsl_template_get_and_wait(
        &self,
        device_index: usize,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.dsl_template_get(device_index).await?;
        self.wait_response(id, timeout).await
    }

    /// Request the device's dynamic TSL. It arrives through
    /// [`EventCallback::dynamic_tsl_get_reply`].
    ///
    /// # Errors
    /// As [`device_info_update`](Self::device_info_update)
    pub async fn dynamic_tsl_get(&self, device_index: usize) -> Result<u64, DmError> {
        let id = self
            .send_request(
                device_index,
                MessageKind::DynamicTslGet,
                uri::THING_DYNAMICTSL_GET,
                &[],
                envelope::METHOD_DYNAMICTSL_GET,
                json!({"nodes": ["type", "identifier"], "addDefault": false}),
            )
            .await?;
        log::debug!("upstream thing <dynamic tsl>: get, @{id}");
        Ok(id)
    }

    /// Request the dynamic TSL and wait for the reply.
    ///
    /// # Errors
    /// As [`dynamic_tsl_get`](Self::dynamic_tsl_get) and [`wait`](Self::wait)
    pub async fn dynamic_tsl_get_and_wait(
        &self,
        device_index: usize,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.dynamic_tsl_get(device_index).await?;
        self.wait_response(id, timeout).await
    }

    /// Request desired property values. They arrive through
    /// [`EventCallback::desired_property_get_reply`].
    ///
    /// # Errors
    /// [`DmError`] of kind [`FeatureNotSupported`](DmErrorKind::FeatureNotSupported) unless desired
    /// properties are enabled
    ///
    /// Otherwise as [`device_info_update`](Self::device_info_update)
    pub async fn desired_property_get<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
    ) -> Result<u64, DmError> {
        if !self.inner.options.enable_desired {
            return Err(DmErrorKind::FeatureNotSupported("desired properties").into());
        }
        let id = self
            .send_request(
                device_index,
                MessageKind::DesiredPropertyGet,
                uri::THING_PROPERTY_DESIRED_GET,
                &[],
                envelope::METHOD_PROPERTY_DESIRED_GET,
                params,
            )
            .await?;
        log::debug!("upstream thing <desired>: property get, @{id}");
        Ok(id)
    }

    /// Request desired property values and wait for the reply.
    ///
    /// # Errors
    /// As [`desired_property_get`](Self::desired_property_get) and [`wait`](Self::wait)
    pub async fn desired_property_get_and_wait<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.desired_property_get(device_index, params).await?;
        self.wait_response(id, timeout).await
    }

    /// Clear desired property values.
    ///
    /// # Errors
    /// As [`desired_property_get`](Self::desired_property_get)
    pub async fn desired_property_delete<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
    ) -> Result<u64, DmError> {
        if !self.inner.options.enable_desired {
            return Err(DmErrorKind::FeatureNotSupported("desired properties").into());
        }
        let id = self
            .send_request(
                device_index,
                MessageKind::DesiredPropertyDelete,
                uri::THING_PROPERTY_DESIRED_DELETE,
                &[],
                envelope::METHOD_PROPERTY_DESIRED_DELETE,
                params,
            )
            .await?;
        log::debug!("upstream thing <desired>: property delete, @{id}");
        Ok(id)
    }

    /// Clear desired property values and wait for the reply.
    ///
    /// # Errors
    /// As [`desired_property_delete`](Self::desired_property_delete) and [`wait`](Self::wait)
    pub async fn desired_property_delete_and_wait<P: Serialize + Send>(
        &self,
        device_index: usize,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<(), DmError> {
        let id = self.desired_property_delete(device_index, params).await?;
        self.wait_response(id, timeout).await
    }

    /// Ask the server for the current time. The answer arrives through
    /// [`EventCallback::ntp_response`].
    ///
    /// # Errors
    /// [`DmError`] of kind [`FeatureNotSupported`](DmErrorKind::FeatureNotSupported) unless network
    /// time sync is enabled
    ///
    /// [`DmError`] of kind [`Transport`](DmErrorKind::Transport) if the publish fails
    pub async fn ntp_request(&self) -> Result<(), DmError> {
        if !self.inner.options.enable_ntp {
            return Err(DmErrorKind::FeatureNotSupported("network time sync").into());
        }
        let own = self.device(SELF_DEVICE)?;
        let topic = uri::build(
            uri::EXT_NTP_PREFIX,
            uri::NTP_REQUEST,
            own.product_key(),
            own.device_name(),
            &[],
        );
        let payload = serde_json::to_vec(&NtpRequest {
            device_send_time: Utc::now().timestamp_millis().to_string(),
        })
        .map_err(DmErrorKind::from)?;
        self.publish(topic, payload).await?;
        log::debug!("upstream ext <ntp>: request");
        Ok(())
    }

    /// Answer an RRPC request.
    ///
    /// # Errors
    /// [`DmError`] of kind [`Transport`](DmErrorKind::Transport) if the publish fails
    pub async fn rrpc_response(
        &self,
        message_id: &str,
        product_key: &str,
        device_name: &str,
        payload: impl Into<Bytes> + Send,
    ) -> Result<(), DmError> {
        let topic = uri::sys_topic(uri::RRPC_RESPONSE, product_key, device_name, &[message_id]);
        self.publish(topic, payload).await?;
        log::debug!("upstream sys <rrpc>: response {message_id}");
        Ok(())
    }

    /// Answer a downstream service request or property set.
    ///
    /// `service_id` is the identifier the request arrived with; use
    /// [`PROPERTY_SET_SERVICE`](uri::PROPERTY_SET_SERVICE) for a property set.
    ///
    /// # Errors
    /// [`DmError`] of kind [`Encoding`](DmErrorKind::Encoding) if the reply cannot be serialized
    ///
    /// [`DmError`] of kind [`Transport`](DmErrorKind::Transport) if the publish fails
    pub async fn send_service_reply<D: Serialize + Sync>(
        &self,
        service_id: &str,
        product_key: &str,
        device_name: &str,
        reply: &Reply<D>,
    ) -> Result<(), DmError> {
        let request_topic =
            uri::sys_topic(uri::THING_SERVICE, product_key, device_name, &[service_id]);
        let payload = reply.to_vec()?;
        self.publish(uri::reply_topic(&request_topic), payload).await?;
        log::debug!("upstream thing <service>: {service_id} reply, @{}", reply.id);
        Ok(())
    }

    /// Subscribe to the client's own device topics.
    ///
    /// # Errors
    /// As [`subscribe_device`](Self::subscribe_device)
    pub async fn connect(&self) -> Result<(), DmError> {
        self.subscribe_device(SELF_DEVICE).await
    }

    /// Subscribe to the reply and request topics of the device at `index`.
    ///
    /// # Errors
    /// [`DmError`] of kind [`NotFound`](DmErrorKind::NotFound) if no device has that index
    ///
    /// [`DmError`] of kind [`Transport`](DmErrorKind::Transport) if a subscribe fails. Filters
    /// subscribed before the failure stay subscribed.
    pub async fn subscribe_device(&self, index: usize) -> Result<(), DmError> {
        let info = self.device(index)?;
        for (topic_filter, handler) in dispatcher::device_routes(self, &info, index == SELF_DEVICE)
        {
            self.inner.dispatcher.register(&topic_filter, handler)?;
            if let Err(e) = self
                .inner
                .transport
                .subscribe(topic_filter.clone(), self.inner.options.qos)
                .await
            {
                log::error!("[{topic_filter}] subscribe failed: {e}");
                self.inner.dispatcher.unregister(&topic_filter);
                return Err(DmErrorKind::from(e).into());
            }
            log::debug!("[{topic_filter}] subscribed");
        }
        Ok(())
    }

    /// Unsubscribe from the topics of the device at `index`.
    ///
    /// # Errors
    /// [`DmError`] of kind [`NotFound`](DmErrorKind::NotFound) if no device has that index
    ///
    /// [`DmError`] of kind [`Transport`](DmErrorKind::Transport) if the unsubscribe fails
    pub async fn unsubscribe_device(&self, index: usize) -> Result<(), DmError> {
        let info = self.device(index)?;
        let topic_filters: Vec<String> =
            dispatcher::device_routes(self, &info, index == SELF_DEVICE)
                .into_iter()
                .map(|(topic_filter, _)| topic_filter)
                .collect();
        for topic_filter in &topic_filters {
            self.inner.dispatcher.unregister(topic_filter);
        }
        self.inner
            .transport
            .unsubscribe(topic_filters)
            .await
            .map_err(DmErrorKind::from)?;
        log::debug!("device {index} unsubscribed");
        Ok(())
    }

    /// Dispatch inbound messages from `receiver` until it closes.
    ///
    /// Each message is handled on its own task, so a slow callback does not hold up unrelated
    /// messages. Handler failures are logged.
    pub async fn run(&self, mut receiver: impl PubReceiver) {
        while let Some(message) = receiver.recv().await {
            let client = self.clone();
            tokio::spawn(async move {
                if let Err(e) = client
                    .handle_message(&message.topic, &message.payload)
                    .await
                {
                    log::error!("[{}] dispatch failed: {e}", message.topic);
                }
            });
        }
        log::info!("inbound message stream closed");
    }

    /// Dispatch one inbound message, returning the number of handlers that ran.
    ///
    /// # Arguments
    /// * `topic` - Topic name the message arrived on
    /// * `payload` - Raw message body
    ///
    /// # Errors
    /// The first error from a handler: [`InvalidUri`](DmErrorKind::InvalidUri) for a topic too
    /// short for its handler, [`Encoding`](DmErrorKind::Encoding) for a malformed envelope, or
    /// whatever the callback returned.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<usize, DmError> {
        self.inner.dispatcher.dispatch(self, topic, payload).await
    }

    async fn send_request<P: Serialize + Send>(
        &self,
        device_index: usize,
        kind: MessageKind,
        path: &str,
        extra: &[&str],
        method: &str,
        params: P,
    ) -> Result<u64, DmError> {
        let info = self.device(device_index)?;
        let topic = uri::sys_topic(path, info.product_key(), info.device_name(), extra);
        let id = request_id::next();
        let payload = Request::new(id, method, params).to_vec()?;

        // registered before publishing, so a fast reply always finds its entry
        self.inner.cache.insert(id, device_index, kind);
        if let Err(e) = self.publish(topic, payload).await {
            self.inner.cache.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    async fn wait_response(&self, id: u64, timeout: Option<Duration>) -> Result<(), DmError> {
        let result = self.wait(id, timeout).await;
        match &result {
            // caller gave up, the entry lives on until it completes or expires
            Err(e) if matches!(e.kind(), DmErrorKind::WaitTimeout(_)) => {}
            _ => {
                self.inner.cache.remove(id);
            }
        }
        result
    }

    async fn publish(&self, topic: String, payload: impl Into<Bytes> + Send) -> Result<(), DmError> {
        self.inner
            .transport
            .publish(topic, self.inner.options.qos, payload.into())
            .await
            .map_err(DmErrorKind::from)?;
        Ok(())
    }
}
