// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Application callbacks for inbound thing model events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::RequestTimeout;
use crate::client::Client;
use crate::error::{CodeError, DmError};

/// Receives the domain events a [`Client`] dispatches.
///
/// Every method defaults to doing nothing, so an implementation only overrides the events it
/// cares about. Reply events carry the error reported by the response envelope (`None` on
/// success); the same value is delivered to any caller waiting on the request.
///
/// An error returned from a method is logged by the dispatch loop and otherwise ignored.
#[allow(unused_variables)]
#[async_trait]
pub trait EventCallback: Send + Sync {
    /// Reply to a property post
    async fn property_post_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Reply to an event post
    async fn event_post_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        event_id: &str,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Reply to a gateway batch property post
    async fn property_pack_post_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Reply to a device info update
    async fn device_info_update_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Reply to a device info delete
    async fn device_info_delete_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Reply to a TSL template request, `data` holds the template
    async fn dsl_template_get_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Reply to a dynamic TSL request
    async fn dynamic_tsl_get_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Reply to a desired property get, `data` holds the desired values
    async fn desired_property_get_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Reply to a desired property delete
    async fn desired_property_delete_reply(
        &self,
        client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Network time response, with the estimated server time at reception
    async fn ntp_response(
        &self,
        client: &Client,
        exact: DateTime<Utc>,
        product_key: &str,
        device_name: &str,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// A pending request expired without a response
    async fn request_wait_response_timeout(
        &self,
        client: &Client,
        timeout: RequestTimeout,
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Downstream service invocation.
    ///
    /// The reply, if any, is published by the application through
    /// [`Client::send_service_reply`].
    async fn service_request(
        &self,
        client: &Client,
        service_id: &str,
        product_key: &str,
        device_name: &str,
        payload: &[u8],
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Downstream property set
    async fn service_property_set(
        &self,
        client: &Client,
        product_key: &str,
        device_name: &str,
        payload: &[u8],
    ) -> Result<(), DmError> {
        Ok(())
    }

    /// Synchronous RRPC request, answered through [`Client::rrpc_response`]
    async fn rrpc_request(
        &self,
        client: &Client,
        message_id: &str,
        product_key: &str,
        device_name: &str,
        payload: &[u8],
    ) -> Result<(), DmError> {
        Ok(())
    }
}

/// [`EventCallback`] that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopCallback;

impl EventCallback for NopCallback {}
