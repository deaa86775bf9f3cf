// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! JSON envelopes wrapping thing model requests and responses.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CodeError, DmError, DmErrorKind};

/// Protocol version stamped on outbound requests
pub const PROTOCOL_VERSION: &str = "1.0";

/// Method of a property post
pub const METHOD_EVENT_PROPERTY_POST: &str = "thing.event.property.post";
/// Method of a gateway batch property post
pub const METHOD_EVENT_PROPERTY_PACK_POST: &str = "thing.event.property.pack.post";
/// Method of a device info update
pub const METHOD_DEVICEINFO_UPDATE: &str = "thing.deviceinfo.update";
/// Method of a device info delete
pub const METHOD_DEVICEINFO_DELETE: &str = "thing.deviceinfo.delete";
/// Method of a TSL template request
pub const METHOD_DSLTEMPLATE_GET: &str = "thing.dsltemplate.get";
/// Method of a dynamic TSL request
pub const METHOD_DYNAMICTSL_GET: &str = "thing.dynamicTsl.get";
/// Method of a desired property get
pub const METHOD_PROPERTY_DESIRED_GET: &str = "thing.property.desired.get";
/// Method of a desired property delete
pub const METHOD_PROPERTY_DESIRED_DELETE: &str = "thing.property.desired.delete";

/// Method of an event post for `event_id`
#[must_use]
pub fn event_post_method(event_id: &str) -> String {
    format!("thing.event.{event_id}.post")
}

/// Request envelope, sent upstream and received for downstream service calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<P> {
    /// Request identifier, a decimal string
    pub id: String,
    /// Protocol version
    #[serde(default)]
    pub version: String,
    /// Method specific parameters
    pub params: P,
    /// Method name, e.g. `thing.event.property.post`
    #[serde(default)]
    pub method: String,
}

impl<P: Serialize> Request<P> {
    /// Create a request for `method` carrying `params`
    pub fn new(id: u64, method: impl Into<String>, params: P) -> Self {
        Self {
            id: id.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            params,
            method: method.into(),
        }
    }

    /// Encode as JSON
    ///
    /// # Errors
    /// [`DmError`] of kind [`Encoding`](DmErrorKind::Encoding) if `params` cannot be serialized
    pub fn to_vec(&self) -> Result<Vec<u8>, DmError> {
        Ok(serde_json::to_vec(self).map_err(DmErrorKind::from)?)
    }
}

/// Response envelope answering an upstream request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Identifier of the request being answered
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: u64,
    /// Result code
    pub code: i32,
    /// Human-readable result message
    #[serde(default)]
    pub message: String,
    /// Method specific result
    #[serde(default)]
    pub data: Value,
}

impl Response {
    /// Decode a response envelope.
    ///
    /// # Errors
    /// [`DmError`] of kind [`Encoding`](DmErrorKind::Encoding) if the payload is malformed
    pub fn from_slice(payload: &[u8]) -> Result<Self, DmError> {
        Ok(serde_json::from_slice(payload).map_err(DmErrorKind::from)?)
    }

    /// The error this response reports, `None` on success.
    #[must_use]
    pub fn error(&self) -> Option<CodeError> {
        CodeError::from_code(self.code, &self.message)
    }
}

/// Reply envelope published in answer to a downstream request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<D> {
    /// Identifier of the request being answered
    pub id: String,
    /// Result code
    pub code: i32,
    /// Method specific result
    pub data: D,
}

impl<D: Serialize> Reply<D> {
    /// Encode as JSON
    ///
    /// # Errors
    /// [`DmError`] of kind [`Encoding`](DmErrorKind::Encoding) if `data` cannot be serialized
    pub fn to_vec(&self) -> Result<Vec<u8>, DmError> {
        Ok(serde_json::to_vec(self).map_err(DmErrorKind::from)?)
    }
}

/// Network time request body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NtpRequest {
    /// Device clock when the request was sent, milliseconds since the epoch
    pub device_send_time: String,
}

/// Network time response body
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NtpResponse {
    /// Echo of [`NtpRequest::device_send_time`]
    #[serde(deserialize_with = "millis_from_string_or_number")]
    pub device_send_time: i64,
    /// Server clock when the request arrived
    #[serde(deserialize_with = "millis_from_string_or_number")]
    pub server_recv_time: i64,
    /// Server clock when the response left
    #[serde(deserialize_with = "millis_from_string_or_number")]
    pub server_send_time: i64,
}

impl NtpResponse {
    /// Estimated server time in milliseconds, given the device clock at reception.
    ///
    /// Returns `None` if the estimate does not fit in an `i64`.
    #[must_use]
    pub fn estimate_millis(&self, device_recv_time: i64) -> Option<i64> {
        let sum = i128::from(self.server_recv_time)
            + i128::from(self.server_send_time)
            + i128::from(device_recv_time)
            - i128::from(self.device_send_time);
        i64::try_from(sum / 2).ok()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Number(i64),
    String(String),
}

fn id_from_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(n) => u64::try_from(n).map_err(de::Error::custom),
        StringOrNumber::String(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn millis_from_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<i64, D::Error> {
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(n) => Ok(n),
        StringOrNumber::String(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test]
    fn request_shape() {
        let request = Request::new(42, "thing.event.property.post", json!({"temp": 21.5}));
        let value: Value = serde_json::from_slice(&request.to_vec().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "42",
                "version": "1.0",
                "params": {"temp": 21.5},
                "method": "thing.event.property.post"
            })
        );
    }

    #[test_case(br#"{"id":"7","code":200,"data":{}}"#, 7; "string id")]
    #[test_case(br#"{"id":7,"code":200}"#, 7; "numeric id without data")]
    fn response_ids(payload: &[u8], expected: u64) {
        let response = Response::from_slice(payload).unwrap();
        assert_eq!(response.id, expected);
        assert!(response.error().is_none());
    }

    #[test]
    fn response_error() {
        let response =
            Response::from_slice(br#"{"id":"9","code":6813,"message":"identifier not found","data":null}"#)
                .unwrap();
        assert_eq!(
            response.error(),
            Some(CodeError::new(6813, "identifier not found"))
        );
    }

    #[test_case(b"not json"; "not json")]
    #[test_case(br#"{"code":200}"#; "missing id")]
    #[test_case(br#"{"id":"abc","code":200}"#; "non-numeric id")]
    #[test_case(br#"{"id":-1,"code":200}"#; "negative id")]
    fn malformed_response(payload: &[u8]) {
        let err = Response::from_slice(payload).unwrap_err();
        assert!(matches!(err.kind(), DmErrorKind::Encoding(_)));
    }

    #[test]
    fn reply_shape() {
        let reply = Reply {
            id: "12".to_string(),
            code: 200,
            data: json!({}),
        };
        let value: Value = serde_json::from_slice(&reply.to_vec().unwrap()).unwrap();
        assert_eq!(value, json!({"id": "12", "code": 200, "data": {}}));
    }

    #[test]
    fn ntp_estimate() {
        let response: NtpResponse = serde_json::from_value(json!({
            "deviceSendTime": "1000",
            "serverRecvTime": "1100",
            "serverSendTime": 1110
        }))
        .unwrap();
        // server time at reception = (1100 + 1110 + 1200 - 1000) / 2
        assert_eq!(response.estimate_millis(1200), Some(1205));
    }

    #[test]
    fn ntp_estimate_out_of_range() {
        let response: NtpResponse = serde_json::from_value(json!({
            "deviceSendTime": i64::MIN.to_string(),
            "serverRecvTime": i64::MAX.to_string(),
            "serverSendTime": i64::MAX
        }))
        .unwrap();
        assert_eq!(response.estimate_millis(i64::MAX), None);

        // large intermediate sums are fine as long as the estimate fits
        let response: NtpResponse = serde_json::from_value(json!({
            "deviceSendTime": "0",
            "serverRecvTime": i64::MAX.to_string(),
            "serverSendTime": "0"
        }))
        .unwrap();
        assert_eq!(response.estimate_millis(0), Some(i64::MAX / 2));
    }
}
