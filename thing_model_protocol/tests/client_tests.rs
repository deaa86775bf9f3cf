// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use test_case::test_case;
use thing_model_protocol::cache::RequestTimeout;
use thing_model_protocol::device::DeviceInfo;
use thing_model_protocol::envelope::Reply;
use thing_model_protocol::pool::MessageKind;
use thing_model_protocol::uri;
use thing_model_protocol::{
    Client, ClientOptions, ClientOptionsBuilder, CodeError, DmError, DmErrorKind, EventCallback,
    TransportKind,
};
use thing_model_transport::mock::{MockReceiver, MockTransport, Operation};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

const PK: &str = "a1pk";
const DN: &str = "dev1";

#[derive(Debug, Clone, PartialEq)]
enum Event {
    PropertyPostReply(Option<CodeError>, String, String),
    EventPostReply(Option<CodeError>, String),
    PackPostReply(Option<CodeError>),
    DeviceInfoUpdateReply(Option<CodeError>),
    DslTemplateGetReply(Option<CodeError>, Value),
    DesiredGetReply(Option<CodeError>, Value),
    Ntp(DateTime<Utc>),
    Timeout(RequestTimeout),
    Service(String, String, Vec<u8>),
    PropertySet(String, Vec<u8>),
    Rrpc(String, Vec<u8>),
}

struct Recorder {
    tx: UnboundedSender<Event>,
    fail_services: bool,
}

impl Recorder {
    fn new() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                tx,
                fail_services: false,
            },
            rx,
        )
    }

    fn record(&self, event: Event) {
        self.tx.send(event).unwrap();
    }
}

#[async_trait]
impl EventCallback for Recorder {
    async fn property_post_reply(
        &self,
        _client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        _data: &Value,
    ) -> Result<(), DmError> {
        self.record(Event::PropertyPostReply(
            err,
            product_key.to_string(),
            device_name.to_string(),
        ));
        Ok(())
    }

    async fn event_post_reply(
        &self,
        _client: &Client,
        err: Option<CodeError>,
        event_id: &str,
        _product_key: &str,
        _device_name: &str,
        _data: &Value,
    ) -> Result<(), DmError> {
        self.record(Event::EventPostReply(err, event_id.to_string()));
        Ok(())
    }

    async fn property_pack_post_reply(
        &self,
        _client: &Client,
        err: Option<CodeError>,
        _product_key: &str,
        _device_name: &str,
        _data: &Value,
    ) -> Result<(), DmError> {
        self.record(Event::PackPostReply(err));
        Ok(())
    }

    async fn device_info_update_reply(
        &self,
        _client: &Client,
        err: Option<CodeError>,
        _product_key: &str,
        _device_name: &str,
        _data: &Value,
    ) -> Result<(), DmError> {
        self.record(Event::DeviceInfoUpdateReply(err));
        Ok(())
    }

    async fn dsl_template_get_reply(
        &self,
        _client: &Client,
        err: Option<CodeError>,
        _product_key: &str,
        _device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        self.record(Event::DslTemplateGetReply(err, data.clone()));
        Ok(())
    }

    async fn desired_property_get_reply(
        &self,
        _client: &Client,
        err: Option<CodeError>,
        _product_key: &str,
        _device_name: &str,
        data: &Value,
    ) -> Result<(), DmError> {
        self.record(Event::DesiredGetReply(err, data.clone()));
        Ok(())
    }

    async fn ntp_response(
        &self,
        _client: &Client,
        exact: DateTime<Utc>,
        _product_key: &str,
        _device_name: &str,
    ) -> Result<(), DmError> {
        self.record(Event::Ntp(exact));
        Ok(())
    }

    async fn request_wait_response_timeout(
        &self,
        _client: &Client,
        timeout: RequestTimeout,
    ) -> Result<(), DmError> {
        self.record(Event::Timeout(timeout));
        Ok(())
    }

    async fn service_request(
        &self,
        _client: &Client,
        service_id: &str,
        _product_key: &str,
        device_name: &str,
        payload: &[u8],
    ) -> Result<(), DmError> {
        self.record(Event::Service(
            service_id.to_string(),
            device_name.to_string(),
            payload.to_vec(),
        ));
        if self.fail_services {
            return Err(DmErrorKind::InvalidParameter("service refused".to_string()).into());
        }
        Ok(())
    }

    async fn service_property_set(
        &self,
        _client: &Client,
        _product_key: &str,
        device_name: &str,
        payload: &[u8],
    ) -> Result<(), DmError> {
        self.record(Event::PropertySet(device_name.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn rrpc_request(
        &self,
        client: &Client,
        message_id: &str,
        product_key: &str,
        device_name: &str,
        payload: &[u8],
    ) -> Result<(), DmError> {
        self.record(Event::Rrpc(message_id.to_string(), payload.to_vec()));
        client
            .rrpc_response(message_id, product_key, device_name, "pong")
            .await
    }
}

fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn own() -> DeviceInfo {
    DeviceInfo::new(PK, DN).unwrap()
}

fn new_client(
    options: ClientOptions,
) -> (Client, MockTransport, UnboundedReceiver<Event>) {
    setup();
    let transport = MockTransport::new();
    let (recorder, events) = Recorder::new();
    let client = Client::new(transport.clone(), own(), options, recorder);
    (client, transport, events)
}

fn default_client() -> (Client, MockTransport, UnboundedReceiver<Event>) {
    new_client(ClientOptionsBuilder::default().build().unwrap())
}

async fn next_event(events: &mut UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn last_publish(transport: &MockTransport) -> (String, Value) {
    let (topic, payload) = transport.published().pop().unwrap();
    (topic, serde_json::from_slice(&payload).unwrap())
}

fn reply_topic(path: &str, extra: &[&str]) -> String {
    uri::reply_topic(&uri::sys_topic(path, PK, DN, extra))
}

#[tokio::test]
async fn property_post_publishes_request_envelope() {
    let (client, transport, _events) = default_client();
    let id = client
        .property_post(0, json!({"temperature": 21.5}))
        .await
        .unwrap();

    let (topic, body) = last_publish(&transport);
    assert_eq!(topic, "/sys/a1pk/dev1/thing/event/property/post");
    assert_eq!(
        body,
        json!({
            "id": id.to_string(),
            "version": "1.0",
            "params": {"temperature": 21.5},
            "method": "thing.event.property.post"
        })
    );
    assert_eq!(client.lookup_owner(id), Some(0));
    assert_eq!(client.pending_requests(), 1);
}

#[tokio::test]
async fn reply_completes_pending_request_and_invokes_callback() {
    let (client, _transport, mut events) = default_client();
    client.connect().await.unwrap();
    client.insert(7, 0, MessageKind::PropertyPost);

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.wait(7, Some(Duration::from_secs(1))).await }
    });
    let handled = client
        .handle_message(
            &reply_topic(uri::THING_EVENT_PROPERTY_POST, &[]),
            br#"{"id":"7","code":200,"data":{}}"#,
        )
        .await
        .unwrap();
    assert_eq!(handled, 1);

    assert!(waiter.await.unwrap().is_ok());
    assert_eq!(
        next_event(&mut events).await,
        Event::PropertyPostReply(None, PK.to_string(), DN.to_string())
    );
}

#[tokio::test]
async fn error_code_reaches_waiter_and_callback_identically() {
    let (client, _transport, mut events) = default_client();
    client.connect().await.unwrap();
    let id = client.event_post(0, "overheat", json!({"t": 90})).await.unwrap();

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.wait(id, None).await }
    });
    let payload = json!({"id": id, "code": 6300, "message": "method not found", "data": null});
    client
        .handle_message(
            &reply_topic(uri::THING_EVENT_POST, &["overheat"]),
            &serde_json::to_vec(&payload).unwrap(),
        )
        .await
        .unwrap();

    let expected = CodeError::new(6300, "method not found");
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::Protocol(e) if *e == expected));
    assert_eq!(
        next_event(&mut events).await,
        Event::EventPostReply(Some(expected), "overheat".to_string())
    );
}

#[tokio::test]
async fn and_wait_returns_once_reply_arrives() {
    let (client, transport, mut events) = default_client();
    client.connect().await.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.dsl_template_get_and_wait(0, None).await }
    });
    // wait for the request to go out, then answer it
    let id = loop {
        if let Some((topic, payload)) = transport.published().pop() {
            assert_eq!(topic, "/sys/a1pk/dev1/thing/dsltemplate/get");
            let body: Value = serde_json::from_slice(&payload).unwrap();
            assert_eq!(body["method"], "thing.dsltemplate.get");
            break body["id"].as_str().unwrap().to_string();
        }
        tokio::task::yield_now().await;
    };
    let reply = json!({"id": id, "code": 200, "data": {"properties": []}});
    client
        .handle_message(
            &reply_topic(uri::THING_DSLTEMPLATE_GET, &[]),
            &serde_json::to_vec(&reply).unwrap(),
        )
        .await
        .unwrap();

    call.await.unwrap().unwrap();
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(
        next_event(&mut events).await,
        Event::DslTemplateGetReply(None, json!({"properties": []}))
    );
}

#[tokio::test]
async fn unanswered_request_reports_timeout_through_callback() {
    let (client, _transport, mut events) = new_client(
        ClientOptionsBuilder::default()
            .cache_expiration(Duration::from_millis(50))
            .cache_cleanup_interval(Duration::from_millis(10))
            .build()
            .unwrap(),
    );
    let id = client.device_info_update(0, json!([])).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        Event::Timeout(RequestTimeout {
            id,
            kind: MessageKind::DeviceInfoUpdate,
            device_index: 0
        })
    );
    let err = client.wait(id, None).await.unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::NotFound));
    // a late reply is harmless
    client.mark_done(id, None);
}

#[test_case(uri::THING_EVENT_PROPERTY_POST, &[], MessageKind::PropertyPost; "property post")]
#[test_case(uri::THING_EVENT_POST, &["alarm"], MessageKind::EventPost; "event post")]
#[test_case(uri::THING_EVENT_PROPERTY_PACK_POST, &[], MessageKind::PropertyPackPost; "pack post")]
#[test_case(uri::THING_DEVICEINFO_UPDATE, &[], MessageKind::DeviceInfoUpdate; "device info update")]
#[test_case(uri::THING_DEVICEINFO_DELETE, &[], MessageKind::DeviceInfoDelete; "device info delete")]
#[test_case(uri::THING_DSLTEMPLATE_GET, &[], MessageKind::DslTemplateGet; "dsl template get")]
#[test_case(uri::THING_DYNAMICTSL_GET, &[], MessageKind::DynamicTslGet; "dynamic tsl get")]
#[test_case(uri::THING_PROPERTY_DESIRED_GET, &[], MessageKind::DesiredPropertyGet; "desired get")]
#[test_case(uri::THING_PROPERTY_DESIRED_DELETE, &[], MessageKind::DesiredPropertyDelete; "desired delete")]
#[tokio::test]
async fn reply_route_completes_request(path: &str, extra: &[&str], kind: MessageKind) {
    let (client, _transport, _events) = new_client(
        ClientOptionsBuilder::default()
            .gateway(true)
            .enable_desired(true)
            .build()
            .unwrap(),
    );
    client.connect().await.unwrap();
    client.insert(31, 0, kind);

    let handled = client
        .handle_message(
            &reply_topic(path, extra),
            br#"{"id":"31","code":200,"data":{}}"#,
        )
        .await
        .unwrap();
    assert_eq!(handled, 1);
    assert!(client
        .wait(31, Some(Duration::from_millis(200)))
        .await
        .is_ok());
}

#[tokio::test]
async fn oversized_cache_durations_are_usable() {
    let (client, _transport, _events) = new_client(
        ClientOptionsBuilder::default()
            .cache_expiration(Duration::MAX)
            .cache_cleanup_interval(Duration::MAX)
            .default_wait_timeout(Duration::MAX)
            .build()
            .unwrap(),
    );
    let id = client.property_post(0, json!({})).await.unwrap();
    assert_eq!(client.lookup_owner(id), Some(0));
    client.mark_done(id, None);
    assert!(client.wait(id, None).await.is_ok());
}

#[tokio::test]
async fn wait_timeout_leaves_request_pending() {
    let (client, _transport, _events) = default_client();
    let err = client
        .device_info_update_and_wait(0, json!([]), Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::WaitTimeout(_)));
    assert_eq!(client.pending_requests(), 1);
}

#[tokio::test]
async fn publish_failure_removes_pending_request() {
    let (client, transport, _events) = default_client();
    transport.fail_next("not connected");
    let err = client.property_post(0, json!({})).await.unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::Transport(_)));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn feature_gates() {
    let (client, transport, _events) = new_client(
        ClientOptionsBuilder::default()
            .raw_model(true)
            .build()
            .unwrap(),
    );
    for err in [
        client.property_post(0, json!({})).await.unwrap_err(),
        client.property_pack_post(json!({})).await.unwrap_err(),
        client.desired_property_get(0, json!([])).await.unwrap_err(),
        client.desired_property_delete(0, json!({})).await.unwrap_err(),
        client.ntp_request().await.unwrap_err(),
        client.add_sub_device("pk", "dn").unwrap_err(),
    ] {
        assert!(matches!(err.kind(), DmErrorKind::FeatureNotSupported(_)));
    }
    assert!(transport.operations().is_empty());
}

#[tokio::test]
async fn invalid_parameters() {
    let (client, transport, _events) = default_client();
    let err = client.event_post(0, "", json!({})).await.unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::InvalidParameter(_)));
    let err = client.property_post(3, json!({})).await.unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::NotFound));
    assert!(transport.operations().is_empty());
}

#[tokio::test]
async fn http_mode_never_correlates() {
    let (client, transport, _events) = new_client(
        ClientOptionsBuilder::default()
            .transport_kind(TransportKind::Http)
            .build()
            .unwrap(),
    );
    let id = client.property_post(0, json!({})).await.unwrap();
    assert_eq!(transport.published().len(), 1);
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.lookup_owner(id), None);
    let err = client
        .property_post_and_wait(0, json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::FeatureNotSupported(_)));
}

#[tokio::test]
async fn connect_subscribes_default_topics() {
    let (client, transport, _events) = default_client();
    client.connect().await.unwrap();
    let mut subscriptions = transport.subscriptions();
    subscriptions.sort();
    let mut expected = vec![
        "/sys/a1pk/dev1/thing/event/+/post_reply",
        "/sys/a1pk/dev1/thing/deviceinfo/update_reply",
        "/sys/a1pk/dev1/thing/deviceinfo/delete_reply",
        "/sys/a1pk/dev1/thing/dsltemplate/get_reply",
        "/sys/a1pk/dev1/thing/dynamicTsl/get_reply",
        "/sys/a1pk/dev1/thing/service/property/set",
        "/sys/a1pk/dev1/thing/service/+",
        "/sys/a1pk/dev1/rrpc/request/+",
    ];
    expected.sort_unstable();
    assert_eq!(subscriptions, expected);
}

#[tokio::test]
async fn connect_subscribes_enabled_features() {
    let (client, transport, _events) = new_client(
        ClientOptionsBuilder::default()
            .gateway(true)
            .enable_ntp(true)
            .enable_desired(true)
            .build()
            .unwrap(),
    );
    client.connect().await.unwrap();
    let subscriptions = transport.subscriptions();
    assert_eq!(subscriptions.len(), 12);
    for filter in [
        "/sys/a1pk/dev1/thing/event/property/pack/post_reply",
        "/ext/ntp/a1pk/dev1/response",
        "/sys/a1pk/dev1/thing/property/desired/get_reply",
        "/sys/a1pk/dev1/thing/property/desired/delete_reply",
    ] {
        assert!(subscriptions.iter().any(|s| s == filter), "{filter}");
    }
}

#[tokio::test]
async fn failed_subscribe_is_reported() {
    let (client, transport, _events) = default_client();
    transport.fail_next("refused");
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::Transport(_)));
    // the refused filter does not route
    let handled = client
        .handle_message(
            &reply_topic(uri::THING_EVENT_PROPERTY_POST, &[]),
            br#"{"id":"1","code":200}"#,
        )
        .await
        .unwrap();
    assert_eq!(handled, 0);
}

#[tokio::test]
async fn gateway_sub_device_lifecycle() {
    let (client, transport, mut events) = new_client(
        ClientOptionsBuilder::default().gateway(true).build().unwrap(),
    );
    client.connect().await.unwrap();
    let sub = client.add_sub_device("subpk", "sub1").unwrap();
    assert_ne!(sub, 0);
    client.subscribe_device(sub).await.unwrap();
    // only the gateway itself subscribes to batch replies
    assert!(!transport
        .subscriptions()
        .iter()
        .any(|s| s.starts_with("/sys/subpk/sub1/thing/event/property/pack")));

    let id = client
        .event_post(sub, "alarm", json!({"level": 2}))
        .await
        .unwrap();
    let (topic, body) = last_publish(&transport);
    assert_eq!(topic, "/sys/subpk/sub1/thing/event/alarm/post");
    assert_eq!(body["method"], "thing.event.alarm.post");
    assert_eq!(client.lookup_owner(id), Some(sub));

    let pack = client.property_pack_post(json!({"properties": {}})).await.unwrap();
    assert_eq!(
        last_publish(&transport).0,
        "/sys/a1pk/dev1/thing/event/property/pack/post"
    );
    client
        .handle_message(
            &reply_topic(uri::THING_EVENT_PROPERTY_PACK_POST, &[]),
            &serde_json::to_vec(&json!({"id": pack.to_string(), "code": 200})).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(next_event(&mut events).await, Event::PackPostReply(None));

    client.unsubscribe_device(sub).await.unwrap();
    assert!(matches!(
        transport.operations().last(),
        Some(Operation::Unsubscribe { topic_filters }) if topic_filters.len() == 8
    ));
    let handled = client
        .handle_message("/sys/subpk/sub1/thing/service/reboot", b"{}")
        .await
        .unwrap();
    assert_eq!(handled, 0);

    client.remove_sub_device(sub).unwrap();
    let err = client.event_post(sub, "alarm", json!({})).await.unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::NotFound));
}

#[tokio::test]
async fn service_request_and_reply() {
    let (client, transport, mut events) = default_client();
    client.connect().await.unwrap();
    let request = br#"{"id":"55","version":"1.0","params":{},"method":"thing.service.reboot"}"#;
    let handled = client
        .handle_message("/sys/a1pk/dev1/thing/service/reboot", request)
        .await
        .unwrap();
    assert_eq!(handled, 1);
    assert_eq!(
        next_event(&mut events).await,
        Event::Service("reboot".to_string(), DN.to_string(), request.to_vec())
    );

    let reply = Reply {
        id: "55".to_string(),
        code: 200,
        data: json!({}),
    };
    client
        .send_service_reply("reboot", PK, DN, &reply)
        .await
        .unwrap();
    let (topic, body) = last_publish(&transport);
    assert_eq!(topic, "/sys/a1pk/dev1/thing/service/reboot_reply");
    assert_eq!(body, json!({"id": "55", "code": 200, "data": {}}));
}

#[tokio::test]
async fn property_set_routes_to_its_own_handler() {
    let (client, transport, mut events) = default_client();
    client.connect().await.unwrap();
    let handled = client
        .handle_message("/sys/a1pk/dev1/thing/service/property/set", b"{\"id\":\"8\"}")
        .await
        .unwrap();
    assert_eq!(handled, 1);
    assert_eq!(
        next_event(&mut events).await,
        Event::PropertySet(DN.to_string(), b"{\"id\":\"8\"}".to_vec())
    );

    let reply = Reply {
        id: "8".to_string(),
        code: 200,
        data: json!({}),
    };
    client
        .send_service_reply(uri::PROPERTY_SET_SERVICE, PK, DN, &reply)
        .await
        .unwrap();
    assert_eq!(
        last_publish(&transport).0,
        "/sys/a1pk/dev1/thing/service/property/set_reply"
    );
}

#[tokio::test]
async fn rrpc_request_is_answered() {
    let (client, transport, mut events) = default_client();
    client.connect().await.unwrap();
    client
        .handle_message("/sys/a1pk/dev1/rrpc/request/1234", b"ping")
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        Event::Rrpc("1234".to_string(), b"ping".to_vec())
    );
    let (topic, payload) = transport.published().pop().unwrap();
    assert_eq!(topic, "/sys/a1pk/dev1/rrpc/response/1234");
    assert_eq!(&payload[..], b"pong");
}

#[tokio::test]
async fn ntp_round_trip() {
    let (client, transport, mut events) = new_client(
        ClientOptionsBuilder::default()
            .enable_ntp(true)
            .build()
            .unwrap(),
    );
    client.connect().await.unwrap();
    client.ntp_request().await.unwrap();
    let (topic, body) = last_publish(&transport);
    assert_eq!(topic, "/ext/ntp/a1pk/dev1/request");
    let sent: i64 = body["deviceSendTime"].as_str().unwrap().parse().unwrap();

    let response = json!({
        "deviceSendTime": sent.to_string(),
        "serverRecvTime": sent.to_string(),
        "serverSendTime": sent.to_string(),
    });
    client
        .handle_message(
            "/ext/ntp/a1pk/dev1/response",
            &serde_json::to_vec(&response).unwrap(),
        )
        .await
        .unwrap();
    let Event::Ntp(exact) = next_event(&mut events).await else {
        panic!("expected ntp event");
    };
    assert!((Utc::now() - exact).num_seconds().abs() < 5);
}

#[tokio::test]
async fn ntp_response_out_of_range_is_rejected() {
    let (client, _transport, mut events) = new_client(
        ClientOptionsBuilder::default()
            .enable_ntp(true)
            .build()
            .unwrap(),
    );
    client.connect().await.unwrap();
    let response = json!({
        "deviceSendTime": "0",
        "serverRecvTime": i64::MAX.to_string(),
        "serverSendTime": i64::MAX.to_string(),
    });
    let err = client
        .handle_message(
            "/ext/ntp/a1pk/dev1/response",
            &serde_json::to_vec(&response).unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::InvalidParameter(_)));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn desired_property_reply() {
    let (client, transport, mut events) = new_client(
        ClientOptionsBuilder::default()
            .enable_desired(true)
            .build()
            .unwrap(),
    );
    client.connect().await.unwrap();
    let id = client
        .desired_property_get(0, json!(["power"]))
        .await
        .unwrap();
    assert_eq!(
        last_publish(&transport).0,
        "/sys/a1pk/dev1/thing/property/desired/get"
    );
    let reply = json!({"id": id.to_string(), "code": 200, "data": {"power": {"value": "on"}}});
    client
        .handle_message(
            &reply_topic(uri::THING_PROPERTY_DESIRED_GET, &[]),
            &serde_json::to_vec(&reply).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        Event::DesiredGetReply(None, json!({"power": {"value": "on"}}))
    );
}

#[tokio::test]
async fn malformed_inbound_messages_are_rejected() {
    let (client, _transport, _events) = default_client();
    client.connect().await.unwrap();
    client.insert(40, 0, MessageKind::DeviceInfoUpdate);

    let err = client
        .handle_message(&reply_topic(uri::THING_DEVICEINFO_UPDATE, &[]), b"oops")
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::Encoding(_)));
    // unrelated request untouched
    assert_eq!(client.lookup_owner(40), Some(0));

    let unmatched = client.handle_message("/sys/a1pk/dev1/unknown", b"{}").await.unwrap();
    assert_eq!(unmatched, 0);
}

#[tokio::test]
async fn short_topic_for_offset_is_invalid() {
    let (client, _transport, _events) = new_client(
        ClientOptionsBuilder::default()
            .service_offset(1_usize)
            .build()
            .unwrap(),
    );
    client.connect().await.unwrap();
    let err = client
        .handle_message("/sys/a1pk/dev1/thing/service/reboot", b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), DmErrorKind::InvalidUri(_)));
}

#[tokio::test]
async fn run_dispatches_until_stream_closes() {
    setup();
    let transport = MockTransport::new();
    let (mut recorder, mut events) = Recorder::new();
    recorder.fail_services = true;
    let client = Client::new(
        transport,
        own(),
        ClientOptionsBuilder::default().build().unwrap(),
        recorder,
    );
    client.connect().await.unwrap();
    let (receiver, injector) = MockReceiver::new();
    let run = tokio::spawn({
        let client = client.clone();
        async move { client.run(receiver).await }
    });

    // a failing callback does not stop later messages
    injector
        .inject_publish("/sys/a1pk/dev1/thing/service/reboot", "{}")
        .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        Event::Service(ref id, _, _) if id == "reboot"
    ));
    client.insert(77, 0, MessageKind::DeviceInfoUpdate);
    injector
        .inject_publish(
            reply_topic(uri::THING_DEVICEINFO_UPDATE, &[]),
            r#"{"id":77,"code":200}"#,
        )
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        Event::DeviceInfoUpdateReply(None)
    );
    assert!(client.wait(77, Some(Duration::from_secs(1))).await.is_ok());

    drop(injector);
    run.await.unwrap();
}
