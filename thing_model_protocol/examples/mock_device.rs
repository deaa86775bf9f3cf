// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! A device posting properties over the in-memory transport, with a simulated cloud answering
//! every request it sees.

use std::time::Duration;

use async_trait::async_trait;
use env_logger::Builder;
use serde_json::{json, Value};

use thing_model_protocol::device::DeviceInfo;
use thing_model_protocol::envelope::Request;
use thing_model_protocol::uri;
use thing_model_protocol::{Client, ClientOptionsBuilder, CodeError, DmError, EventCallback};
use thing_model_transport::mock::{MessageInjector, MockReceiver, MockTransport};

const PRODUCT_KEY: &str = "a1demo";
const DEVICE_NAME: &str = "thermostat";

struct DemoCallback;

#[async_trait]
impl EventCallback for DemoCallback {
    async fn property_post_reply(
        &self,
        _client: &Client,
        err: Option<CodeError>,
        product_key: &str,
        device_name: &str,
        _data: &Value,
    ) -> Result<(), DmError> {
        match err {
            None => log::info!("{product_key}/{device_name}: property post accepted"),
            Some(e) => log::warn!("{product_key}/{device_name}: property post rejected, {e}"),
        }
        Ok(())
    }
}

// Answers each request published so far with a success reply.
fn answer_requests(
    transport: &MockTransport,
    injector: &MessageInjector,
) -> Result<(), Box<dyn std::error::Error>> {
    for (topic, payload) in transport.published() {
        let request: Request<Value> = serde_json::from_slice(&payload)?;
        let reply = json!({"id": request.id, "code": 200, "data": {}});
        injector.inject_publish(uri::reply_topic(&topic), serde_json::to_vec(&reply)?)?;
    }
    transport.clear();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .init();

    let transport = MockTransport::new();
    let (receiver, injector) = MockReceiver::new();
    let options = ClientOptionsBuilder::default()
        .default_wait_timeout(Duration::from_secs(2))
        .build()?;
    let client = Client::new(
        transport.clone(),
        DeviceInfo::new(PRODUCT_KEY, DEVICE_NAME)?,
        options,
        DemoCallback,
    );
    client.connect().await?;
    transport.clear();

    let run_client = client.clone();
    let run = tokio::spawn(async move { run_client.run(receiver).await });

    for temperature in [20.5, 21.0, 21.5] {
        let id = client
            .property_post(0, json!({"temperature": temperature}))
            .await?;
        answer_requests(&transport, &injector)?;
        client.wait(id, None).await?;
        client.remove(id);
        log::info!("request {id} complete");
    }

    drop(injector);
    run.await?;
    Ok(())
}
