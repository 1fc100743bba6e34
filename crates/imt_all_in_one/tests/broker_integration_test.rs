#![cfg(feature = "integration-tests")]

use anyhow::Result;
use common::clickhouse::{ClickHouseClient, ClickHouseSettings};
use common::domain::{ItemKey, ItemStore, PutOutcome, TableSpec};
use common::nats::{NatsClient, StreamSettings};
use egress::{ClickHouseItemStore, QueueForwardSink};
use event_bus::{Ack, Delivery, OrderingKeys, OutputPayload, Sink};
use serde_json::json;
use std::time::Duration;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::Image;
use testcontainers_modules::clickhouse::ClickHouse;

/// Custom NATS image with JetStream enabled
#[derive(Debug, Clone)]
struct NatsWithJetStream {
    ports: Vec<ContainerPort>,
}

impl Default for NatsWithJetStream {
    fn default() -> Self {
        Self {
            ports: vec![ContainerPort::Tcp(4222)],
        }
    }
}

impl Image for NatsWithJetStream {
    fn name(&self) -> &str {
        "nats"
    }

    fn tag(&self) -> &str {
        "latest"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::seconds(3)]
    }

    fn cmd(&self) -> impl IntoIterator<Item = impl Into<std::borrow::Cow<'_, str>>> {
        vec!["--js"]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

fn mt_send(reference: &str) -> Delivery {
    let payload: OutputPayload = json!({
        "cmid": "ABC123",
        "topicId": 244,
        "payload": "SGk=",
        "requestReference": reference
    })
    .as_object()
    .cloned()
    .unwrap()
    .into();

    Delivery::new(payload).with_ordering(OrderingKeys {
        group_key: reference.to_string(),
        dedup_key: reference.to_string(),
    })
}

#[tokio::test]
async fn test_queue_forward_deduplicates_on_stream() -> Result<()> {
    let nats = NatsWithJetStream::default().start().await?;
    let nats_url = format!(
        "nats://{}:{}",
        nats.get_host().await?,
        nats.get_host_port_ipv4(4222).await?
    );

    let client = NatsClient::connect(&nats_url, Duration::from_secs(10)).await?;
    client
        .ensure_stream(
            &StreamSettings::new("imt_mt_egress", "imt.mt.send")
                .with_duplicate_window(Duration::from_secs(60)),
        )
        .await?;

    let sink = QueueForwardSink::new(client.create_publisher_client(), "imt.mt.send".to_string());

    assert_eq!(sink.deliver(&mt_send("rr-1")).await, Ok(Ack::Delivered));
    assert_eq!(sink.deliver(&mt_send("rr-1")).await, Ok(Ack::Duplicate));
    assert_eq!(sink.deliver(&mt_send("rr-2")).await, Ok(Ack::Delivered));

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_clickhouse_store_keeps_first_record() -> Result<()> {
    let clickhouse = ClickHouse::default().start().await?;
    let url = format!(
        "http://{}:{}",
        clickhouse.get_host().await?,
        clickhouse.get_host_port_ipv4(8123).await?
    );

    let client = ClickHouseClient::new(&ClickHouseSettings {
        url,
        database: "default".to_string(),
        username: "default".to_string(),
        password: String::new(),
    });
    client.ping().await?;

    let store = ClickHouseItemStore::new(client, "delivery_records".to_string());
    store.migrate().await?;

    let table = TableSpec::new("imt_mo", "cmid", "transmissionEndTime");
    let key = ItemKey {
        partition: "ABC123".to_string(),
        sort: "2024-01-01T00:00:05Z".to_string(),
    };
    let first = json!({"cmid": "ABC123", "payload": "first"});
    let second = json!({"cmid": "ABC123", "payload": "second"});

    let created = store
        .put_item(&table, &key, first.as_object().unwrap())
        .await;
    let repeated = store
        .put_item(&table, &key, second.as_object().unwrap())
        .await;

    assert_eq!(created, Ok(PutOutcome::Created));
    assert_eq!(repeated, Ok(PutOutcome::AlreadyExists));
    Ok(())
}
