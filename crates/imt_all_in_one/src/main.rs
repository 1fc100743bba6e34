use common::clickhouse::ClickHouseClient;
use common::nats::NatsClient;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use egress::{ClickHouseItemStore, MqttDevicePublisher, NatsErrorSink, QueueForwardSink};
use event_bus::ErrorSink;
use imt_all_in_one::config::ServiceConfig;
use imt_all_in_one::pipeline::{build_event_bus, PipelineConfig, PipelineSinks};
use imt_runner::Runner;
use ingress::{IngressWorker, IngressWorkerConfig, MtCaptureService, MtChangeProducer, MtSubscriber};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&config.telemetry())
    {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        account = %config.account_id,
        iot_prefix = %config.iot_prefix,
        device_network_region = %config.device_network_region,
        device_network_subdomain = %config.device_network_subdomain,
        "Starting imt-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let (item_store, nats_client) = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
    };

    let publisher_client = nats_client.create_publisher_client();
    let error_sink: Arc<dyn ErrorSink> = Arc::new(NatsErrorSink::new(
        Arc::clone(&publisher_client),
        config.nats_errors_subject.clone(),
    ));

    // Device network publisher; its connection runs as its own process
    let (device_publisher, device_connection) = match MqttDevicePublisher::connect(&config.mqtt())
    {
        Ok(pair) => pair,
        Err(e) => {
            error!("Failed to configure device publisher: {:#}", e);
            std::process::exit(1);
        }
    };

    let sinks = PipelineSinks {
        store: item_store.clone(),
        devices: Arc::new(device_publisher),
        mt_queue: Arc::new(QueueForwardSink::new(
            Arc::clone(&publisher_client),
            config.nats_mt_egress_subject.clone(),
        )),
    };

    let bus = match build_event_bus(&PipelineConfig::from(&config), sinks, Arc::clone(&error_sink))
    {
        Ok(bus) => bus,
        Err(e) => {
            error!("Failed to build event bus: {}", e);
            std::process::exit(1);
        }
    };

    let ingress_worker = match IngressWorker::new(
        nats_client.create_consumer_client(),
        bus,
        Arc::clone(&error_sink),
        IngressWorkerConfig {
            account: config.account_id.clone(),
            mo: config.mo_consumer(),
            status: config.status_consumer(),
            mt_change: config.mt_change_consumer(),
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize ingress worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let ingress_worker = if config.mt_capture_enabled {
        let capture = Arc::new(MtCaptureService::new(
            item_store,
            config.mt_table.clone(),
            Arc::new(MtChangeProducer::new(
                Arc::clone(&publisher_client),
                config.nats_mt_change_subject.clone(),
            )),
        ));
        ingress_worker.with_mt_subscriber(MtSubscriber::new(
            config.mqtt(),
            config.iot_prefix.clone(),
            capture,
            Arc::clone(&error_sink),
        ))
    } else {
        info!("MT capture disabled");
        ingress_worker
    };

    let mut runner = Runner::new().with_named_process(
        "device_publish_connection",
        Box::new(move |ctx| Box::pin(async move { device_connection.run(ctx).await })),
    );

    for (name, process) in ingress_worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner = runner
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            match Arc::try_unwrap(nats_client) {
                Ok(client) => {
                    if let Err(e) = client.close().await {
                        error!("Failed to close NATS connection: {:#}", e);
                    }
                }
                Err(_) => debug!("NATS client still shared, skipping flush"),
            }

            // Flush pending traces and logs
            shutdown_telemetry(telemetry_providers);

            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<ClickHouseItemStore>, Arc<NatsClient>)> {
    info!("Initializing ClickHouse...");
    let clickhouse_client = ClickHouseClient::new(&config.clickhouse());
    clickhouse_client.ping().await?;
    let item_store = ClickHouseItemStore::new(clickhouse_client, config.clickhouse_table.clone());
    item_store.migrate().await?;

    info!("Initializing NATS...");
    let nats_client = Arc::new(
        NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.startup_timeout_secs),
        )
        .await?,
    );
    for stream in config.streams() {
        nats_client.ensure_stream(&stream).await?;
    }

    Ok((Arc::new(item_store), nats_client))
}
