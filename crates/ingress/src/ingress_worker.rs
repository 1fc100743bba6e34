use crate::domain::{Normalizer, SourceAdapter};
use crate::mqtt::MtSubscriber;
use crate::nats::SourceAdapterService;
use common::nats::{
    ConsumerSettings, JetStreamConsumer, NatsConsumeLoggingLayer, NatsConsumeLoggingService,
    TowerConsumer,
};
use event_bus::{ErrorSink, EventBus};
use imt_runner::AppProcess;
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

type AdapterConsumer = TowerConsumer<NatsConsumeLoggingService<SourceAdapterService>>;

pub struct IngressWorkerConfig {
    /// Stamped onto every envelope as the `account` attribute
    pub account: String,
    pub mo: ConsumerSettings,
    pub status: ConsumerSettings,
    pub mt_change: ConsumerSettings,
}

/// The three source adapters, each on its own durable consumer, plus the
/// optional MT capture subscriber.
pub struct IngressWorker {
    mo_consumer: AdapterConsumer,
    status_consumer: AdapterConsumer,
    mt_change_consumer: AdapterConsumer,
    mt_subscriber: Option<MtSubscriber>,
}

impl IngressWorker {
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        bus: EventBus,
        error_sink: Arc<dyn ErrorSink>,
        config: IngressWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!(account = %config.account, "Initializing ingress adapters");

        let build = |normalizer: Normalizer, settings: ConsumerSettings| {
            let adapter = SourceAdapter::new(
                normalizer,
                config.account.clone(),
                bus.clone(),
                Arc::clone(&error_sink),
            );
            let service = ServiceBuilder::new()
                .layer(NatsConsumeLoggingLayer::new())
                .service(SourceAdapterService::new(Arc::new(adapter)));
            TowerConsumer::new(Arc::clone(&jetstream), settings, service)
        };

        let mo_consumer = build(Normalizer::mo(), config.mo).await?;
        let status_consumer = build(Normalizer::status(), config.status).await?;
        let mt_change_consumer = build(Normalizer::mt_change(), config.mt_change).await?;

        info!("Ingress adapters initialized");

        Ok(Self {
            mo_consumer,
            status_consumer,
            mt_change_consumer,
            mt_subscriber: None,
        })
    }

    pub fn with_mt_subscriber(mut self, subscriber: MtSubscriber) -> Self {
        self.mt_subscriber = Some(subscriber);
        self
    }

    pub fn into_runner_processes(self) -> Vec<(&'static str, AppProcess)> {
        let mut processes = vec![
            ("mo_adapter", consumer_process(self.mo_consumer)),
            ("status_adapter", consumer_process(self.status_consumer)),
            ("mt_change_adapter", consumer_process(self.mt_change_consumer)),
        ];

        if let Some(subscriber) = self.mt_subscriber {
            let process: AppProcess =
                Box::new(move |ctx| Box::pin(async move { subscriber.run(ctx).await }));
            processes.push(("mt_capture", process));
        }

        processes
    }
}

fn consumer_process(consumer: AdapterConsumer) -> AppProcess {
    Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }))
}
