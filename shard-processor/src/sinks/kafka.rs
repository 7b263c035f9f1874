use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::SinkError;
use crate::sink::{Payload, Sink};

/// Produces every event to a single topic, keyed by its tag.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig) -> anyhow::Result<KafkaSink> {
        let hosts = config
            .kafka_hosts
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("KAFKA_HOSTS must be set to use the kafka sink"))?;
        info!("connecting to Kafka brokers at {}...", hosts);

        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", hosts).set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer = client_config.create()?;

        // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
        _ = producer.client().fetch_metadata(
            Some("__consumer_offsets"),
            Timeout::After(Duration::new(10, 0)),
        )?;
        info!("connected to Kafka brokers");

        Ok(KafkaSink {
            producer,
            topic: config.kafka_topic.clone(),
        })
    }
}

#[async_trait]
impl Sink for KafkaSink {
    async fn emit(&self, tag: &str, payload: Payload) -> Result<(), SinkError> {
        let body = payload.to_bytes()?;

        let delivery = self
            .producer
            .send_result(FutureRecord {
                topic: self.topic.as_str(),
                payload: Some(&body[..]),
                partition: None,
                key: Some(tag),
                timestamp: None,
                headers: None,
            })
            .map_err(|(e, _)| {
                error!("failed to produce event: {}", e);
                SinkError::Unavailable(e.to_string())
            })?;

        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while retrying
                metrics::counter!("shard_processor_kafka_produce_errors_total").increment(1);
                Err(SinkError::Unavailable(
                    "failed to produce to Kafka before write timeout".to_owned(),
                ))
            }
            Ok(Err((e, _))) => {
                metrics::counter!("shard_processor_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", e);
                Err(SinkError::Unavailable(e.to_string()))
            }
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn flush(&self) -> Result<(), SinkError> {
        // Blocks until in-flight messages are delivered or the timeout expires
        self.producer.flush(Duration::new(30, 0)).map_err(|e| {
            error!("failed to flush Kafka producer: {}", e);
            SinkError::Unavailable(e.to_string())
        })
    }
}
