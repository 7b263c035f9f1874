use async_trait::async_trait;

use crate::config::Config;
use crate::error::SinkError;
use crate::sink::{Payload, Sink};

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod print;

/// The sink selected by configuration.
pub enum ConfiguredSink {
    Print(print::PrintSink),
    #[cfg(feature = "kafka")]
    Kafka(kafka::KafkaSink),
}

#[async_trait]
impl Sink for ConfiguredSink {
    async fn emit(&self, tag: &str, payload: Payload) -> Result<(), SinkError> {
        match self {
            ConfiguredSink::Print(sink) => sink.emit(tag, payload).await,
            #[cfg(feature = "kafka")]
            ConfiguredSink::Kafka(sink) => sink.emit(tag, payload).await,
        }
    }

    async fn flush(&self) -> Result<(), SinkError> {
        match self {
            ConfiguredSink::Print(sink) => sink.flush().await,
            #[cfg(feature = "kafka")]
            ConfiguredSink::Kafka(sink) => sink.flush().await,
        }
    }
}

/// Build the sink selected by `config`: the print sink, or Kafka when compiled in and configured.
pub fn from_config(config: &Config) -> anyhow::Result<ConfiguredSink> {
    if config.print_sink {
        return Ok(ConfiguredSink::Print(print::PrintSink {}));
    }

    #[cfg(feature = "kafka")]
    {
        let sink = kafka::KafkaSink::new(&config.kafka)?;
        Ok(ConfiguredSink::Kafka(sink))
    }

    #[cfg(not(feature = "kafka"))]
    {
        anyhow::bail!(
            "print sink is disabled and no other sink is compiled in, enable the kafka feature"
        )
    }
}
