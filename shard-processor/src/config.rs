use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::checkpoint::CheckpointPolicy;
use crate::error::ConfigError;
use crate::forwarder::ForwardPolicy;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Prefix of every tag emitted to the sink, followed by the normalized shard id.
    #[envconfig(default = "kcl")]
    pub tag_prefix: String,

    /// Mirror log events emitted to the sink into `tracing`.
    #[envconfig(default = "true")]
    pub local_logging: bool,

    #[envconfig(default = "5")]
    pub checkpoint_retries: u32,

    #[envconfig(default = "5000")]
    pub checkpoint_retry_interval: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub checkpoint_interval: EnvMsDuration,

    #[envconfig(default = "10")]
    pub max_consecutive_sink_failures: u32,

    #[envconfig(default = "1000")]
    pub sink_failure_backoff: EnvMsDuration,

    #[envconfig(default = "86400000")]
    pub halt_stall: EnvMsDuration,

    #[envconfig(default = "true")]
    pub print_sink: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    /// Check the settings that cannot be expressed through their types alone.
    ///
    /// The checkpoint interval has to be comfortably longer than the time it takes the sink
    /// circuit breaker to trip, otherwise a checkpoint could be persisted for records that never
    /// reached the sink.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checkpoint_retries == 0 {
            return Err(ConfigError::NoCheckpointRetries);
        }

        let minimum = self
            .sink_failure_backoff
            .0
            .checked_mul(self.max_consecutive_sink_failures.saturating_add(1))
            .and_then(|detection_window| detection_window.checked_mul(3))
            .ok_or(ConfigError::SinkFailureWindowOverflow)?;

        if self.checkpoint_interval.0 < minimum {
            return Err(ConfigError::CheckpointIntervalTooShort {
                interval_ms: self.checkpoint_interval.0.as_millis(),
                minimum_ms: minimum.as_millis(),
            });
        }

        Ok(())
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy {
            retries: self.checkpoint_retries,
            retry_interval: self.checkpoint_retry_interval.0,
            interval: self.checkpoint_interval.0,
        }
    }

    pub fn forward_policy(&self) -> ForwardPolicy {
        ForwardPolicy {
            max_consecutive_failures: self.max_consecutive_sink_failures,
            failure_backoff: self.sink_failure_backoff.0,
            halt_stall: self.halt_stall.0,
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    pub kafka_hosts: Option<String>,
    #[envconfig(default = "shard_events")]
    pub kafka_topic: String,
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
    #[envconfig(default = "5000")]
    pub kafka_message_timeout_ms: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&vars).expect("failed to load config")
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);

        assert_eq!(config.tag_prefix, "kcl");
        assert!(config.local_logging);
        assert!(config.print_sink);
        assert!(config.kafka.kafka_hosts.is_none());

        let checkpoint = config.checkpoint_policy();
        assert_eq!(checkpoint.retries, 5);
        assert_eq!(checkpoint.retry_interval, time::Duration::from_secs(5));
        assert_eq!(checkpoint.interval, time::Duration::from_secs(60));

        let forward = config.forward_policy();
        assert_eq!(forward.max_consecutive_failures, 10);
        assert_eq!(forward.failure_backoff, time::Duration::from_secs(1));
        assert_eq!(forward.halt_stall, time::Duration::from_secs(24 * 60 * 60));

        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CHECKPOINT_RETRIES", "3"),
            ("CHECKPOINT_RETRY_INTERVAL", "250"),
            ("TAG_PREFIX", "akca"),
            ("KAFKA_HOSTS", "localhost:9092"),
        ]);

        assert_eq!(config.checkpoint_retries, 3);
        assert_eq!(
            config.checkpoint_retry_interval.0,
            time::Duration::from_millis(250)
        );
        assert_eq!(config.tag_prefix, "akca");
        assert_eq!(config.kafka.kafka_hosts.as_deref(), Some("localhost:9092"));
    }

    #[test]
    fn test_invalid_duration() {
        assert_eq!(
            "five".parse::<EnvMsDuration>().unwrap_err(),
            ParseEnvMsDurationError
        );
    }

    #[test]
    fn test_validate_rejects_short_checkpoint_interval() {
        // 11 failures of 1s each take 11s to trip the breaker, so anything under 33s is refused.
        let config = config_from(&[("CHECKPOINT_INTERVAL", "30000")]);

        assert_eq!(
            config.validate(),
            Err(ConfigError::CheckpointIntervalTooShort {
                interval_ms: 30000,
                minimum_ms: 33000,
            })
        );

        let config = config_from(&[("CHECKPOINT_INTERVAL", "33000")]);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let config = config_from(&[("CHECKPOINT_RETRIES", "0")]);

        assert_eq!(config.validate(), Err(ConfigError::NoCheckpointRetries));
    }

    #[test]
    fn test_validate_rejects_overflowing_failure_window() {
        let config = config_from(&[
            ("MAX_CONSECUTIVE_SINK_FAILURES", "4294967295"),
            ("SINK_FAILURE_BACKOFF", "10000000000000"),
        ]);

        assert_eq!(
            config.validate(),
            Err(ConfigError::SinkFailureWindowOverflow)
        );
    }
}
