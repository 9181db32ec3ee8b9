use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::domain::event::EventFamily;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default = "default_topics")]
    pub topics: Vec<TopicBinding>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// Metrics HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Value written into the `service` field of every outcome record
    #[serde(default = "default_service_name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Consumer group shared by all instances of this service
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Consumer name, unique per instance (defaults to a random name)
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// Max entries fetched per topic per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// XREADGROUP BLOCK timeout in milliseconds
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    /// Pending entries idle longer than this are re-claimed and redelivered
    #[serde(default = "default_claim_idle_ms")]
    pub claim_idle_ms: u64,
    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,
    /// Delivery requests are handed off on `{prefix}:{channel}`
    #[serde(default = "default_delivery_prefix")]
    pub delivery_prefix: String,
    /// Approximate MAXLEN applied to every XADD
    #[serde(default = "default_stream_max_length")]
    pub stream_max_length: i64,
}

/// Binds a broker topic to the event family decoded from it
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TopicBinding {
    pub topic: String,
    pub family: EventFamily,
}

impl TopicBinding {
    pub fn new(topic: impl Into<String>, family: EventFamily) -> Self {
        Self {
            topic: topic.into(),
            family,
        }
    }
}

/// What the poll loop does when every worker permit is taken
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaturationPolicy {
    /// Wait for a free permit; the poll loop stalls
    #[default]
    Block,
    /// Leave the message unacknowledged for later redelivery
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub saturation_policy: SaturationPolicy,
    /// Upper bound for one unit of work (gateway calls + broker round trips)
    #[serde(default = "default_unit_timeout_ms")]
    pub unit_timeout_ms: u64,
    /// How long shutdown waits for in-flight units
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    /// "memory" or "postgres"
    #[serde(default = "default_template_backend")]
    pub backend: String,
    /// Reject routes whose catalogued template is not valid for sending
    #[serde(default)]
    pub guard_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Seconds between service-health snapshots (0 disables the reporter)
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_service_name() -> String {
    "notification-service".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_consumer_group() -> String {
    "notification-service-group".to_string()
}

fn default_consumer_name() -> String {
    format!("consumer-{}", uuid::Uuid::new_v4().simple())
}

fn default_batch_size() -> usize {
    32
}

fn default_block_timeout_ms() -> u64 {
    2_000
}

fn default_claim_idle_ms() -> u64 {
    60_000
}

fn default_dead_letter_topic() -> String {
    "notification-dead-letter".to_string()
}

fn default_delivery_prefix() -> String {
    "notification-delivery".to_string()
}

fn default_stream_max_length() -> i64 {
    100_000
}

fn default_max_concurrent() -> usize {
    64
}

fn default_unit_timeout_ms() -> u64 {
    30_000
}

fn default_drain_timeout_secs() -> u64 {
    15
}

fn default_template_backend() -> String {
    "memory".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/notifications".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    600
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_health_interval() -> u64 {
    30
}

/// The five inbound topics, one per event family
pub fn default_topics() -> Vec<TopicBinding> {
    vec![
        TopicBinding::new("user-registration-events", EventFamily::Registration),
        TopicBinding::new("trade-execution-events", EventFamily::TradeExecution),
        TopicBinding::new("subscription-events", EventFamily::Subscription),
        TopicBinding::new("payment-events", EventFamily::Payment),
        TopicBinding::new("security-alerts", EventFamily::SecurityAlert),
    ]
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("redis.url", default_redis_url())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // BROKER_CONSUMER_GROUP, WORKER_MAX_CONCURRENT, REDIS_URL, ...
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations the router cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topics.is_empty() {
            return Err(ConfigError::Message("at least one topic binding is required".into()));
        }
        if self.worker.max_concurrent == 0 {
            return Err(ConfigError::Message("worker.max_concurrent must be positive".into()));
        }
        if self.broker.claim_idle_ms <= self.worker.unit_timeout_ms {
            tracing::warn!(
                claim_idle_ms = self.broker.claim_idle_ms,
                unit_timeout_ms = self.worker.unit_timeout_ms,
                "claim idle time does not exceed the unit timeout; slow units may be re-claimed while running"
            );
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            batch_size: default_batch_size(),
            block_timeout_ms: default_block_timeout_ms(),
            claim_idle_ms: default_claim_idle_ms(),
            dead_letter_topic: default_dead_letter_topic(),
            delivery_prefix: default_delivery_prefix(),
            stream_max_length: default_stream_max_length(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            saturation_policy: SaturationPolicy::default(),
            unit_timeout_ms: default_unit_timeout_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            backend: default_template_backend(),
            guard_enabled: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 9090);

        let worker = WorkerConfig::default();
        assert_eq!(worker.saturation_policy, SaturationPolicy::Block);
        assert!(worker.max_concurrent > 0);
    }

    #[test]
    fn test_default_topics_cover_every_family() {
        let topics = default_topics();
        assert_eq!(topics.len(), 5);
        for family in EventFamily::ALL {
            assert!(topics.iter().any(|b| b.family == family));
        }
    }

    #[test]
    fn test_topic_binding_deserializes_family() {
        let binding: TopicBinding =
            serde_json::from_str(r#"{"topic": "trades", "family": "trade_execution"}"#).unwrap();
        assert_eq!(binding.family, EventFamily::TradeExecution);

        let bad = serde_json::from_str::<TopicBinding>(r#"{"topic": "x", "family": "weather"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_saturation_policy_parsing() {
        let policy: SaturationPolicy = serde_json::from_str(r#""reject""#).unwrap();
        assert_eq!(policy, SaturationPolicy::Reject);
    }

    #[test]
    fn test_validate_rejects_empty_topics() {
        let settings = Settings {
            server: ServerConfig::default(),
            service: ServiceConfig::default(),
            redis: RedisConfig::default(),
            broker: BrokerConfig::default(),
            topics: vec![],
            worker: WorkerConfig::default(),
            templates: TemplateConfig::default(),
            database: DatabaseConfig::default(),
            otel: OtelConfig::default(),
            health: HealthConfig::default(),
        };
        assert!(settings.validate().is_err());
    }
}
