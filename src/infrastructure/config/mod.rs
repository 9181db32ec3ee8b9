mod settings;

pub use settings::{
    default_topics, BrokerConfig, DatabaseConfig, HealthConfig, OtelConfig, RedisConfig,
    SaturationPolicy, ServerConfig, ServiceConfig, Settings, TemplateConfig, TopicBinding,
    WorkerConfig,
};
