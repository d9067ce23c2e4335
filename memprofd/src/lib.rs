pub mod broker;
pub mod config;
pub mod metrics;
pub mod viewer;

pub use broker::Broker;
pub use config::{BrokerConfig, Config, RegistryConfig, ViewerConfig};
pub use metrics::Metrics;
