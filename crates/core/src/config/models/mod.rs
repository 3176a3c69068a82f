pub mod app_config;
pub mod dispatcher;
pub mod observability;

pub use app_config::AppConfig;
pub use dispatcher::{DispatcherConfig, LivenessConfig, ResultStoreConfig};
pub use observability::ObservabilityConfig;
