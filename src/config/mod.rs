/// TOML configuration file and its validation
pub mod settings;

pub use settings::{
    AnalysisBackendKind, AnalysisConfig, Config, DashboardConfig, DockerConfig,
    ErrorDetectionConfig, FeishuConfig, NotificationConfig, SupervisorConfig,
};
